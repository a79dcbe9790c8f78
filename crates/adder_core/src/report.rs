//! Serializable summary of a finished run.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::config::AdderConfig;
use crate::dispatch::DispatchShape;
use crate::error::{AdderError, Result};
use crate::verify::VerificationReport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub config: AdderConfig,
    /// Seed the inputs were drawn from; `None` when they were supplied directly.
    pub seed: Option<u64>,
    pub adapter: String,
    pub dispatch: DispatchShape,
    pub verification: VerificationReport,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.verification.passed()
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .map_err(|err| AdderError::Report(format!("encoding failed: {err}")))?;
        fs::write(path, json)
            .map_err(|err| AdderError::Report(format!("{}: {err}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ArrayShape;
    use crate::verify::Mismatch;

    fn sample_report(seed: Option<u64>) -> RunReport {
        RunReport {
            config: AdderConfig::default(),
            seed,
            adapter: "test adapter".into(),
            dispatch: DispatchShape::for_shape(ArrayShape::default(), 256).unwrap(),
            verification: VerificationReport {
                checked: 1024,
                mismatches: vec![Mismatch {
                    index: 7,
                    expected: 1.5,
                    actual: 0.0,
                }],
            },
        }
    }

    #[test]
    fn report_serializes_mismatches() {
        let report = sample_report(Some(3));
        assert!(!report.passed());
        let json = serde_json::to_string(&report).unwrap();
        let restored: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, report);
        assert!(json.contains("\"group_count\":4"));
    }

    #[test]
    fn explicit_inputs_report_no_seed() {
        let json = serde_json::to_string(&sample_report(None)).unwrap();
        assert!(json.contains("\"seed\":null"));
    }

    #[test]
    fn unwritable_path_is_a_report_error() {
        let path = std::env::temp_dir()
            .join(format!("adder-report-missing-{}", std::process::id()))
            .join("nested")
            .join("report.json");
        match sample_report(Some(3)).write_json(&path) {
            Err(AdderError::Report(message)) => assert!(message.contains("report.json")),
            other => panic!("unexpected result {other:?}"),
        }
    }
}
