//! Host-side check of the device result against `A[i] + B[i]`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dispatch::ArrayShape;
use crate::error::Result;
use crate::Scalar;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mismatch {
    pub index: usize,
    pub expected: Scalar,
    pub actual: Scalar,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Compute ERROR at index {}: expected {}, got {}",
            self.index, self.expected, self.actual
        )
    }
}

/// Outcome of one verification pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub checked: usize,
    pub mismatches: Vec<Mismatch>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// Single terminal status line, gated on the absence of mismatches.
    pub fn summary(&self) -> String {
        if self.passed() {
            format!("Result is correct ({} elements checked)", self.checked)
        } else {
            format!(
                "Result is INCORRECT: {} of {} elements mismatched",
                self.mismatches.len(),
                self.checked
            )
        }
    }
}

/// Compares every `result[i]` with `a[i] + b[i]` using exact IEEE equality.
///
/// Checking continues past mismatches so every failing index is reported.
pub fn verify(
    shape: ArrayShape,
    a: &[Scalar],
    b: &[Scalar],
    result: &[Scalar],
) -> Result<VerificationReport> {
    shape.check(a.len())?;
    shape.check(b.len())?;
    shape.check(result.len())?;

    let mismatches = a
        .iter()
        .zip(b)
        .zip(result)
        .enumerate()
        .filter_map(|(index, ((lhs, rhs), actual))| {
            let expected = lhs + rhs;
            (*actual != expected).then_some(Mismatch {
                index,
                expected,
                actual: *actual,
            })
        })
        .collect();

    Ok(VerificationReport {
        checked: shape.length(),
        mismatches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdderError;

    #[test]
    fn two_element_sum_passes() {
        let shape = ArrayShape::new(2).unwrap();
        let report = verify(shape, &[1.0, 2.0], &[3.0, 4.0], &[4.0, 6.0]).unwrap();
        assert!(report.passed());
        assert_eq!(report.checked, 2);
        assert!(report.summary().starts_with("Result is correct"));
    }

    #[test]
    fn single_corruption_is_reported_once() {
        let shape = ArrayShape::new(4).unwrap();
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [0.5, 0.5, 0.5, 0.5];
        let mut result: Vec<f32> = a.iter().zip(b.iter()).map(|(x, y)| x + y).collect();
        result[2] = -1.0;

        let report = verify(shape, &a, &b, &result).unwrap();
        assert!(!report.passed());
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].index, 2);
        assert_eq!(report.mismatches[0].expected, 3.5);
        assert_eq!(report.mismatches[0].actual, -1.0);
        assert!(report.summary().contains("INCORRECT"));
    }

    #[test]
    fn checking_continues_past_first_mismatch() {
        let shape = ArrayShape::new(3).unwrap();
        let report = verify(shape, &[1.0; 3], &[1.0; 3], &[0.0, 2.0, 0.0]).unwrap();
        let indices: Vec<usize> = report.mismatches.iter().map(|m| m.index).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn equality_has_no_tolerance() {
        let shape = ArrayShape::new(1).unwrap();
        let exact = 1.0f32 + 2.0f32;
        let off_by_ulp = f32::from_bits(exact.to_bits() + 1);
        assert!(verify(shape, &[1.0], &[2.0], &[exact]).unwrap().passed());
        assert!(!verify(shape, &[1.0], &[2.0], &[off_by_ulp]).unwrap().passed());
    }

    #[test]
    fn repeated_verification_is_stable() {
        let shape = ArrayShape::new(3).unwrap();
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![4.0, 5.0, 6.0];
        let result = vec![5.0, 0.0, 9.0];
        let first = verify(shape, &a, &b, &result).unwrap();
        let second = verify(shape, &a, &b, &result).unwrap();
        assert_eq!(first, second);
        assert_eq!(result, vec![5.0, 0.0, 9.0]);
    }

    #[test]
    fn shape_disagreement_is_an_error() {
        let shape = ArrayShape::new(2).unwrap();
        assert!(matches!(
            verify(shape, &[1.0, 2.0], &[1.0, 2.0], &[2.0]),
            Err(AdderError::ShapeMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }
}
