//! Error taxonomy shared by every stage of an adder run.

use std::time::Duration;

use thiserror::Error;

use crate::stage::Stage;

pub type Result<T, E = AdderError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum AdderError {
    /// No adapter could be obtained from the instance.
    #[error("no compute device available: {0}")]
    DeviceUnavailable(String),

    #[error("device request rejected by adapter: {0}")]
    DeviceRequest(String),

    /// The kernel library has no entry point with this name.
    #[error("kernel '{name}' not found in the kernel library")]
    KernelNotFound { name: String },

    #[error("compute pipeline creation failed: {0}")]
    PipelineCreation(String),

    #[error("failed to allocate buffer '{label}' ({size} bytes): {reason}")]
    BufferAllocation {
        label: String,
        size: u64,
        reason: String,
    },

    #[error("array shape mismatch: expected {expected} elements, found {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("dispatch needs {groups} workgroups but the device allows {max} per dimension")]
    DispatchTooLarge { groups: u32, max: u32 },

    #[error("command submission failed: {0}")]
    Submission(String),

    #[error("device lost: {0}")]
    DeviceLost(String),

    #[error("device did not complete the dispatch within {waited:?}")]
    Timeout { waited: Duration },

    #[error("buffer readback failed: {0}")]
    Readback(String),

    #[error("operation requires stage {expected}, controller is at {actual}")]
    InvalidStage { expected: Stage, actual: Stage },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to write run report: {0}")]
    Report(String),
}

impl AdderError {
    /// Busy-device failures may succeed on a later attempt; missing resources never will.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdderError::Timeout { .. } | AdderError::Submission(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(AdderError::Timeout {
            waited: Duration::from_millis(5)
        }
        .is_retryable());
        assert!(AdderError::Submission("queue busy".into()).is_retryable());
        assert!(!AdderError::DeviceUnavailable("none".into()).is_retryable());
        assert!(!AdderError::KernelNotFound {
            name: "add_arrays".into()
        }
        .is_retryable());
        assert!(!AdderError::DeviceLost("reset".into()).is_retryable());
        assert!(!AdderError::Report("disk full".into()).is_retryable());
    }

    #[test]
    fn messages_name_the_failing_resource() {
        let err = AdderError::BufferAllocation {
            label: "BufferA".into(),
            size: 4096,
            reason: "out of memory".into(),
        };
        let text = err.to_string();
        assert!(text.contains("BufferA"));
        assert!(text.contains("4096"));
    }
}
