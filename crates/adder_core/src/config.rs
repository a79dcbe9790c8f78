//! Run configuration for the array adder.

use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::dispatch::ArrayShape;
use crate::error::{AdderError, Result};
use crate::Scalar;

/// Name of the element-wise add entry point in the kernel library.
pub const ADD_KERNEL_NAME: &str = "add_arrays";

/// Settings for one setup-dispatch-verify run. Defaults reproduce the fixed demo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdderConfig {
    pub array_length: usize,
    pub value_min: Scalar,
    pub value_max: Scalar,
    pub seed: Option<u64>,
    pub kernel_name: String,
    /// Bounded wait for dispatch completion; `None` blocks until the device finishes.
    pub timeout_ms: Option<u64>,
    /// Caps the group-size limit requested from the adapter.
    pub max_group_size: Option<u32>,
}

impl Default for AdderConfig {
    fn default() -> Self {
        Self {
            array_length: ArrayShape::default().length(),
            value_min: 0.0,
            value_max: 10.0,
            seed: None,
            kernel_name: ADD_KERNEL_NAME.to_string(),
            timeout_ms: None,
            max_group_size: None,
        }
    }
}

impl AdderConfig {
    pub fn shape(&self) -> Result<ArrayShape> {
        ArrayShape::new(self.array_length)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        self.shape()?;
        if !self.value_min.is_finite() || !self.value_max.is_finite() {
            return Err(AdderError::InvalidConfig(
                "value range bounds must be finite".into(),
            ));
        }
        if self.value_min > self.value_max {
            return Err(AdderError::InvalidConfig(format!(
                "value range is empty: [{}, {}]",
                self.value_min, self.value_max
            )));
        }
        if self.kernel_name.trim().is_empty() {
            return Err(AdderError::InvalidConfig("kernel name is empty".into()));
        }
        if self.max_group_size == Some(0) {
            return Err(AdderError::InvalidConfig(
                "max group size must be at least 1".into(),
            ));
        }
        if self.timeout_ms == Some(0) {
            return Err(AdderError::InvalidConfig(
                "timeout must be at least 1 ms".into(),
            ));
        }
        Ok(())
    }

    /// Reads a JSON config file. Missing fields fall back to the defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| {
            AdderError::InvalidConfig(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|err| AdderError::InvalidConfig(format!("malformed config JSON: {err}")))?;
        config.validate()?;
        Ok(config)
    }
}
