//! Array shape and thread-grid sizing shared between host code and the add kernel.

use std::mem::size_of;

use serde::{Deserialize, Serialize};

use crate::error::{AdderError, Result};
use crate::Scalar;

/// Element count shared by the A, B and Result buffers. Only built through
/// [`ArrayShape::new`], so a length is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayShape {
    length: usize,
}

impl ArrayShape {
    pub const ELEMENT_SIZE: usize = size_of::<Scalar>();

    pub fn new(length: usize) -> Result<Self> {
        if length == 0 {
            return Err(AdderError::InvalidConfig(
                "array length must be at least 1".into(),
            ));
        }
        if u32::try_from(length).is_err() {
            return Err(AdderError::InvalidConfig(format!(
                "array length {length} exceeds the 32-bit invocation index range"
            )));
        }
        Ok(Self { length })
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn element_size(&self) -> usize {
        Self::ELEMENT_SIZE
    }

    pub fn byte_size(&self) -> u64 {
        (self.length * Self::ELEMENT_SIZE) as u64
    }

    /// Rejects host data whose element count differs from this shape.
    pub fn check(&self, actual: usize) -> Result<()> {
        if actual == self.length {
            Ok(())
        } else {
            Err(AdderError::ShapeMismatch {
                expected: self.length,
                actual,
            })
        }
    }
}

impl Default for ArrayShape {
    fn default() -> Self {
        Self { length: 1 << 10 }
    }
}

/// One-dimensional launch geometry for a single dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchShape {
    pub total_items: u32,
    pub group_size: u32,
    pub group_count: u32,
}

impl DispatchShape {
    /// Uses one group of the full length unless the device maximum is smaller,
    /// in which case groups of the device maximum cover the array.
    pub fn for_shape(shape: ArrayShape, max_group_size: u32) -> Result<Self> {
        if max_group_size == 0 {
            return Err(AdderError::InvalidConfig(
                "device reports a maximum group size of 0".into(),
            ));
        }
        let total_items = shape.length() as u32;
        let group_size = total_items.min(max_group_size);
        Ok(Self {
            total_items,
            group_size,
            group_count: div_ceil(total_items, group_size),
        })
    }

    /// Rejects a grid whose group count exceeds the per-dimension device limit.
    pub fn check_group_limit(&self, max_groups_per_dimension: u32) -> Result<()> {
        if self.group_count > max_groups_per_dimension {
            Err(AdderError::DispatchTooLarge {
                groups: self.group_count,
                max: max_groups_per_dimension,
            })
        } else {
            Ok(())
        }
    }
}

const fn div_ceil(value: u32, divisor: u32) -> u32 {
    if divisor == 0 || value == 0 {
        0
    } else {
        ((value - 1) / divisor) + 1
    }
}
