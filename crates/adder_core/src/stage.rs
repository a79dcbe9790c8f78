//! One-directional lifecycle of a single adder run.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AdderError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Uninitialized,
    /// Device, pipeline and queue are ready.
    Configured,
    DataPrepared,
    Dispatched,
    Completed,
    Verified,
}

impl Stage {
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Uninitialized => Some(Stage::Configured),
            Stage::Configured => Some(Stage::DataPrepared),
            Stage::DataPrepared => Some(Stage::Dispatched),
            Stage::Dispatched => Some(Stage::Completed),
            Stage::Completed => Some(Stage::Verified),
            Stage::Verified => None,
        }
    }

    /// Moves to `target` only when it is the immediate successor of the current stage.
    pub fn advance_to(&mut self, target: Stage) -> Result<()> {
        match self.next() {
            Some(next) if next == target => {
                *self = target;
                Ok(())
            }
            _ => Err(AdderError::InvalidStage {
                expected: predecessor(target),
                actual: *self,
            }),
        }
    }

    /// Fails unless the current stage is exactly `expected`.
    pub fn require(self, expected: Stage) -> Result<()> {
        if self == expected {
            Ok(())
        } else {
            Err(AdderError::InvalidStage {
                expected,
                actual: self,
            })
        }
    }
}

fn predecessor(target: Stage) -> Stage {
    match target {
        Stage::Uninitialized | Stage::Configured => Stage::Uninitialized,
        Stage::DataPrepared => Stage::Configured,
        Stage::Dispatched => Stage::DataPrepared,
        Stage::Completed => Stage::Dispatched,
        Stage::Verified => Stage::Completed,
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Uninitialized => "Uninitialized",
            Stage::Configured => "Configured",
            Stage::DataPrepared => "DataPrepared",
            Stage::Dispatched => "Dispatched",
            Stage::Completed => "Completed",
            Stage::Verified => "Verified",
        };
        f.write_str(name)
    }
}
