//! Host-side domain logic for the GPU array adder, independent of any GPU backend.
//!
//! Everything here can be exercised without a device: the run configuration, the
//! array shape and dispatch sizing policy, seeded input generation, result
//! verification and the error taxonomy shared with the GPU layer.

pub mod config;
pub mod data;
pub mod dispatch;
pub mod error;
pub mod report;
pub mod stage;
pub mod verify;

/// Element type of every buffer the kernel touches.
pub type Scalar = f32;

pub use config::{AdderConfig, ADD_KERNEL_NAME};
pub use data::InputData;
pub use dispatch::{ArrayShape, DispatchShape};
pub use error::{AdderError, Result};
pub use report::RunReport;
pub use stage::Stage;
pub use verify::{verify, Mismatch, VerificationReport};
