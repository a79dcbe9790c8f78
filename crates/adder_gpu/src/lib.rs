//! GPU layer over `wgpu`: device acquisition, the adder controller and its buffers.

use std::sync::{Arc, Mutex};

use adder_core::{AdderConfig, AdderError, Result};
use tracing::{info, warn};
use wgpu::{
    Adapter, Backends, Device, DeviceDescriptor, Features, Instance, InstanceDescriptor, Limits,
    PowerPreference, Queue, RequestAdapterOptions,
};

mod buffers;
mod controller;

pub use buffers::{BufferSet, Readback};
pub use controller::AdderController;

/// Device handle shared by every stage of a run.
pub struct GpuContext {
    pub adapter: Adapter,
    pub device: Device,
    pub queue: Queue,
    pub adapter_info: wgpu::AdapterInfo,
    lost: LostFlag,
    // Declared last so the instance outlives the device and queue.
    _instance: Instance,
}

impl GpuContext {
    /// Acquires an adapter and a device with limits adjusted by `config`.
    pub async fn new(config: &AdderConfig) -> Result<Self> {
        let instance = Instance::new(&InstanceDescriptor {
            backends: Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|err| AdderError::DeviceUnavailable(err.to_string()))?;

        let adapter_info = adapter.get_info();
        let required_limits = requested_limits(adapter.limits(), config.max_group_size);

        let (device, queue) = adapter
            .request_device(&DeviceDescriptor {
                label: Some("GpuAdder Device"),
                required_features: Features::empty(),
                required_limits,
                ..Default::default()
            })
            .await
            .map_err(|err| AdderError::DeviceRequest(err.to_string()))?;

        let lost = LostFlag::default();
        let lost_slot = lost.clone();
        device.set_device_lost_callback(move |reason, message| {
            warn!(?reason, %message, "compute device lost");
            lost_slot.mark(format!("{reason:?}: {message}"));
        });

        let context = Self {
            adapter,
            device,
            queue,
            adapter_info,
            lost,
            _instance: instance,
        };
        info!(
            adapter = %context.adapter_info.name,
            backend = ?context.adapter_info.backend,
            device_type = ?context.adapter_info.device_type,
            max_group_size = context.max_group_size(),
            "compute device ready"
        );
        Ok(context)
    }

    pub fn new_blocking(config: &AdderConfig) -> Result<Self> {
        pollster::block_on(Self::new(config))
    }

    /// Largest one-dimensional workgroup the device accepts.
    pub fn max_group_size(&self) -> u32 {
        max_group_size(&self.device.limits())
    }

    pub fn describe_adapter(&self) -> String {
        format!(
            "{} ({:?}, {:?})",
            self.adapter_info.name, self.adapter_info.backend, self.adapter_info.device_type
        )
    }

    /// Fails with `DeviceLost` once the device-lost callback has fired.
    pub fn ensure_alive(&self) -> Result<()> {
        self.lost.check()
    }
}

/// Records the reason a device was lost; shared with the wgpu device-lost callback.
#[derive(Debug, Clone, Default)]
pub struct LostFlag(Arc<Mutex<Option<String>>>);

impl LostFlag {
    pub fn mark(&self, reason: impl Into<String>) {
        let mut slot = match self.0.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.get_or_insert_with(|| reason.into());
    }

    /// `DeviceLost` with the first recorded reason once [`LostFlag::mark`] has run.
    pub fn check(&self) -> Result<()> {
        let slot = match self.0.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        match slot.as_ref() {
            Some(reason) => Err(AdderError::DeviceLost(reason.clone())),
            None => Ok(()),
        }
    }
}

/// One-dimensional group size bound for the given device limits.
pub fn max_group_size(limits: &Limits) -> u32 {
    limits
        .max_compute_invocations_per_workgroup
        .min(limits.max_compute_workgroup_size_x)
}

/// Adapter limits, optionally capped to a smaller group size so the clamp can be
/// exercised on hardware with a large native limit.
pub fn requested_limits(adapter_limits: Limits, max_group_size: Option<u32>) -> Limits {
    match max_group_size {
        Some(cap) => Limits {
            max_compute_invocations_per_workgroup: adapter_limits
                .max_compute_invocations_per_workgroup
                .min(cap),
            max_compute_workgroup_size_x: adapter_limits.max_compute_workgroup_size_x.min(cap),
            ..adapter_limits
        },
        None => adapter_limits,
    }
}

/// Blocking convenience wrapper around one complete run with caller-supplied inputs.
pub fn run_with_inputs(
    context: &GpuContext,
    config: &AdderConfig,
    inputs: &adder_core::InputData,
) -> Result<(adder_core::DispatchShape, adder_core::VerificationReport)> {
    let mut controller = AdderController::new(context, config)?;
    controller.prepare_data(inputs)?;
    let grid = controller.dispatch()?;
    let report = controller.verify()?;
    Ok((grid, report))
}
