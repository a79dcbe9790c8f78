use std::{
    borrow::Cow,
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

use adder_core::{
    AdderConfig, AdderError, ArrayShape, DispatchShape, InputData, Result, Stage,
    VerificationReport,
};
use adder_shaders::{find_kernel, ShaderError};
use tracing::{debug, info};
use wgpu::{
    BindGroupLayout, BindGroupLayoutDescriptor, BindGroupLayoutEntry, BindingType,
    BufferBindingType, CommandEncoderDescriptor, ComputePassDescriptor, ComputePipeline,
    ComputePipelineDescriptor, Device, ErrorFilter, PipelineLayoutDescriptor, Queue,
    ShaderModuleDescriptor, ShaderSource, ShaderStages,
};

use crate::buffers::{BufferSet, Readback};
use crate::GpuContext;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Owns the add pipeline, the queue and the buffer set for one run, and walks
/// them through `Configured → DataPrepared → Dispatched → Completed → Verified`.
pub struct AdderController<'ctx> {
    context: &'ctx GpuContext,
    device: Device,
    queue: Queue,
    config: AdderConfig,
    shape: ArrayShape,
    grid: DispatchShape,
    layout: BindGroupLayout,
    pipeline: ComputePipeline,
    buffers: Option<BufferSet>,
    readback: Option<Readback>,
    stage: Stage,
}

impl<'ctx> AdderController<'ctx> {
    /// Builds the compute pipeline for `config.kernel_name`.
    ///
    /// Fails immediately when the kernel is missing or the device rejects the
    /// pipeline; a controller never exists without a usable pipeline.
    pub fn new(context: &'ctx GpuContext, config: &AdderConfig) -> Result<Self> {
        config.validate()?;
        context.ensure_alive()?;
        let mut stage = Stage::Uninitialized;

        let device = context.device.clone();
        let queue = context.queue.clone();
        let shape = config.shape()?;
        let limits = device.limits();

        let grid = DispatchShape::for_shape(shape, context.max_group_size())?;
        grid.check_group_limit(limits.max_compute_workgroups_per_dimension)?;

        let kernel = find_kernel(&config.kernel_name, grid.group_size).map_err(kernel_error)?;

        device.push_error_scope(ErrorFilter::Validation);
        let layout = create_bind_group_layout(&device);
        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("AddArraysPipelineLayout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let module = device.create_shader_module(ShaderModuleDescriptor {
            label: Some(kernel.label),
            source: ShaderSource::Wgsl(Cow::Owned(kernel.source)),
        });
        let pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("AddArraysPipeline"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some(kernel.entry_point.as_str()),
            compilation_options: Default::default(),
            cache: None,
        });
        let rejected = pollster::block_on(device.pop_error_scope());
        scope_result(rejected.map(|err| err.to_string()), AdderError::PipelineCreation)?;

        stage.advance_to(Stage::Configured)?;
        info!(
            kernel = %kernel.entry_point,
            length = shape.length(),
            group_size = grid.group_size,
            group_count = grid.group_count,
            "adder pipeline configured"
        );

        Ok(Self {
            context,
            device,
            queue,
            config: config.clone(),
            shape,
            grid,
            layout,
            pipeline,
            buffers: None,
            readback: None,
            stage,
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Thread-grid shape the dispatch will use.
    pub fn grid(&self) -> DispatchShape {
        self.grid
    }

    /// Allocates A, B and Result and uploads the host inputs.
    pub fn prepare_data(&mut self, inputs: &InputData) -> Result<()> {
        self.stage.require(Stage::Configured)?;
        self.shape.check(inputs.a.len())?;
        self.shape.check(inputs.b.len())?;

        let buffers = BufferSet::new(
            &self.device,
            &self.layout,
            self.shape,
            &inputs.a,
            &inputs.b,
        )?;

        self.buffers = Some(buffers);
        self.stage.advance_to(Stage::DataPrepared)
    }

    /// Encodes the single compute command, submits it and blocks until the device
    /// reports completion (or the configured timeout passes).
    pub fn dispatch(&mut self) -> Result<DispatchShape> {
        self.stage.require(Stage::DataPrepared)?;
        self.context.ensure_alive()?;
        let buffers = self
            .buffers
            .as_ref()
            .ok_or(AdderError::InvalidStage {
                expected: Stage::DataPrepared,
                actual: self.stage,
            })?;

        self.device.push_error_scope(ErrorFilter::Validation);
        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("AddArraysEncoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
                label: Some("AddArraysPass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &buffers.bind_group, &[]);
            pass.dispatch_workgroups(self.grid.group_count, 1, 1);
        }
        buffers.encode_readback(&mut encoder);

        let started = Instant::now();
        self.queue.submit(std::iter::once(encoder.finish()));
        let (sender, receiver) = mpsc::channel();
        self.queue.on_submitted_work_done(move || {
            let _ = sender.send(());
        });
        let rejected = pollster::block_on(self.device.pop_error_scope());
        scope_result(rejected.map(|err| err.to_string()), AdderError::Submission)?;
        self.stage.advance_to(Stage::Dispatched)?;

        self.wait_for_completion(&receiver, started)?;
        debug!(elapsed = ?started.elapsed(), "dispatch completed");
        self.stage.advance_to(Stage::Completed)?;
        Ok(self.grid)
    }

    fn wait_for_completion(&self, receiver: &mpsc::Receiver<()>, started: Instant) -> Result<()> {
        match self.config.timeout() {
            None => {
                self.device
                    .poll(wgpu::PollType::Wait)
                    .map_err(|err| AdderError::Submission(err.to_string()))?;
                self.context.ensure_alive()?;
                receiver.try_recv().map_err(|_| {
                    AdderError::Submission("device never signalled completion".into())
                })
            }
            Some(timeout) => wait_with_deadline(
                || {
                    self.device
                        .poll(wgpu::PollType::Poll)
                        .map_err(|err| AdderError::Submission(err.to_string()))?;
                    self.context.ensure_alive()
                },
                receiver,
                started,
                timeout,
            ),
        }
    }

    /// Host view of A, B and Result. Maps the staging buffers on first use and
    /// returns the cached copy afterwards.
    pub fn readback(&mut self) -> Result<&Readback> {
        if self.readback.is_none() {
            self.stage.require(Stage::Completed)?;
            let buffers = self.buffers.as_ref().ok_or(AdderError::InvalidStage {
                expected: Stage::Completed,
                actual: self.stage,
            })?;
            self.readback = Some(buffers.read_back(&self.device)?);
        }
        self.readback
            .as_ref()
            .ok_or_else(|| AdderError::Readback("no readback available".into()))
    }

    /// Checks every `Result[i]` against `A[i] + B[i]` and moves to `Verified`.
    ///
    /// Calling it again re-checks the same readback and returns the same report.
    pub fn verify(&mut self) -> Result<VerificationReport> {
        let report = self.readback()?.verify()?;
        if self.stage == Stage::Completed {
            self.stage.advance_to(Stage::Verified)?;
        }
        if report.passed() {
            info!(checked = report.checked, "verification passed");
        } else {
            info!(
                checked = report.checked,
                mismatches = report.mismatches.len(),
                "verification failed"
            );
        }
        Ok(report)
    }
}

/// Polls until the completion signal arrives, the poll step fails, or `timeout`
/// has passed since `started`.
fn wait_with_deadline<P>(
    mut poll_step: P,
    receiver: &mpsc::Receiver<()>,
    started: Instant,
    timeout: Duration,
) -> Result<()>
where
    P: FnMut() -> Result<()>,
{
    loop {
        poll_step()?;
        match receiver.try_recv() {
            Ok(()) => return Ok(()),
            Err(mpsc::TryRecvError::Disconnected) => {
                return Err(AdderError::Submission(
                    "completion callback dropped".into(),
                ))
            }
            Err(mpsc::TryRecvError::Empty) => {}
        }
        let waited = started.elapsed();
        if waited >= timeout {
            return Err(AdderError::Timeout { waited });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Turns the message of a popped error scope into the stage's error.
fn scope_result(message: Option<String>, into: fn(String) -> AdderError) -> Result<()> {
    match message {
        Some(message) => Err(into(message)),
        None => Ok(()),
    }
}

fn kernel_error(err: ShaderError) -> AdderError {
    match err {
        ShaderError::NotFound(name) => AdderError::KernelNotFound { name },
        other => AdderError::PipelineCreation(other.to_string()),
    }
}

fn create_bind_group_layout(device: &Device) -> BindGroupLayout {
    let storage_entry = |binding: u32, read_only: bool| BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };
    device.create_bind_group_layout(&BindGroupLayoutDescriptor {
        label: Some("AddArraysBindGroupLayout"),
        entries: &[
            storage_entry(0, true),
            storage_entry(1, true),
            storage_entry(2, false),
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LostFlag;

    #[test]
    fn silent_device_times_out_after_deadline() {
        let (_sender, receiver) = mpsc::channel::<()>();
        let mut polls = 0;
        let err = wait_with_deadline(
            || {
                polls += 1;
                Ok(())
            },
            &receiver,
            Instant::now(),
            Duration::from_millis(20),
        )
        .unwrap_err();
        match err {
            AdderError::Timeout { waited } => assert!(waited >= Duration::from_millis(20)),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(polls > 1);
    }

    #[test]
    fn dropped_completion_callback_is_a_submission_error() {
        let (sender, receiver) = mpsc::channel::<()>();
        drop(sender);
        let err = wait_with_deadline(
            || Ok(()),
            &receiver,
            Instant::now(),
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(
            matches!(err, AdderError::Submission(ref message) if message == "completion callback dropped")
        );
    }

    #[test]
    fn completion_signal_ends_the_wait() {
        let (sender, receiver) = mpsc::channel();
        sender.send(()).unwrap();
        assert!(wait_with_deadline(
            || Ok(()),
            &receiver,
            Instant::now(),
            Duration::from_secs(5)
        )
        .is_ok());
    }

    #[test]
    fn lost_device_stops_the_wait() {
        let (_sender, receiver) = mpsc::channel::<()>();
        let lost = LostFlag::default();
        lost.mark("Unknown: driver reset");
        let err = wait_with_deadline(
            || lost.check(),
            &receiver,
            Instant::now(),
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(matches!(err, AdderError::DeviceLost(ref reason) if reason.contains("driver reset")));
    }

    #[test]
    fn rejected_pipeline_scope_maps_to_pipeline_creation() {
        assert!(scope_result(None, AdderError::PipelineCreation).is_ok());
        let err = scope_result(
            Some("entry point has wrong signature".into()),
            AdderError::PipelineCreation,
        )
        .unwrap_err();
        assert!(
            matches!(err, AdderError::PipelineCreation(ref message) if message.contains("wrong signature"))
        );
        assert!(matches!(
            scope_result(Some("encoder invalid".into()), AdderError::Submission),
            Err(AdderError::Submission(_))
        ));
    }

    #[test]
    fn missing_kernel_maps_to_kernel_not_found() {
        let err = kernel_error(ShaderError::NotFound("mul_arrays".into()));
        assert!(matches!(err, AdderError::KernelNotFound { name } if name == "mul_arrays"));
    }

    #[test]
    fn shader_failures_map_to_pipeline_creation() {
        let err = kernel_error(ShaderError::Parse {
            label: "add_arrays.wgsl".into(),
            message: "unexpected token".into(),
        });
        assert!(matches!(err, AdderError::PipelineCreation(_)));
    }
}
