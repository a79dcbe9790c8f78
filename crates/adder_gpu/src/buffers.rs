use std::sync::mpsc;

use adder_core::{verify, AdderError, ArrayShape, Result, Scalar, VerificationReport};
use bytemuck::cast_slice;
use tracing::debug;
use wgpu::{
    util::DeviceExt, BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, Buffer,
    BufferUsages, CommandEncoder, Device, ErrorFilter, Limits, MapMode,
};

/// Input A, input B and Result, plus the staging copies the host maps after a dispatch.
#[derive(Debug)]
pub struct BufferSet {
    pub input_a: Buffer,
    pub input_b: Buffer,
    pub result: Buffer,
    staging_a: Buffer,
    staging_b: Buffer,
    staging_result: Buffer,
    pub bind_group: BindGroup,
    shape: ArrayShape,
}

const BUFFER_LABELS: [&str; 6] = [
    "BufferA",
    "BufferB",
    "BufferResult",
    "StagingA",
    "StagingB",
    "StagingResult",
];

/// Host copies of all three buffers taken after the device finished.
#[derive(Debug, Clone, PartialEq)]
pub struct Readback {
    pub shape: ArrayShape,
    pub a: Vec<Scalar>,
    pub b: Vec<Scalar>,
    pub result: Vec<Scalar>,
}

impl Readback {
    /// Exact elementwise check; leaves the readback untouched.
    pub fn verify(&self) -> Result<VerificationReport> {
        verify(self.shape, &self.a, &self.b, &self.result)
    }
}

impl BufferSet {
    /// Uploads `a` and `b`; Result starts zeroed.
    ///
    /// Each buffer is created inside its own out-of-memory error scope, so an
    /// allocation failure names the buffer that could not be created.
    pub fn new(
        device: &Device,
        layout: &BindGroupLayout,
        shape: ArrayShape,
        a: &[Scalar],
        b: &[Scalar],
    ) -> Result<Self> {
        shape.check(a.len())?;
        shape.check(b.len())?;
        let size = shape.byte_size();
        let [label_a, label_b, label_result, label_sa, label_sb, label_sr] = BUFFER_LABELS;
        // All six buffers share one size, so the first label stands for the set.
        check_buffer_size(&device.limits(), label_a, size)?;

        let storage = BufferUsages::STORAGE | BufferUsages::COPY_SRC | BufferUsages::COPY_DST;
        let input_a = allocate(device, label_a, size, || {
            create_storage_buffer(device, label_a, a, storage)
        })?;
        let input_b = allocate(device, label_b, size, || {
            create_storage_buffer(device, label_b, b, storage)
        })?;
        let result = allocate(device, label_result, size, || {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label_result),
                size,
                usage: storage,
                mapped_at_creation: false,
            })
        })?;

        let staging_a = allocate(device, label_sa, size, || {
            create_staging_buffer(device, label_sa, shape)
        })?;
        let staging_b = allocate(device, label_sb, size, || {
            create_staging_buffer(device, label_sb, shape)
        })?;
        let staging_result = allocate(device, label_sr, size, || {
            create_staging_buffer(device, label_sr, shape)
        })?;

        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("AddArraysBindGroup"),
            layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: input_a.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: input_b.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: result.as_entire_binding(),
                },
            ],
        });

        debug!(
            length = shape.length(),
            bytes_per_buffer = size,
            buffers = BUFFER_LABELS.len(),
            "allocated adder buffers"
        );

        Ok(Self {
            input_a,
            input_b,
            result,
            staging_a,
            staging_b,
            staging_result,
            bind_group,
            shape,
        })
    }

    /// Records copies of all three buffers into their staging buffers.
    pub fn encode_readback(&self, encoder: &mut CommandEncoder) {
        let size = self.shape.byte_size();
        encoder.copy_buffer_to_buffer(&self.input_a, 0, &self.staging_a, 0, size);
        encoder.copy_buffer_to_buffer(&self.input_b, 0, &self.staging_b, 0, size);
        encoder.copy_buffer_to_buffer(&self.result, 0, &self.staging_result, 0, size);
    }

    /// Maps the staging buffers and copies them out. Only valid once the
    /// submission that recorded [`BufferSet::encode_readback`] has completed.
    pub fn read_back(&self, device: &Device) -> Result<Readback> {
        let staging = [&self.staging_a, &self.staging_b, &self.staging_result];

        let (sender, receiver) = mpsc::channel();
        for buffer in staging {
            let sender = sender.clone();
            buffer.slice(..).map_async(MapMode::Read, move |result| {
                let _ = sender.send(result);
            });
        }
        drop(sender);

        device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| AdderError::Readback(err.to_string()))?;
        for _ in 0..staging.len() {
            receiver
                .recv()
                .map_err(|_| AdderError::Readback("map callback never fired".into()))?
                .map_err(|err| AdderError::Readback(err.to_string()))?;
        }

        let [a, b, result] = staging.map(copy_out);
        Ok(Readback {
            shape: self.shape,
            a,
            b,
            result,
        })
    }
}

fn copy_out(buffer: &Buffer) -> Vec<Scalar> {
    let data = buffer.slice(..).get_mapped_range();
    let values = cast_slice::<u8, Scalar>(&data).to_vec();
    drop(data);
    buffer.unmap();
    values
}

/// Runs `create` inside an out-of-memory error scope.
fn allocate<T>(device: &Device, label: &str, size: u64, create: impl FnOnce() -> T) -> Result<T> {
    device.push_error_scope(ErrorFilter::OutOfMemory);
    let buffer = create();
    let oom = pollster::block_on(device.pop_error_scope());
    allocation_result(label, size, oom.map(|err| err.to_string()))?;
    Ok(buffer)
}

fn allocation_result(label: &str, size: u64, oom: Option<String>) -> Result<()> {
    match oom {
        Some(reason) => Err(AdderError::BufferAllocation {
            label: label.into(),
            size,
            reason,
        }),
        None => Ok(()),
    }
}

/// Rejects sizes the device cannot allocate or bind as storage.
pub(crate) fn check_buffer_size(limits: &Limits, label: &str, size: u64) -> Result<()> {
    let max_binding = u64::from(limits.max_storage_buffer_binding_size);
    let reason = if size > limits.max_buffer_size {
        Some(format!("exceeds max_buffer_size {}", limits.max_buffer_size))
    } else if size > max_binding {
        Some(format!(
            "exceeds max_storage_buffer_binding_size {max_binding}"
        ))
    } else {
        None
    };
    allocation_result(label, size, reason)
}

fn create_storage_buffer(
    device: &Device,
    label: &str,
    data: &[Scalar],
    usage: BufferUsages,
) -> Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: cast_slice(data),
        usage,
    })
}

fn create_staging_buffer(device: &Device, label: &str, shape: ArrayShape) -> Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: shape.byte_size(),
        usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_shape_fits_default_limits() {
        let size = ArrayShape::default().byte_size();
        assert!(check_buffer_size(&Limits::default(), "BufferA", size).is_ok());
    }

    #[test]
    fn oversized_buffers_are_rejected_before_allocation() {
        let limits = Limits {
            max_storage_buffer_binding_size: 1024,
            ..Limits::default()
        };
        match check_buffer_size(&limits, "BufferA", 4096) {
            Err(AdderError::BufferAllocation { label, size, reason }) => {
                assert_eq!(label, "BufferA");
                assert_eq!(size, 4096);
                assert!(reason.contains("max_storage_buffer_binding_size"));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn out_of_memory_names_the_failing_buffer() {
        assert!(allocation_result("StagingB", 4096, None).is_ok());
        match allocation_result("StagingB", 4096, Some("Out of memory".into())) {
            Err(AdderError::BufferAllocation { label, size, reason }) => {
                assert_eq!(label, "StagingB");
                assert_eq!(size, 4096);
                assert_eq!(reason, "Out of memory");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn readback_verification_is_repeatable() {
        let shape = ArrayShape::new(2).unwrap();
        let readback = Readback {
            shape,
            a: vec![1.0, 2.0],
            b: vec![3.0, 4.0],
            result: vec![4.0, 6.0],
        };
        let first = readback.verify().unwrap();
        let second = readback.verify().unwrap();
        assert!(first.passed());
        assert_eq!(first, second);
    }
}
