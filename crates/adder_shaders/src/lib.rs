//! Kernel library: WGSL sources for the adder plus lookup of entry points by name.

use naga::valid::{Capabilities, ValidationFlags, Validator};
use thiserror::Error;

pub mod compute {
    pub const ADD_ARRAYS: &str = include_str!("kernels/add_arrays.wgsl");
}

/// Placeholder in kernel sources replaced by the dispatch group size.
pub const WORKGROUP_SIZE_TOKEN: &str = "{{WORKGROUP_SIZE}}";

/// One source file in the library.
#[derive(Debug, Clone, Copy)]
pub struct KernelSource {
    pub label: &'static str,
    pub template: &'static str,
}

const LIBRARY: &[KernelSource] = &[KernelSource {
    label: "add_arrays.wgsl",
    template: compute::ADD_ARRAYS,
}];

/// Every kernel source shipped with the crate.
pub fn library() -> &'static [KernelSource] {
    LIBRARY
}

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("no compute entry point named '{0}' in the kernel library")]
    NotFound(String),
    #[error("workgroup size must be at least 1")]
    InvalidWorkgroupSize,
    #[error("{label}: WGSL parse error:\n{message}")]
    Parse { label: String, message: String },
    #[error("{label}: validation error:\n{message}")]
    Validation { label: String, message: String },
}

/// A kernel source specialised for one group size, ready for pipeline creation.
#[derive(Debug, Clone)]
pub struct RenderedKernel {
    pub label: &'static str,
    pub entry_point: String,
    pub workgroup_size: u32,
    pub source: String,
}

impl KernelSource {
    pub fn render(&self, workgroup_size: u32) -> String {
        self.template
            .replace(WORKGROUP_SIZE_TOKEN, &workgroup_size.to_string())
    }

    /// Parses and validates the rendered source with naga.
    pub fn compile(&self, workgroup_size: u32) -> Result<(String, naga::Module), ShaderError> {
        let source = self.render(workgroup_size);
        let module = naga::front::wgsl::parse_str(&source).map_err(|err| ShaderError::Parse {
            label: self.label.to_string(),
            message: err.emit_to_string(&source),
        })?;
        Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .map_err(|err| ShaderError::Validation {
                label: self.label.to_string(),
                message: err.emit_to_string(&source),
            })?;
        Ok((source, module))
    }
}

/// Finds the compute entry point `name` and renders its source with `workgroup_size`.
pub fn find_kernel(name: &str, workgroup_size: u32) -> Result<RenderedKernel, ShaderError> {
    if workgroup_size == 0 {
        return Err(ShaderError::InvalidWorkgroupSize);
    }
    for kernel in library() {
        let (source, module) = kernel.compile(workgroup_size)?;
        let found = module
            .entry_points
            .iter()
            .any(|ep| ep.name == name && ep.stage == naga::ShaderStage::Compute);
        if found {
            return Ok(RenderedKernel {
                label: kernel.label,
                entry_point: name.to_string(),
                workgroup_size,
                source,
            });
        }
    }
    Err(ShaderError::NotFound(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_shaders_validate() {
        for kernel in library() {
            for size in [1, 64, 256, 1024] {
                kernel
                    .compile(size)
                    .unwrap_or_else(|err| panic!("{}: {err}", kernel.label));
            }
        }
    }

    #[test]
    fn add_kernel_is_found_with_requested_group_size() {
        let kernel = find_kernel("add_arrays", 256).unwrap();
        assert_eq!(kernel.entry_point, "add_arrays");
        assert_eq!(kernel.workgroup_size, 256);
        assert!(kernel.source.contains("@workgroup_size(256, 1, 1)"));
        assert!(!kernel.source.contains(WORKGROUP_SIZE_TOKEN));

        let module = naga::front::wgsl::parse_str(&kernel.source).unwrap();
        let ep = module
            .entry_points
            .iter()
            .find(|ep| ep.name == "add_arrays")
            .unwrap();
        assert_eq!(ep.workgroup_size, [256, 1, 1]);
    }

    #[test]
    fn add_kernel_binds_three_storage_arrays() {
        let (_, module) = library()[0].compile(64).unwrap();
        let mut bindings: Vec<u32> = module
            .global_variables
            .iter()
            .filter_map(|(_, var)| var.binding.as_ref())
            .filter(|binding| binding.group == 0)
            .map(|binding| binding.binding)
            .collect();
        bindings.sort_unstable();
        assert_eq!(bindings, vec![0, 1, 2]);
    }

    #[test]
    fn unknown_kernel_is_not_found() {
        assert!(matches!(
            find_kernel("mul_arrays", 64),
            Err(ShaderError::NotFound(name)) if name == "mul_arrays"
        ));
    }

    #[test]
    fn zero_group_size_is_rejected() {
        assert!(matches!(
            find_kernel("add_arrays", 0),
            Err(ShaderError::InvalidWorkgroupSize)
        ));
    }
}
