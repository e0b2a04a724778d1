//! Utility functions and helpers
//!
//! This module provides common utilities used across the crate.

/// Device utilities
pub mod device_utils {
    use candle_core::{Device, Result};

    /// Pick the device the reference model is placed on.
    ///
    /// Falls back to CPU when `use_gpu` is set but no CUDA device exists.
    pub fn select_device(use_gpu: bool) -> Result<Device> {
        if use_gpu {
            Device::cuda_if_available(0)
        } else {
            Ok(Device::Cpu)
        }
    }

    /// Short human-readable name for a device ("cpu", "cuda:0", ...)
    pub fn device_name(device: &Device) -> String {
        match device.location() {
            candle_core::DeviceLocation::Cpu => "cpu".to_string(),
            candle_core::DeviceLocation::Cuda { gpu_id } => format!("cuda:{}", gpu_id),
            candle_core::DeviceLocation::Metal { gpu_id } => format!("metal:{}", gpu_id),
        }
    }

}

/// Shape utilities
pub mod shape_utils {
    /// Convert a flat row-major offset into a multi-dimensional index
    pub fn unravel_index(mut flat: usize, dims: &[usize]) -> Vec<usize> {
        let mut index = vec![0; dims.len()];
        for (slot, &dim) in index.iter_mut().zip(dims.iter()).rev() {
            if dim == 0 {
                continue;
            }
            *slot = flat % dim;
            flat /= dim;
        }
        index
    }

    /// Format an index the way Python prints tuples: `(0, 1)`, `(3,)`, `()`
    pub fn format_index(index: &[usize]) -> String {
        match index {
            [] => "()".to_string(),
            [single] => format!("({},)", single),
            _ => {
                let parts: Vec<String> = index.iter().map(|i| i.to_string()).collect();
                format!("({})", parts.join(", "))
            }
        }
    }

}
