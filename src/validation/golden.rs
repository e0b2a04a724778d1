//! Golden output dumps
//!
//! Eager/exported outputs saved to disk, either as one safetensors file or
//! as a directory of `.npy` files (one per tensor, file stem = dotted name).
//! Dotted names are unflattened into an [`Outputs`] tree. Neither format
//! records the order outputs were produced in, so names are taken sorted.

use anyhow::{Context, Result};
use candle_core::{safetensors, Device, Tensor};
use std::path::Path;
use tracing::debug;

use super::outputs::Outputs;

impl Outputs {
    /// Load a dump: a directory is read as `.npy` files, a file as safetensors
    pub fn load<P: AsRef<Path>>(path: P, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        if path.is_dir() {
            Self::load_npy_dir(path, device)
        } else {
            Self::load_safetensors(path, device)
        }
    }

    /// Load every tensor of a safetensors file
    pub fn load_safetensors<P: AsRef<Path>>(path: P, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        let tensors = safetensors::load(path, device)
            .with_context(|| format!("Failed to load safetensors dump: {:?}", path))?;
        debug!("Loaded {} tensors from {:?}", tensors.len(), path);

        let mut named: Vec<(String, Tensor)> = tensors.into_iter().collect();
        named.sort_by(|a, b| a.0.cmp(&b.0));
        Self::from_named_tensors(named)
    }

    /// Load every `*.npy` file of a directory
    pub fn load_npy_dir<P: AsRef<Path>>(dir: P, device: &Device) -> Result<Self> {
        let dir = dir.as_ref();
        let mut named: Vec<(String, Tensor)> = Vec::new();

        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read dump directory: {:?}", dir))?
        {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("npy") {
                continue;
            }
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| anyhow::anyhow!("Invalid NPY file name: {:?}", path))?
                .to_string();

            let tensor = Tensor::read_npy(&path)
                .with_context(|| format!("Failed to load NPY file: {:?}", path))?
                .to_device(device)?;
            named.push((name, tensor));
        }

        if named.is_empty() {
            anyhow::bail!("No .npy files found in {:?}", dir);
        }
        debug!("Loaded {} NPY tensors from {:?}", named.len(), dir);

        named.sort_by(|a, b| a.0.cmp(&b.0));
        Self::from_named_tensors(named)
    }
}
