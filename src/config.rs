//! Oracle configuration
//!
//! A YAML file describing which reference model to score against and the
//! thresholds both oracles use. Every field has a default so a partial file
//! (or no file at all) is valid.

use anyhow::{Context, Result};
use candle_core::DType;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::inference::DEFAULT_MAX_PERPLEXITY;
use crate::validation::{DEFAULT_ATOL, DEFAULT_RTOL};

/// Configuration shared by the perplexity and closeness oracles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// HuggingFace model id or local directory of the reference model
    pub reference_model: Option<String>,
    /// Hub revision (branch, tag or commit); ignored for local directories
    pub revision: Option<String>,
    /// Maximum acceptable perplexity (lower is better)
    pub max_perplexity: f64,
    /// Absolute tolerance for tensor comparisons
    pub atol: f64,
    /// Relative tolerance for tensor comparisons
    pub rtol: f64,
    /// Place the reference model on CUDA when available
    pub use_gpu: bool,
    /// Weight dtype for the reference model: "f32", "f16" or "bf16"
    pub dtype: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            reference_model: None,
            revision: None,
            max_perplexity: DEFAULT_MAX_PERPLEXITY,
            atol: DEFAULT_ATOL,
            rtol: DEFAULT_RTOL,
            use_gpu: false,
            dtype: "f32".to_string(),
        }
    }
}

impl OracleConfig {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {:?}", path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse config: {:?}", path))
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: OracleConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that make the oracles meaningless
    pub fn validate(&self) -> Result<()> {
        if self.max_perplexity.is_nan() {
            anyhow::bail!("max_perplexity must be a number");
        }
        if !(self.atol >= 0.0) || !(self.rtol >= 0.0) {
            anyhow::bail!(
                "tolerances must be non-negative, got atol={} rtol={}",
                self.atol,
                self.rtol
            );
        }
        self.weight_dtype()?;
        Ok(())
    }

    /// Parsed weight dtype
    pub fn weight_dtype(&self) -> Result<DType> {
        parse_dtype(&self.dtype)
    }
}

/// Parse a weight dtype name
pub fn parse_dtype(name: &str) -> Result<DType> {
    match name.to_ascii_lowercase().as_str() {
        "f32" | "float32" => Ok(DType::F32),
        "f16" | "float16" => Ok(DType::F16),
        "bf16" | "bfloat16" => Ok(DType::BF16),
        other => anyhow::bail!("Unsupported weight dtype: {}", other),
    }
}
