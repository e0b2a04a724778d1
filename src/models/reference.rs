//! Reference causal language models
//!
//! Thin dispatch over the candle-transformers implementations of the
//! decoder-only families exported models are usually checked against.
//! Weights are memory-mapped from safetensors and placed on a single device.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::{llama, mistral, qwen2, qwen3};
use std::fmt;
use tracing::{debug, info};

use super::files::ModelFiles;
use super::CausalLm;

/// Supported reference model families, keyed by `config.json` `model_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    /// Llama and Llama-compatible checkpoints (SmolLM, TinyLlama, ...)
    Llama,
    /// Mistral
    Mistral,
    /// Qwen2 / Qwen2.5
    Qwen2,
    /// Qwen3 (dense)
    Qwen3,
}

impl Architecture {
    /// Detect the family from a parsed `config.json`
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let model_type = config
            .get("model_type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("config.json has no model_type"))?;

        match model_type {
            "llama" => Ok(Self::Llama),
            "mistral" => Ok(Self::Mistral),
            "qwen2" => Ok(Self::Qwen2),
            "qwen3" => Ok(Self::Qwen3),
            other => anyhow::bail!("Unsupported reference architecture: {}", other),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Llama => "llama",
            Self::Mistral => "mistral",
            Self::Qwen2 => "qwen2",
            Self::Qwen3 => "qwen3",
        };
        f.write_str(name)
    }
}

/// Loaded model of one of the supported families
enum Inner {
    /// Llama keeps its KV cache outside the model
    Llama {
        model: llama::Llama,
        cache: llama::Cache,
        config: llama::Config,
    },
    Mistral(mistral::Model),
    Qwen2(qwen2::ModelForCausalLM),
    Qwen3(qwen3::ModelForCausalLM),
}

/// Reference causal LM loaded from a HuggingFace-style checkpoint
pub struct ReferenceModel {
    inner: Inner,
    architecture: Architecture,
    dtype: DType,
    device: Device,
}

impl ReferenceModel {
    /// Build the model described by `files` with weights in `dtype` on `device`
    pub fn load(files: &ModelFiles, dtype: DType, device: &Device) -> Result<Self> {
        let config_str = std::fs::read_to_string(&files.config)
            .with_context(|| format!("Failed to read {:?}", files.config))?;
        let config_json: serde_json::Value = serde_json::from_str(&config_str)
            .with_context(|| format!("Failed to parse {:?}", files.config))?;
        let architecture = Architecture::from_config(&config_json)?;

        info!(
            "Loading {} reference model '{}' ({} weight file(s), {:.1} MB)",
            architecture,
            files.model_id,
            files.weights.len(),
            files.weights_size() as f64 / 1_048_576.0
        );

        // SAFETY: the safetensors files are not modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&files.weights, dtype, device)? };

        let inner = match architecture {
            Architecture::Llama => {
                let llama_config: llama::LlamaConfig = serde_json::from_str(&config_str)?;
                let config = llama_config.into_config(false);
                let model = llama::Llama::load(vb, &config)
                    .context("Failed to create Llama model")?;
                let cache = llama::Cache::new(true, dtype, &config, device)?;
                Inner::Llama {
                    model,
                    cache,
                    config,
                }
            }
            Architecture::Mistral => {
                let config: mistral::Config = serde_json::from_str(&config_str)?;
                Inner::Mistral(
                    mistral::Model::new(&config, vb).context("Failed to create Mistral model")?,
                )
            }
            Architecture::Qwen2 => {
                let config: qwen2::Config = serde_json::from_str(&config_str)?;
                Inner::Qwen2(
                    qwen2::ModelForCausalLM::new(&config, vb)
                        .context("Failed to create Qwen2 model")?,
                )
            }
            Architecture::Qwen3 => {
                let config: qwen3::Config = serde_json::from_str(&config_str)?;
                Inner::Qwen3(
                    qwen3::ModelForCausalLM::new(&config, vb)
                        .context("Failed to create Qwen3 model")?,
                )
            }
        };

        debug!("Reference model ready on {:?}", device);

        Ok(Self {
            inner,
            architecture,
            dtype,
            device: device.clone(),
        })
    }

    /// Model family
    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    /// Weight dtype
    pub fn dtype(&self) -> DType {
        self.dtype
    }
}

impl CausalLm for ReferenceModel {
    fn forward(&mut self, input_ids: &Tensor, seqlen_offset: usize) -> Result<Tensor> {
        let logits = match &mut self.inner {
            Inner::Llama { model, cache, .. } => model.forward(input_ids, seqlen_offset, cache)?,
            Inner::Mistral(m) => m.forward(input_ids, seqlen_offset)?,
            Inner::Qwen2(m) => m.forward(input_ids, seqlen_offset)?,
            Inner::Qwen3(m) => m.forward(input_ids, seqlen_offset)?,
        };

        // (1, vocab) for llama, (1, 1, vocab) for the others
        Ok(logits.flatten_all()?.to_dtype(DType::F32)?)
    }

    fn clear_kv_cache(&mut self) -> Result<()> {
        match &mut self.inner {
            Inner::Llama { cache, config, .. } => {
                *cache = llama::Cache::new(true, self.dtype, config, &self.device)?;
            }
            Inner::Mistral(m) => m.clear_kv_cache(),
            Inner::Qwen2(m) => m.clear_kv_cache(),
            Inner::Qwen3(m) => m.clear_kv_cache(),
        }
        Ok(())
    }

    fn device(&self) -> &Device {
        &self.device
    }
}
