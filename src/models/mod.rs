//! Reference language models
//!
//! This module contains everything needed to get next-token logits out of a
//! reference checkpoint:
//! - Model file resolution (local snapshot or HuggingFace Hub)
//! - Family dispatch over candle-transformers (Llama, Mistral, Qwen2, Qwen3)
//! - The `CausalLm` seam the perplexity oracle scores through

mod files;
mod reference;

use anyhow::Result;
use candle_core::{Device, Tensor};

pub use files::ModelFiles;
pub use reference::{Architecture, ReferenceModel};

/// Autoregressive language model with an internal KV cache
pub trait CausalLm {
    /// Run `input_ids` (shape `(1, seq_len)`, u32) starting at position
    /// `seqlen_offset` and return the f32 logits of the last position,
    /// shape `(vocab_size,)`.
    fn forward(&mut self, input_ids: &Tensor, seqlen_offset: usize) -> Result<Tensor>;

    /// Drop all cached keys/values so the next forward starts at position 0
    fn clear_kv_cache(&mut self) -> Result<()>;

    /// Device the model lives on; inputs are created there
    fn device(&self) -> &Device;
}
