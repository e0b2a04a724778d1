//! Perplexity oracle
//!
//! This module scores text with a reference causal LM:
//! - score_tokens: teacher-forced mean negative log-likelihood
//! - PerplexityEvaluator: reference model + tokenizer, reusable across texts
//! - check_causal_lm_output_quality: one-shot pass/fail check

pub(crate) mod perplexity;
mod quality;

pub use perplexity::{score_tokens, TokenScore};
pub use quality::{
    check_causal_lm_output_quality, LoadOptions, PerplexityEvaluator, QualityVerdict,
    DEFAULT_MAX_PERPLEXITY,
};
