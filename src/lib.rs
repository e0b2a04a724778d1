//! # exported-lm-oracle
//!
//! Test oracles for validating exported/optimized causal language models
//! against a reference implementation.
//!
//! ## Features
//!
//! - Perplexity check: score generated text under a reference model
//!   (Llama, Mistral, Qwen2, Qwen3 via Candle) and compare to a ceiling
//! - Recursive closeness check over nested outputs (tensors, sequences,
//!   mappings), with torch-style `assert_close` leaves
//! - Golden dump loading from safetensors files or `.npy` directories
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use exported_lm_oracle::{check_causal_lm_output_quality, DEFAULT_MAX_PERPLEXITY};
//!
//! let ok = check_causal_lm_output_quality(
//!     "HuggingFaceTB/SmolLM2-135M",
//!     "Simply put, the theory of relativity states that",
//!     DEFAULT_MAX_PERPLEXITY,
//! )?;
//! assert!(ok);
//! ```

// Require docs for public items, but not struct fields (too verbose)
#![warn(missing_docs)]
#![allow(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod inference;
pub mod models;
pub mod text;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::OracleConfig;
pub use inference::{
    check_causal_lm_output_quality, PerplexityEvaluator, QualityVerdict, DEFAULT_MAX_PERPLEXITY,
};
pub use validation::{check_close_recursively, CloseError, Outputs, DEFAULT_ATOL, DEFAULT_RTOL};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
