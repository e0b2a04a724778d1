//! Perplexity-based text quality check
//!
//! Scores text produced by an exported model under a reference model and
//! accepts it when the perplexity does not exceed a ceiling.

use anyhow::{Context, Result};
use candle_core::DType;
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::OracleConfig;
use crate::models::{CausalLm, ModelFiles, ReferenceModel};
use crate::text::TextTokenizer;
use crate::utils::device_utils::select_device;

use super::perplexity::score_tokens;

/// Default perplexity ceiling
pub const DEFAULT_MAX_PERPLEXITY: f64 = 100.0;

/// Outcome of a perplexity check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityVerdict {
    /// Mean negative log-likelihood per predicted token
    pub loss: f64,
    /// `exp(loss)`
    pub perplexity: f64,
    /// Number of tokens the text encoded to
    pub num_tokens: usize,
    /// Ceiling the perplexity was checked against
    pub threshold: f64,
    /// `perplexity <= threshold`; false for a NaN perplexity
    pub passed: bool,
}

impl QualityVerdict {
    /// Build a verdict from a mean NLL
    pub fn from_loss(loss: f64, num_tokens: usize, threshold: f64) -> Self {
        let perplexity = loss.exp();
        Self {
            loss,
            perplexity,
            num_tokens,
            threshold,
            passed: perplexity <= threshold,
        }
    }

    /// Pass/fail log line; the threshold keeps its decimal point (`100.0`)
    pub fn log_message(&self) -> String {
        if self.passed {
            format!(
                "✓ Perplexity check passed: {:.2} <= {:?}",
                self.perplexity, self.threshold
            )
        } else {
            format!(
                "✗ Perplexity check failed: {:.2} > {:?}",
                self.perplexity, self.threshold
            )
        }
    }

    /// Emit the pass/fail log line
    pub fn log(&self) {
        if self.passed {
            info!("{}", self.log_message());
        } else {
            warn!("{}", self.log_message());
        }
    }
}

impl fmt::Display for QualityVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] perplexity={:.2} (threshold {:?}), loss={:.4}, tokens={}",
            if self.passed { "PASS" } else { "FAIL" },
            self.perplexity,
            self.threshold,
            self.loss,
            self.num_tokens
        )
    }
}

/// How the reference model is fetched and placed
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Hub revision; `None` for the default branch
    pub revision: Option<String>,
    /// Weight dtype
    pub dtype: DType,
    /// Place the model on CUDA when available
    pub use_gpu: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            revision: None,
            dtype: DType::F32,
            use_gpu: false,
        }
    }
}

impl LoadOptions {
    /// Take revision, dtype and device choice from an oracle config
    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        Ok(Self {
            revision: config.revision.clone(),
            dtype: config.weight_dtype()?,
            use_gpu: config.use_gpu,
        })
    }
}

/// Reference model plus tokenizer, loaded once and reusable across texts
pub struct PerplexityEvaluator {
    model_id: String,
    model: Box<dyn CausalLm>,
    tokenizer: TextTokenizer,
}

impl PerplexityEvaluator {
    /// Load the reference model and tokenizer named by `model_id`
    /// (Hub id or local snapshot directory).
    pub fn from_pretrained(model_id: &str, options: &LoadOptions) -> Result<Self> {
        let files = ModelFiles::resolve(model_id, options.revision.as_deref())?;
        let device = select_device(options.use_gpu)?;

        let model = ReferenceModel::load(&files, options.dtype, &device)
            .with_context(|| format!("Failed to load reference model '{}'", model_id))?;
        let tokenizer = TextTokenizer::load(&files.tokenizer)?;

        Ok(Self::new(model_id, Box::new(model), tokenizer))
    }

    /// Wrap an already loaded model and tokenizer
    pub fn new(model_id: &str, model: Box<dyn CausalLm>, tokenizer: TextTokenizer) -> Self {
        Self {
            model_id: model_id.to_string(),
            model,
            tokenizer,
        }
    }

    /// Model id this evaluator scores against
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Tokenize `text`, score it and compare the perplexity to `threshold`
    pub fn evaluate(&mut self, text: &str, threshold: f64) -> Result<QualityVerdict> {
        let ids = self.tokenizer.encode(text)?;
        debug!("Scoring {} tokens with '{}'", ids.len(), self.model_id);

        let score = score_tokens(self.model.as_mut(), &ids)?;
        let verdict = QualityVerdict::from_loss(score.loss, score.num_tokens, threshold);
        verdict.log();
        Ok(verdict)
    }
}

/// Check that `generated_text` reads as plausible text to the reference
/// model `model_id`: true iff its perplexity is at most
/// `max_perplexity_threshold` (use [`DEFAULT_MAX_PERPLEXITY`] when in doubt).
///
/// Loads the model on CPU in f32 from the Hub (or a local directory) on every
/// call. Loading, tokenization and forward failures are returned as-is.
pub fn check_causal_lm_output_quality(
    model_id: &str,
    generated_text: &str,
    max_perplexity_threshold: f64,
) -> Result<bool> {
    info!("Starting perplexity check with model '{}' ...", model_id);

    let mut evaluator = PerplexityEvaluator::from_pretrained(model_id, &LoadOptions::default())?;
    let verdict = evaluator.evaluate(generated_text, max_perplexity_threshold)?;
    Ok(verdict.passed)
}
