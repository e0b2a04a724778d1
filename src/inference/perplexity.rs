//! Teacher-forced token scoring
//!
//! Computes the mean negative log-likelihood of a token sequence under a
//! causal LM, with labels shifted by one position: the logits produced at
//! position `i` are scored against token `i + 1`.

use anyhow::Result;
use candle_core::{Tensor, D};

use crate::models::CausalLm;

/// Negative log-likelihood of a token sequence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenScore {
    /// Length of the scored sequence
    pub num_tokens: usize,
    /// Sum of per-token NLL over the predicted positions
    pub total_nll: f64,
    /// Mean NLL per predicted token (NaN when nothing was predicted)
    pub loss: f64,
}

impl TokenScore {
    /// Number of positions that contributed to the loss
    pub fn num_predicted(&self) -> usize {
        self.num_tokens.saturating_sub(1)
    }

    /// `exp(loss)`
    pub fn perplexity(&self) -> f64 {
        self.loss.exp()
    }
}

/// Score `ids` under `model`.
///
/// The KV cache is cleared first, then the sequence is fed one token at a
/// time. The candle-transformers models only return logits for the last
/// position, so scoring every position takes L-1 forward steps rather than
/// one pass over the whole sequence. A single-token sequence has no
/// prediction to score and yields a NaN loss.
pub fn score_tokens(model: &mut dyn CausalLm, ids: &[u32]) -> Result<TokenScore> {
    if ids.is_empty() {
        anyhow::bail!("Cannot score an empty token sequence");
    }

    model.clear_kv_cache()?;
    let device = model.device().clone();

    let mut total_nll = 0.0f64;
    for (pos, pair) in ids.windows(2).enumerate() {
        let input = Tensor::new(&pair[..1], &device)?.unsqueeze(0)?;
        let logits = model.forward(&input, pos)?;
        total_nll += token_nll(&logits, pair[1])?;
    }

    let predicted = ids.len() - 1;
    let loss = if predicted == 0 {
        f64::NAN
    } else {
        total_nll / predicted as f64
    };

    Ok(TokenScore {
        num_tokens: ids.len(),
        total_nll,
        loss,
    })
}

/// `-log softmax(logits)[target]` for one position
fn token_nll(logits: &Tensor, target: u32) -> Result<f64> {
    let vocab_size = logits.dim(D::Minus1)?;
    if target as usize >= vocab_size {
        anyhow::bail!(
            "Token id {} is outside the model vocabulary ({})",
            target,
            vocab_size
        );
    }

    let log_probs = candle_nn::ops::log_softmax(logits, D::Minus1)?;
    let log_prob = log_probs.get(target as usize)?.to_scalar::<f32>()?;
    Ok(-(log_prob as f64))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use candle_core::{DType, Device};

    /// Emits the same logits at every position
    pub(crate) struct ConstantLm {
        pub logits: Vec<f32>,
        pub device: Device,
        pub offsets: Vec<usize>,
        pub clears: usize,
    }

    impl ConstantLm {
        pub(crate) fn uniform(vocab_size: usize) -> Self {
            Self::with_logits(vec![0.0; vocab_size])
        }

        pub(crate) fn with_logits(logits: Vec<f32>) -> Self {
            Self {
                logits,
                device: Device::Cpu,
                offsets: Vec::new(),
                clears: 0,
            }
        }
    }

    impl CausalLm for ConstantLm {
        fn forward(&mut self, input_ids: &Tensor, seqlen_offset: usize) -> Result<Tensor> {
            assert_eq!(input_ids.dims(), &[1, 1]);
            assert_eq!(input_ids.dtype(), DType::U32);
            self.offsets.push(seqlen_offset);
            Ok(Tensor::new(self.logits.as_slice(), &self.device)?)
        }

        fn clear_kv_cache(&mut self) -> Result<()> {
            self.clears += 1;
            self.offsets.clear();
            Ok(())
        }

        fn device(&self) -> &Device {
            &self.device
        }
    }

    /// Predicts `next[prev]` with a large margin
    pub(crate) struct SuccessorLm {
        pub vocab_size: usize,
        pub device: Device,
    }

    impl CausalLm for SuccessorLm {
        fn forward(&mut self, input_ids: &Tensor, _seqlen_offset: usize) -> Result<Tensor> {
            let prev = input_ids.flatten_all()?.to_vec1::<u32>()?[0] as usize;
            let mut logits = vec![-20.0f32; self.vocab_size];
            logits[(prev + 1) % self.vocab_size] = 20.0;
            Ok(Tensor::new(logits.as_slice(), &self.device)?)
        }

        fn clear_kv_cache(&mut self) -> Result<()> {
            Ok(())
        }

        fn device(&self) -> &Device {
            &self.device
        }
    }

    #[test]
    fn test_uniform_model_perplexity_is_vocab_size() {
        let mut model = ConstantLm::uniform(8);
        let score = score_tokens(&mut model, &[1, 2, 3, 4, 5]).unwrap();

        assert_eq!(score.num_tokens, 5);
        assert_eq!(score.num_predicted(), 4);
        assert!((score.loss - 8f64.ln()).abs() < 1e-5);
        assert!((score.perplexity() - 8.0).abs() < 1e-4);
    }

    #[test]
    fn test_positions_are_fed_in_order_after_clear() {
        let mut model = ConstantLm::uniform(4);
        score_tokens(&mut model, &[0, 1, 2, 3]).unwrap();
        assert_eq!(model.clears, 1);
        assert_eq!(model.offsets, vec![0, 1, 2]);

        score_tokens(&mut model, &[3, 2]).unwrap();
        assert_eq!(model.clears, 2);
        assert_eq!(model.offsets, vec![0]);
    }

    #[test]
    fn test_confident_model_has_low_perplexity() {
        let mut model = SuccessorLm {
            vocab_size: 6,
            device: Device::Cpu,
        };
        let score = score_tokens(&mut model, &[0, 1, 2, 3, 4, 5, 0]).unwrap();
        assert!(score.loss < 1e-6);
        assert!(score.perplexity() < 1.0 + 1e-5);
    }

    #[test]
    fn test_wrong_predictions_are_penalized() {
        let mut model = SuccessorLm {
            vocab_size: 6,
            device: Device::Cpu,
        };
        let good = score_tokens(&mut model, &[0, 1, 2]).unwrap();
        let bad = score_tokens(&mut model, &[0, 3, 5]).unwrap();
        assert!(bad.loss > good.loss + 10.0);
    }

    #[test]
    fn test_skewed_logits_match_hand_computed_nll() {
        // log_softmax([ln 3, 0]) = [ln 0.75, ln 0.25]
        let mut model = ConstantLm::with_logits(vec![3f32.ln(), 0.0]);
        let score = score_tokens(&mut model, &[0, 0, 1]).unwrap();
        let expected = (-(0.75f64.ln()) - 0.25f64.ln()) / 2.0;
        assert!((score.loss - expected).abs() < 1e-5);
        assert!((score.total_nll - 2.0 * expected).abs() < 1e-5);
    }

    #[test]
    fn test_single_token_has_nan_loss() {
        let mut model = ConstantLm::uniform(4);
        let score = score_tokens(&mut model, &[2]).unwrap();
        assert!(score.loss.is_nan());
        assert!(score.perplexity().is_nan());
        assert!(model.offsets.is_empty());
    }

    #[test]
    fn test_empty_sequence_is_an_error() {
        let mut model = ConstantLm::uniform(4);
        assert!(score_tokens(&mut model, &[]).is_err());
    }

    #[test]
    fn test_out_of_vocab_target_is_an_error() {
        let mut model = ConstantLm::uniform(4);
        let err = score_tokens(&mut model, &[0, 9]).unwrap_err();
        assert!(err.to_string().contains("outside the model vocabulary"));
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let mut model = ConstantLm::with_logits(vec![0.5, -1.0, 2.0, 0.0]);
        let first = score_tokens(&mut model, &[0, 2, 1, 3, 2]).unwrap();
        let second = score_tokens(&mut model, &[0, 2, 1, 3, 2]).unwrap();
        assert_eq!(first, second);
    }
}
