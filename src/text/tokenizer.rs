//! Tokenization
//!
//! Wrapper around HuggingFace tokenizers for turning generated text into the
//! token-id sequence the reference model scores.

use anyhow::{Context, Result};
use std::path::Path;
use tokenizers::Tokenizer;

/// Tokenizer of the reference model
pub struct TextTokenizer {
    /// Underlying HuggingFace tokenizer
    tokenizer: Tokenizer,
}

impl TextTokenizer {
    /// Load tokenizer from a `tokenizer.json` file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))
            .with_context(|| format!("Tokenizer file: {:?}", path))?;

        Ok(Self { tokenizer })
    }

    /// Build tokenizer from the bytes of a serialized `tokenizer.json`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let tokenizer = Tokenizer::from_bytes(bytes)
            .map_err(|e| anyhow::anyhow!("Failed to parse tokenizer: {}", e))?;

        Ok(Self { tokenizer })
    }

    /// Encode text into token ids, adding the model's special tokens
    /// (BOS etc.) the same way the tokenizer does by default.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;

        Ok(encoding.get_ids().to_vec())
    }

    /// Decode token ids back to text
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| anyhow::anyhow!("Decoding failed: {}", e))
    }

    /// Vocabulary size including added tokens
    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    /// Look up the id of a single token
    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.tokenizer.token_to_id(token)
    }
}

/// Minimal WordLevel tokenizer used by tests across the crate
#[cfg(test)]
pub(crate) fn word_level_json(words: &[&str]) -> String {
    let vocab: Vec<String> = std::iter::once("[UNK]")
        .chain(words.iter().copied())
        .enumerate()
        .map(|(id, word)| format!("\"{}\": {}", word, id))
        .collect();

    format!(
        r#"{{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [],
  "normalizer": null,
  "pre_tokenizer": {{ "type": "Whitespace" }},
  "post_processor": null,
  "decoder": null,
  "model": {{ "type": "WordLevel", "vocab": {{ {} }}, "unk_token": "[UNK]" }}
}}"#,
        vocab.join(", ")
    )
}
