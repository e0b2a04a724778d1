//! Text processing modules
//!
//! - BPE / WordLevel tokenization of text to be scored

pub(crate) mod tokenizer;

pub use tokenizer::TextTokenizer;
