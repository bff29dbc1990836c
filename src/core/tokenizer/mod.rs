//! Sentence tokenization for streaming synthesis.
//!
//! - [`MixedLanguageTokenizer`]: splits mixed CJK/Latin text on sentence-final
//!   punctuation of both scripts
//! - [`SentenceStream`]: incremental adapter that buffers pushed text and yields
//!   sentence-sized tokens lazily, in order, exactly once

mod mixed;
mod stream;

pub use mixed::MixedLanguageTokenizer;
pub use stream::SentenceStream;

/// A sentence found in a text buffer, with byte offsets into that buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Splits a text buffer into sentences.
///
/// Implementations must cover the whole input when `retain_format` is set:
/// concatenating the returned sentences in order reproduces the text from the
/// first sentence's start to the end of the buffer.
pub trait SentenceTokenizer: Send + Sync {
    fn split_sentences(&self, text: &str) -> Vec<Sentence>;
}

#[derive(Debug, Clone)]
pub struct TokenizerConfig {
    /// Tokens shorter than this (in characters) are merged with the next one
    pub min_sentence_len: usize,
    /// Characters buffered before attempting to split
    pub stream_context_len: usize,
    /// Keep trailing text without sentence-final punctuation as a sentence
    pub retain_format: bool,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            min_sentence_len: 3,
            stream_context_len: 5,
            retain_format: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenizerError {
    #[error("input already ended")]
    InputEnded,
}
