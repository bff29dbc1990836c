use once_cell::sync::Lazy;
use regex::Regex;

use super::{Sentence, SentenceTokenizer, TokenizerConfig};

/// Text up to and including a run of Chinese or Latin sentence-final punctuation.
static MIXED_SENTENCE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^。！？.!?]+[。！？.!?]+").expect("sentence pattern is valid"));

/// Sentence splitter for text that mixes Chinese and Latin scripts.
#[derive(Debug, Clone, Default)]
pub struct MixedLanguageTokenizer {
    config: TokenizerConfig,
}

impl MixedLanguageTokenizer {
    pub fn new(config: TokenizerConfig) -> Self {
        Self { config }
    }
}

impl SentenceTokenizer for MixedLanguageTokenizer {
    fn split_sentences(&self, text: &str) -> Vec<Sentence> {
        let mut sentences = Vec::new();
        let mut position = 0;

        for found in MIXED_SENTENCE_PATTERN.find_iter(text) {
            // Punctuation that precedes the match (e.g. a leading "。") travels with it
            sentences.push(Sentence {
                text: text[position..found.end()].to_string(),
                start: position,
                end: found.end(),
            });
            position = found.end();
        }

        if self.config.retain_format && position < text.len() {
            sentences.push(Sentence {
                text: text[position..].to_string(),
                start: position,
                end: text.len(),
            });
        }

        sentences
    }
}
