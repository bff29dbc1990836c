use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

use super::{SentenceTokenizer, TokenizerConfig, TokenizerError};

#[derive(Default)]
struct BufferState {
    /// Text not yet split into sentences
    input: String,
    /// Complete sentences waiting to reach `min_sentence_len`
    pending: String,
    ready: VecDeque<String>,
    ended: bool,
}

/// Incremental sentence stream.
///
/// Text is buffered until at least `stream_context_len` characters are
/// available and the splitter finds more than one sentence; the last sentence
/// is always held back because more text may still extend it. `flush` forces
/// everything buffered out as one boundary, and `end_input` additionally
/// terminates the sequence. Short sentences are merged with the next one,
/// never dropped.
///
/// One producer and one consumer may use the stream concurrently through a
/// shared reference.
pub struct SentenceStream {
    tokenizer: Arc<dyn SentenceTokenizer>,
    config: TokenizerConfig,
    state: Mutex<BufferState>,
    available: Notify,
}

impl SentenceStream {
    pub fn new(tokenizer: Arc<dyn SentenceTokenizer>, config: TokenizerConfig) -> Self {
        Self {
            tokenizer,
            config,
            state: Mutex::new(BufferState::default()),
            available: Notify::new(),
        }
    }

    pub fn push_text(&self, text: &str) -> Result<(), TokenizerError> {
        let emitted = {
            let mut state = self.state.lock();
            if state.ended {
                return Err(TokenizerError::InputEnded);
            }
            state.input.push_str(text);
            if state.input.chars().count() < self.config.stream_context_len {
                return Ok(());
            }
            self.split_complete(&mut state)
        };
        if emitted {
            self.available.notify_one();
        }
        Ok(())
    }

    /// Emit everything buffered as a token boundary without ending the stream.
    pub fn flush(&self) -> Result<(), TokenizerError> {
        let emitted = {
            let mut state = self.state.lock();
            if state.ended {
                return Err(TokenizerError::InputEnded);
            }
            Self::drain_all(&mut state)
        };
        if emitted {
            self.available.notify_one();
        }
        Ok(())
    }

    /// Flush and terminate. Calling it again is a no-op.
    ///
    /// Returns `true` only for the call that actually ended the input.
    pub fn end_input(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.ended {
                debug!("end_input called on an already ended sentence stream");
                return false;
            }
            Self::drain_all(&mut state);
            state.ended = true;
        }
        self.available.notify_one();
        true
    }

    pub fn is_ended(&self) -> bool {
        self.state.lock().ended
    }

    /// Next token, waiting for more input if necessary.
    ///
    /// Returns `None` once input has ended and every token has been taken.
    pub async fn next_token(&self) -> Option<String> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(token) = state.ready.pop_front() {
                    return Some(token);
                }
                if state.ended {
                    return None;
                }
            }
            self.available.notified().await;
        }
    }

    /// Move every sentence except the last one out of the input buffer.
    fn split_complete(&self, state: &mut BufferState) -> bool {
        let mut emitted = false;
        loop {
            let sentences = self.tokenizer.split_sentences(&state.input);
            if sentences.len() <= 1 {
                break;
            }
            let first = &sentences[0];
            state.pending.push_str(&first.text);
            let consumed = first.end;
            state.input.drain(..consumed);

            if state.pending.trim().chars().count() >= self.config.min_sentence_len {
                let token = state.pending.trim().to_string();
                state.pending.clear();
                state.ready.push_back(token);
                emitted = true;
            }
        }
        emitted
    }

    fn drain_all(state: &mut BufferState) -> bool {
        let input = std::mem::take(&mut state.input);
        state.pending.push_str(&input);
        let token = state.pending.trim().to_string();
        state.pending.clear();
        if token.is_empty() {
            return false;
        }
        state.ready.push_back(token);
        true
    }
}
