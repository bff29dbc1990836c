//! Per-stream bookkeeping of tokens sent but not yet answered.

use parking_lot::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingSnapshot {
    /// Tokens sent and still awaiting their final chunk or error
    pub pending: usize,
    pub sent: usize,
    pub completed: usize,
    /// Tokenization has ended and every token has been handed to the sender
    pub input_finished: bool,
}

impl PendingSnapshot {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.input_finished && self.pending == 0
    }
}

/// Counter shared by the send stage (increments) and the receive stage
/// (decrements). Never goes below zero.
#[derive(Debug, Default)]
pub struct PendingRequests {
    state: Mutex<PendingSnapshot>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a token about to be sent; returns its zero-based index.
    pub fn on_sent(&self) -> usize {
        let mut state = self.state.lock();
        let index = state.sent;
        state.sent += 1;
        state.pending += 1;
        index
    }

    /// Record the terminal response (final chunk or error) of the oldest
    /// outstanding token; returns that token's index.
    pub fn on_final(&self) -> Option<usize> {
        let mut state = self.state.lock();
        if state.pending == 0 {
            warn!(
                "Terminal response with no outstanding token (sent {}, completed {})",
                state.sent, state.completed
            );
            return None;
        }
        let index = state.completed;
        state.pending -= 1;
        state.completed += 1;
        Some(index)
    }

    /// Index of the token whose audio is currently arriving, if any.
    pub fn current_index(&self) -> Option<usize> {
        let state = self.state.lock();
        (state.pending > 0).then_some(state.completed)
    }

    pub fn finish_input(&self) {
        self.state.lock().input_finished = true;
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().is_complete()
    }

    pub fn snapshot(&self) -> PendingSnapshot {
        *self.state.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_up_and_down() {
        let pending = PendingRequests::new();
        assert_eq!(pending.on_sent(), 0);
        assert_eq!(pending.on_sent(), 1);
        assert_eq!(pending.current_index(), Some(0));

        assert_eq!(pending.on_final(), Some(0));
        assert_eq!(pending.current_index(), Some(1));
        assert_eq!(pending.on_final(), Some(1));
        assert_eq!(pending.current_index(), None);

        let snapshot = pending.snapshot();
        assert_eq!(snapshot.pending, 0);
        assert_eq!(snapshot.sent, 2);
        assert_eq!(snapshot.completed, 2);
    }

    #[test]
    fn test_never_negative() {
        let pending = PendingRequests::new();
        assert_eq!(pending.on_final(), None);
        assert_eq!(pending.snapshot().pending, 0);
        assert_eq!(pending.snapshot().completed, 0);
    }

    #[test]
    fn test_complete_requires_finished_input_and_zero_pending() {
        let pending = PendingRequests::new();
        assert!(!pending.is_complete());

        pending.on_sent();
        pending.finish_input();
        assert!(!pending.is_complete());

        pending.on_final();
        assert!(pending.is_complete());
    }

    #[test]
    fn test_finished_without_tokens_is_complete() {
        let pending = PendingRequests::new();
        pending.finish_input();
        assert!(pending.is_complete());
    }
}
