//! # TTS Base Types
//!
//! Shared vocabulary for the streaming synthesis client: the error taxonomy,
//! the audio frames and events handed to callers, and the [`AudioEmitter`]
//! contract that turns raw PCM into framed audio.
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use minimax_tts::core::tts::{AudioEmitter, TTSResult};
//!
//! struct CountingEmitter {
//!     bytes: usize,
//!     segments: usize,
//! }
//!
//! impl AudioEmitter for CountingEmitter {
//!     fn initialize(&mut self, _sample_rate: u32, _channels: u16, _streaming: bool) -> TTSResult<()> {
//!         Ok(())
//!     }
//!
//!     fn start_segment(&mut self, _segment_id: &str) {}
//!
//!     fn push(&mut self, pcm: &[u8]) {
//!         self.bytes += pcm.len();
//!     }
//!
//!     fn flush(&mut self) {
//!         self.segments += 1;
//!     }
//! }
//! ```

use bytes::Bytes;
use std::time::Duration;

/// TTS-specific error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TTSError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("Provider error (status {status_code}): {message}")]
    ProviderError { status_code: i64, message: String },

    #[error("Audio decode failed: {0}")]
    AudioDecodeFailed(String),

    #[error("Stream closed: {0}")]
    StreamClosed(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl TTSError {
    /// Transport-level failures: connect, handshake, send, receive or acquire timeout.
    ///
    /// These are the only errors a caller-side retry policy should retry.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            TTSError::ConnectionFailed(_) | TTSError::TimeoutError(_)
        )
    }

    /// Errors that are raised at construction time and never at stream time.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            TTSError::InvalidConfiguration(_) | TTSError::AuthenticationFailed(_)
        )
    }
}

/// Result type for TTS operations
pub type TTSResult<T> = Result<T, TTSError>;

/// One fixed-size frame of 16-bit little-endian PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub data: Bytes,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples_per_channel: u32,
    /// Segment (request) the frame belongs to
    pub segment_id: String,
}

impl AudioFrame {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples_per_channel as f64 / self.sample_rate as f64)
    }
}

/// Items yielded by a synthesis stream.
///
/// A fatal failure is not an event: it terminates the stream as a single `Err`.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    /// Framed PCM audio, in wire arrival order
    Frame(AudioFrame),
    /// All audio of one token has been delivered
    SegmentEnd { segment_id: String, sequence: u64 },
    /// Recoverable failure attributed to one token or chunk; the stream continues
    TokenError { token_index: Option<usize>, error: TTSError },
}

impl AudioEvent {
    #[inline]
    pub fn is_frame(&self) -> bool {
        matches!(self, AudioEvent::Frame(_))
    }

    #[inline]
    pub fn is_segment_end(&self) -> bool {
        matches!(self, AudioEvent::SegmentEnd { .. })
    }
}

/// Consumer of decoded PCM.
///
/// Owned by the synthesis stream for its whole lifetime. `flush` is called once
/// after every token's final chunk and exactly once more when the stream ends,
/// on success and failure alike.
pub trait AudioEmitter: Send {
    /// Called once before any audio is pushed.
    fn initialize(&mut self, sample_rate: u32, channels: u16, streaming: bool) -> TTSResult<()>;

    /// Called once per stream with the stream's request id.
    fn start_segment(&mut self, segment_id: &str);

    /// Raw 16-bit little-endian PCM, in wire arrival order.
    fn push(&mut self, pcm: &[u8]);

    /// Close the current logical segment, emitting any buffered audio.
    fn flush(&mut self);
}

impl AudioEmitter for Box<dyn AudioEmitter> {
    fn initialize(&mut self, sample_rate: u32, channels: u16, streaming: bool) -> TTSResult<()> {
        (**self).initialize(sample_rate, channels, streaming)
    }

    fn start_segment(&mut self, segment_id: &str) {
        (**self).start_segment(segment_id)
    }

    fn push(&mut self, pcm: &[u8]) {
        (**self).push(pcm)
    }

    fn flush(&mut self) {
        (**self).flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_classification() {
        assert!(TTSError::ConnectionFailed("reset".into()).is_connection_error());
        assert!(TTSError::TimeoutError("acquire".into()).is_connection_error());
        assert!(
            !TTSError::ProviderError {
                status_code: 1004,
                message: "auth".into()
            }
            .is_connection_error()
        );
        assert!(!TTSError::AudioDecodeFailed("odd".into()).is_connection_error());
    }

    #[test]
    fn test_configuration_error_classification() {
        assert!(TTSError::InvalidConfiguration("x".into()).is_configuration_error());
        assert!(TTSError::AuthenticationFailed("x".into()).is_configuration_error());
        assert!(!TTSError::ConnectionFailed("x".into()).is_configuration_error());
    }

    #[test]
    fn test_provider_error_display() {
        let err = TTSError::ProviderError {
            status_code: 2013,
            message: "invalid params".into(),
        };
        assert_eq!(
            err.to_string(),
            "Provider error (status 2013): invalid params"
        );
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame {
            data: Bytes::from(vec![0u8; 640]),
            sample_rate: 32000,
            channels: 1,
            samples_per_channel: 320,
            segment_id: "seg".into(),
        };
        assert_eq!(frame.duration(), Duration::from_millis(10));
    }
}
