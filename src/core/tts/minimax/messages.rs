//! WebSocket message types for the MiniMax T2A v2 API.
//!
//! - **Outgoing messages** ([`ClientMessage`]): `task_start`, `task_continue`, `task_finish`
//! - **Incoming messages** ([`ServerEvent`]): `connected_success`, `task_started`,
//!   audio-bearing `task_continued`, `task_failed` / `error`, `task_finished`
//!
//! All frames are JSON text frames keyed by `event`. Audio arrives hex-encoded
//! in `data.audio`; `is_final` marks the last chunk for the token that caused it.

use serde::{Deserialize, Serialize};

use super::config::{Emotion, SynthesisOptions};
use crate::core::tts::base::{TTSError, TTSResult};

// =============================================================================
// Outgoing Messages (Client to Server)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceSetting {
    pub voice_id: String,
    pub speed: f32,
    pub vol: f32,
    pub pitch: i32,
    pub emotion: Emotion,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioSetting {
    pub sample_rate: u32,
    pub bitrate: u32,
    pub format: &'static str,
    pub channel: u16,
}

/// Parameters of the session-start (`task_start`) message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStart {
    pub model: String,
    pub voice_setting: VoiceSetting,
    pub audio_setting: AudioSetting,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_boost: Option<String>,
}

impl TaskStart {
    pub fn from_options(options: &SynthesisOptions) -> Self {
        Self {
            model: options.model.clone(),
            voice_setting: VoiceSetting {
                voice_id: options.voice_id.clone(),
                speed: options.speed.unwrap_or(1.0),
                vol: options.volume.unwrap_or(1.0),
                pitch: options.pitch.unwrap_or(0),
                emotion: options.emotion.unwrap_or(Emotion::Neutral),
            },
            audio_setting: AudioSetting {
                sample_rate: options.sample_rate.as_u32(),
                bitrate: options.bitrate.as_u32(),
                format: "pcm",
                channel: options.channels.as_u16(),
            },
            language_boost: options.language.clone(),
        }
    }
}

/// Messages sent to the service as text frames.
///
/// # Example
///
/// ```rust
/// use minimax_tts::core::tts::minimax::ClientMessage;
///
/// let json = ClientMessage::TaskContinue { text: "Hello. ".into() }.to_json().unwrap();
/// assert_eq!(json, r#"{"event":"task_continue","text":"Hello. "}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientMessage {
    TaskStart(TaskStart),
    TaskContinue { text: String },
    TaskFinish,
}

impl ClientMessage {
    pub fn to_json(&self) -> TTSResult<String> {
        serde_json::to_string(self)
            .map_err(|e| TTSError::InternalError(format!("Failed to serialize message: {e}")))
    }
}

// =============================================================================
// Incoming Messages (Server to Client)
// =============================================================================

/// Error reported by the service, either as an explicit error event or as a
/// non-zero `base_resp.status_code` on any frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status_code: i64,
    pub message: String,
}

impl From<ApiError> for TTSError {
    fn from(err: ApiError) -> Self {
        TTSError::ProviderError {
            status_code: err.status_code,
            message: err.message,
        }
    }
}

/// Audio payload of a `task_continued` event.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Hex-encoded PCM; absent on pure `is_final` markers
    pub audio: Option<String>,
    pub is_final: bool,
}

impl AudioChunk {
    /// Decode the hex payload into raw PCM bytes.
    ///
    /// Returns `Ok(None)` when the event carries no audio.
    pub fn decode(&self) -> TTSResult<Option<Vec<u8>>> {
        match self.audio.as_deref() {
            None | Some("") => Ok(None),
            Some(hex_audio) => hex::decode(hex_audio)
                .map(Some)
                .map_err(|e| TTSError::AudioDecodeFailed(format!("invalid hex audio: {e}"))),
        }
    }
}

/// Events received from the service.
///
/// Use [`ServerEvent::parse()`] to deserialize incoming text frames.
///
/// | JSON `event` | Variant |
/// |--------------|---------|
/// | `"connected_success"` | `Connected` |
/// | `"task_started"` | `SessionStarted` |
/// | `"task_continued"` or absent, with `data.audio` / `is_final` | `Audio` |
/// | `"task_failed"` / `"error"`, or any non-zero `base_resp.status_code` | `Error` |
/// | `"task_finished"` | `SessionFinished` |
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connected { session_id: Option<String> },
    SessionStarted,
    Audio(AudioChunk),
    Error(ApiError),
    SessionFinished,
    /// Unknown event type (for forward compatibility)
    Unknown(String),
}

#[derive(Debug, Default, Deserialize)]
struct BaseResp {
    #[serde(default)]
    status_code: i64,
    #[serde(default)]
    status_msg: String,
}

#[derive(Debug, Default, Deserialize)]
struct AudioData {
    #[serde(default)]
    audio: Option<String>,
}

/// Superset of every incoming frame's fields.
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    data: Option<AudioData>,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    base_resp: Option<BaseResp>,
}

impl ServerEvent {
    /// Parse a WebSocket text frame.
    ///
    /// # Example
    ///
    /// ```rust
    /// use minimax_tts::core::tts::minimax::ServerEvent;
    ///
    /// let json = r#"{"event":"task_continued","data":{"audio":"0001"},"is_final":true}"#;
    /// let event = ServerEvent::parse(json).unwrap();
    /// assert!(event.is_final());
    /// ```
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawEvent = serde_json::from_str(text)?;
        let event = raw.event.as_deref().unwrap_or("");

        let base_resp = raw.base_resp.unwrap_or_default();
        let failed = matches!(event, "task_failed" | "error") || base_resp.status_code != 0;
        if failed {
            let message = raw
                .message
                .filter(|m| !m.is_empty())
                .or_else(|| (!base_resp.status_msg.is_empty()).then(|| base_resp.status_msg.clone()))
                .unwrap_or_else(|| "unknown error".to_string());
            return Ok(ServerEvent::Error(ApiError {
                status_code: base_resp.status_code,
                message,
            }));
        }

        match event {
            "connected_success" => Ok(ServerEvent::Connected {
                session_id: raw.session_id,
            }),
            "task_started" => Ok(ServerEvent::SessionStarted),
            "task_finished" => Ok(ServerEvent::SessionFinished),
            "task_continued" | "" if raw.data.is_some() || raw.is_final => {
                Ok(ServerEvent::Audio(AudioChunk {
                    audio: raw.data.and_then(|d| d.audio),
                    is_final: raw.is_final,
                }))
            }
            _ => Ok(ServerEvent::Unknown(text.to_string())),
        }
    }

    /// Short name used in logs and handshake errors.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected_success",
            ServerEvent::SessionStarted => "task_started",
            ServerEvent::Audio(_) => "task_continued",
            ServerEvent::Error(_) => "error",
            ServerEvent::SessionFinished => "task_finished",
            ServerEvent::Unknown(_) => "unknown",
        }
    }

    #[inline]
    pub fn is_final(&self) -> bool {
        matches!(self, ServerEvent::Audio(chunk) if chunk.is_final)
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, ServerEvent::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tts::minimax::config::{Channels, SampleRate};

    #[test]
    fn test_task_start_serialization() {
        let mut options = SynthesisOptions::new("key", "group");
        options.sample_rate = SampleRate::Hz24000;
        options.channels = Channels::Stereo;
        options.speed = Some(1.25);
        options.emotion = Some(Emotion::Happy);

        let json = ClientMessage::TaskStart(TaskStart::from_options(&options))
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["event"], "task_start");
        assert_eq!(value["model"], "speech-01-hd");
        assert_eq!(value["voice_setting"]["voice_id"], "female-shaoning");
        assert_eq!(value["voice_setting"]["speed"], 1.25);
        assert_eq!(value["voice_setting"]["vol"], 1.0);
        assert_eq!(value["voice_setting"]["pitch"], 0);
        assert_eq!(value["voice_setting"]["emotion"], "happy");
        assert_eq!(value["audio_setting"]["sample_rate"], 24000);
        assert_eq!(value["audio_setting"]["bitrate"], 128000);
        assert_eq!(value["audio_setting"]["format"], "pcm");
        assert_eq!(value["audio_setting"]["channel"], 2);
        assert!(value.get("language_boost").is_none());
    }

    #[test]
    fn test_task_start_defaults_emotion_to_neutral() {
        let options = SynthesisOptions::new("key", "group");
        let start = TaskStart::from_options(&options);
        assert_eq!(start.voice_setting.emotion, Emotion::Neutral);
    }

    #[test]
    fn test_task_finish_serialization() {
        assert_eq!(
            ClientMessage::TaskFinish.to_json().unwrap(),
            r#"{"event":"task_finish"}"#
        );
    }

    #[test]
    fn test_parse_connected() {
        let event = ServerEvent::parse(
            r#"{"event":"connected_success","session_id":"abc","base_resp":{"status_code":0,"status_msg":"success"}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ServerEvent::Connected {
                session_id: Some("abc".into())
            }
        );
    }

    #[test]
    fn test_parse_task_started() {
        let event = ServerEvent::parse(r#"{"event":"task_started"}"#).unwrap();
        assert_eq!(event, ServerEvent::SessionStarted);
    }

    #[test]
    fn test_parse_audio_chunk() {
        let event = ServerEvent::parse(
            r#"{"event":"task_continued","data":{"audio":"0a0b"},"is_final":false}"#,
        )
        .unwrap();
        match event {
            ServerEvent::Audio(chunk) => {
                assert!(!chunk.is_final);
                assert_eq!(chunk.decode().unwrap(), Some(vec![0x0a, 0x0b]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_final_marker_without_audio() {
        let event = ServerEvent::parse(r#"{"is_final":true,"data":{}}"#).unwrap();
        assert!(event.is_final());
        if let ServerEvent::Audio(chunk) = event {
            assert_eq!(chunk.decode().unwrap(), None);
        }
    }

    #[test]
    fn test_parse_task_failed() {
        let event = ServerEvent::parse(
            r#"{"event":"task_failed","base_resp":{"status_code":1004,"status_msg":"authorization failed"}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ServerEvent::Error(ApiError {
                status_code: 1004,
                message: "authorization failed".into()
            })
        );
    }

    #[test]
    fn test_parse_error_with_message() {
        let event = ServerEvent::parse(r#"{"event":"error","message":"rate limited"}"#).unwrap();
        assert!(event.is_error());
        if let ServerEvent::Error(err) = event {
            assert_eq!(err.message, "rate limited");
            assert_eq!(err.status_code, 0);
        }
    }

    #[test]
    fn test_non_zero_status_code_is_error() {
        let event = ServerEvent::parse(
            r#"{"event":"task_continued","data":{"audio":""},"base_resp":{"status_code":2013,"status_msg":"invalid text"}}"#,
        )
        .unwrap();
        assert!(event.is_error());
    }

    #[test]
    fn test_parse_unknown_event() {
        let event = ServerEvent::parse(r#"{"event":"heartbeat"}"#).unwrap();
        assert!(matches!(event, ServerEvent::Unknown(_)));
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(ServerEvent::parse("not json").is_err());
    }

    #[test]
    fn test_decode_invalid_hex() {
        let chunk = AudioChunk {
            audio: Some("zz".into()),
            is_final: false,
        };
        assert!(matches!(
            chunk.decode(),
            Err(TTSError::AudioDecodeFailed(_))
        ));
    }

    #[test]
    fn test_api_error_into_tts_error() {
        let err: TTSError = ApiError {
            status_code: 1002,
            message: "rate limit".into(),
        }
        .into();
        assert!(matches!(err, TTSError::ProviderError { status_code: 1002, .. }));
    }
}
