//! Configuration types for the MiniMax T2A v2 WebSocket API.
//!
//! This module contains:
//! - The enumerated audio parameters the service accepts
//! - [`SynthesisOptions`], the immutable per-client configuration
//! - Pool, retry and per-stream tuning ([`PoolConfig`], [`ConnectOptions`], [`StreamConfig`])
//! - Credential validation and WebSocket URL construction

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::core::tokenizer::TokenizerConfig;
use crate::core::tts::base::{TTSError, TTSResult};

pub const DEFAULT_BASE_URL: &str = "https://api.minimaxi.chat";
pub const DEFAULT_MODEL: &str = "speech-01-hd";
pub const DEFAULT_VOICE_ID: &str = "female-shaoning";
pub const WEBSOCKET_PATH: &str = "/ws/v1/t2a_v2";
pub const GROUP_ID_PARAM: &str = "GroupId";

/// Keys that are obviously copied from a template rather than issued by the service.
const PLACEHOLDER_API_KEYS: &[&str] = &["your_api_key", "placeholder", "test"];

// =============================================================================
// Audio Parameters
// =============================================================================

/// Output sample rates accepted by the service (Hz).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleRate {
    Hz8000,
    Hz16000,
    Hz22050,
    Hz24000,
    #[default]
    Hz32000,
    Hz44100,
}

impl SampleRate {
    pub const ALL: [SampleRate; 6] = [
        SampleRate::Hz8000,
        SampleRate::Hz16000,
        SampleRate::Hz22050,
        SampleRate::Hz24000,
        SampleRate::Hz32000,
        SampleRate::Hz44100,
    ];

    #[inline]
    pub fn as_u32(&self) -> u32 {
        match self {
            Self::Hz8000 => 8000,
            Self::Hz16000 => 16000,
            Self::Hz22050 => 22050,
            Self::Hz24000 => 24000,
            Self::Hz32000 => 32000,
            Self::Hz44100 => 44100,
        }
    }
}

impl TryFrom<u32> for SampleRate {
    type Error = TTSError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|rate| rate.as_u32() == value)
            .ok_or_else(|| {
                TTSError::InvalidConfiguration(format!(
                    "Unsupported sample rate: {value}. Supported rates: 8000, 16000, 22050, 24000, 32000, 44100"
                ))
            })
    }
}

/// Output bitrates accepted by the service (bps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Bitrate {
    Bps32000,
    Bps64000,
    #[default]
    Bps128000,
    Bps256000,
}

impl Bitrate {
    #[inline]
    pub fn as_u32(&self) -> u32 {
        match self {
            Self::Bps32000 => 32_000,
            Self::Bps64000 => 64_000,
            Self::Bps128000 => 128_000,
            Self::Bps256000 => 256_000,
        }
    }
}

impl TryFrom<u32> for Bitrate {
    type Error = TTSError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            32_000 => Ok(Self::Bps32000),
            64_000 => Ok(Self::Bps64000),
            128_000 => Ok(Self::Bps128000),
            256_000 => Ok(Self::Bps256000),
            other => Err(TTSError::InvalidConfiguration(format!(
                "Unsupported bitrate: {other}. Supported bitrates: 32000, 64000, 128000, 256000"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Channels {
    #[default]
    Mono,
    Stereo,
}

impl Channels {
    #[inline]
    pub fn as_u16(&self) -> u16 {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
        }
    }
}

impl TryFrom<u16> for Channels {
    type Error = TTSError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Mono),
            2 => Ok(Self::Stereo),
            other => Err(TTSError::InvalidConfiguration(format!(
                "Unsupported channel count: {other}. Must be 1 or 2"
            ))),
        }
    }
}

/// Voice emotion presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Neutral,
    Happy,
    Angry,
    Sad,
    Fear,
    Disgust,
    Surprise,
}

impl Emotion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Happy => "happy",
            Self::Angry => "angry",
            Self::Sad => "sad",
            Self::Fear => "fear",
            Self::Disgust => "disgust",
            Self::Surprise => "surprise",
        }
    }
}

impl FromStr for Emotion {
    type Err = TTSError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "neutral" => Ok(Self::Neutral),
            "happy" => Ok(Self::Happy),
            "angry" => Ok(Self::Angry),
            "sad" => Ok(Self::Sad),
            "fear" => Ok(Self::Fear),
            "disgust" => Ok(Self::Disgust),
            "surprise" => Ok(Self::Surprise),
            other => Err(TTSError::InvalidConfiguration(format!(
                "Unknown emotion '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Synthesis Options
// =============================================================================

/// Per-client synthesis configuration.
///
/// Validated once by [`SynthesisOptions::validate`] when the client is built;
/// streams only ever see a validated snapshot.
#[derive(Clone)]
pub struct SynthesisOptions {
    pub model: String,
    pub voice_id: String,
    pub sample_rate: SampleRate,
    pub bitrate: Bitrate,
    pub channels: Channels,
    /// Speaking rate, 0.5 to 2.0
    pub speed: Option<f32>,
    /// Volume, greater than 0 and at most 10
    pub volume: Option<f32>,
    /// Pitch shift in semitones, -12 to 12
    pub pitch: Option<i32>,
    pub emotion: Option<Emotion>,
    /// Sent as `language_boost`
    pub language: Option<String>,
    pub api_key: String,
    pub group_id: String,
    pub base_url: String,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice_id: DEFAULT_VOICE_ID.to_string(),
            sample_rate: SampleRate::default(),
            bitrate: Bitrate::default(),
            channels: Channels::default(),
            speed: None,
            volume: None,
            pitch: None,
            emotion: None,
            language: None,
            api_key: String::new(),
            group_id: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl fmt::Debug for SynthesisOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesisOptions")
            .field("model", &self.model)
            .field("voice_id", &self.voice_id)
            .field("sample_rate", &self.sample_rate)
            .field("bitrate", &self.bitrate)
            .field("channels", &self.channels)
            .field("speed", &self.speed)
            .field("volume", &self.volume)
            .field("pitch", &self.pitch)
            .field("emotion", &self.emotion)
            .field("language", &self.language)
            .field("api_key", &"<redacted>")
            .field("group_id", &self.group_id)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl SynthesisOptions {
    pub fn new(api_key: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            group_id: group_id.into(),
            ..Default::default()
        }
    }

    /// Validate credentials, endpoint and voice parameters.
    ///
    /// Missing values yield [`TTSError::InvalidConfiguration`]; credentials that are
    /// present but unusable yield [`TTSError::AuthenticationFailed`].
    pub fn validate(&self) -> TTSResult<()> {
        let key = strip_bearer(&self.api_key);
        if key.is_empty() {
            return Err(TTSError::InvalidConfiguration(
                "MiniMax API key is required (set MINIMAX_API_KEY)".to_string(),
            ));
        }
        if PLACEHOLDER_API_KEYS.contains(&key) {
            return Err(TTSError::AuthenticationFailed(
                "MiniMax API key looks like a placeholder".to_string(),
            ));
        }
        if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(TTSError::AuthenticationFailed(
                "MiniMax API key contains whitespace or control characters".to_string(),
            ));
        }

        let group_id = self.group_id.trim();
        if group_id.is_empty() {
            return Err(TTSError::InvalidConfiguration(
                "MiniMax group id is required (set MINIMAX_GROUP_ID)".to_string(),
            ));
        }
        if group_id.chars().any(char::is_whitespace) {
            return Err(TTSError::AuthenticationFailed(
                "MiniMax group id contains whitespace".to_string(),
            ));
        }

        if self.model.trim().is_empty() {
            return Err(TTSError::InvalidConfiguration(
                "Model identifier is required".to_string(),
            ));
        }
        if self.voice_id.trim().is_empty() {
            return Err(TTSError::InvalidConfiguration(
                "Voice identifier is required".to_string(),
            ));
        }

        if let Some(speed) = self.speed
            && !(0.5..=2.0).contains(&speed)
        {
            return Err(TTSError::InvalidConfiguration(format!(
                "speed must be between 0.5 and 2.0, got {speed}"
            )));
        }
        if let Some(volume) = self.volume
            && !(volume > 0.0 && volume <= 10.0)
        {
            return Err(TTSError::InvalidConfiguration(format!(
                "volume must be in (0, 10], got {volume}"
            )));
        }
        if let Some(pitch) = self.pitch
            && !(-12..=12).contains(&pitch)
        {
            return Err(TTSError::InvalidConfiguration(format!(
                "pitch must be between -12 and 12, got {pitch}"
            )));
        }
        if let Some(language) = &self.language
            && language.trim().is_empty()
        {
            return Err(TTSError::InvalidConfiguration(
                "language must not be blank when set".to_string(),
            ));
        }

        self.websocket_url().map(|_| ())
    }

    /// `Authorization` header value: exactly one `Bearer ` prefix.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", strip_bearer(&self.api_key))
    }

    /// Build the WebSocket endpoint from `base_url`.
    ///
    /// `http(s)` is rewritten to `ws(s)`; the group id is sent as the `GroupId`
    /// query parameter.
    pub fn websocket_url(&self) -> TTSResult<Url> {
        let base = self.base_url.trim().trim_end_matches('/');
        let mut url = Url::parse(base).map_err(|e| {
            TTSError::InvalidConfiguration(format!("Invalid base URL '{base}': {e}"))
        })?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(TTSError::InvalidConfiguration(format!(
                    "Unsupported base URL scheme '{other}'"
                )));
            }
        };
        url.set_scheme(scheme).map_err(|_| {
            TTSError::InvalidConfiguration(format!("Cannot use scheme {scheme} for {base}"))
        })?;

        let path = format!("{}{}", url.path().trim_end_matches('/'), WEBSOCKET_PATH);
        url.set_path(&path);
        url.query_pairs_mut()
            .append_pair(GROUP_ID_PARAM, self.group_id.trim());
        Ok(url)
    }

    /// Apply an update, returning a new snapshot. `self` is left untouched.
    pub fn with_update(&self, update: &OptionsUpdate) -> Self {
        let mut next = self.clone();
        if let Some(model) = &update.model {
            next.model = model.clone();
        }
        if let Some(voice_id) = &update.voice_id {
            next.voice_id = voice_id.clone();
        }
        if let Some(speed) = update.speed {
            next.speed = Some(speed);
        }
        if let Some(emotion) = update.emotion {
            next.emotion = Some(emotion);
        }
        if let Some(language) = &update.language {
            next.language = Some(language.clone());
        }
        next
    }
}

fn strip_bearer(key: &str) -> &str {
    let key = key.trim();
    key.strip_prefix("Bearer ").unwrap_or(key).trim()
}

/// Session parameters that may change over a client's lifetime.
///
/// Only affects sessions started after the update.
#[derive(Debug, Clone, Default)]
pub struct OptionsUpdate {
    pub model: Option<String>,
    pub voice_id: Option<String>,
    pub speed: Option<f32>,
    pub emotion: Option<Emotion>,
    pub language: Option<String>,
}

// =============================================================================
// Pool, Retry and Stream Tuning
// =============================================================================

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections are retired before reaching this age. Must stay below the
    /// service's own 120 s session timeout.
    pub max_session_duration: Duration,
    /// Reset `last_refreshed` whenever a connection is handed out
    pub mark_refreshed_on_get: bool,
    /// Idle connections kept beyond this count are closed on release
    pub max_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_session_duration: Duration::from_secs(100),
            mark_refreshed_on_get: true,
            max_idle: 4,
        }
    }
}

/// Caller-side retry policy for acquiring a connection.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Budget for one acquire, including connect and handshake
    pub timeout: Duration,
    /// Additional attempts after the first one
    pub max_retry: u32,
    pub retry_interval: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retry: 3,
            retry_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Wait for outstanding `is_final` markers after input ends before forcing completion
    pub completion_grace: Duration,
    /// Duration of each emitted audio frame
    pub frame_duration: Duration,
    pub tokenizer: TokenizerConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            completion_grace: Duration::from_secs(5),
            frame_duration: Duration::from_millis(10),
            tokenizer: TokenizerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> SynthesisOptions {
        SynthesisOptions::new("sk-live-123", "1899")
    }

    #[test]
    fn test_defaults() {
        let opts = SynthesisOptions::default();
        assert_eq!(opts.model, "speech-01-hd");
        assert_eq!(opts.voice_id, "female-shaoning");
        assert_eq!(opts.sample_rate.as_u32(), 32000);
        assert_eq!(opts.bitrate.as_u32(), 128_000);
        assert_eq!(opts.channels.as_u16(), 1);
    }

    #[test]
    fn test_valid_options_pass() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_missing_api_key_is_configuration_error() {
        let opts = SynthesisOptions::new("   ", "1899");
        assert!(matches!(
            opts.validate(),
            Err(TTSError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_placeholder_keys_rejected() {
        for key in ["your_api_key", "placeholder", "test", "Bearer test"] {
            let opts = SynthesisOptions::new(key, "1899");
            assert!(
                matches!(opts.validate(), Err(TTSError::AuthenticationFailed(_))),
                "{key} should be rejected"
            );
        }
    }

    #[test]
    fn test_missing_group_id_rejected() {
        let opts = SynthesisOptions::new("sk-live-123", "");
        assert!(matches!(
            opts.validate(),
            Err(TTSError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_bearer_prefix_normalized() {
        let plain = SynthesisOptions::new("abc", "1");
        let prefixed = SynthesisOptions::new("Bearer abc", "1");
        assert_eq!(plain.authorization_header(), "Bearer abc");
        assert_eq!(prefixed.authorization_header(), "Bearer abc");
    }

    #[test]
    fn test_websocket_url() {
        let url = valid().websocket_url().unwrap();
        assert_eq!(
            url.as_str(),
            "wss://api.minimaxi.chat/ws/v1/t2a_v2?GroupId=1899"
        );

        let mut local = valid();
        local.base_url = "http://127.0.0.1:9000/".to_string();
        assert_eq!(
            local.websocket_url().unwrap().as_str(),
            "ws://127.0.0.1:9000/ws/v1/t2a_v2?GroupId=1899"
        );
    }

    #[test]
    fn test_websocket_url_rejects_unknown_scheme() {
        let mut opts = valid();
        opts.base_url = "ftp://example.com".to_string();
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_out_of_range_voice_parameters() {
        let mut opts = valid();
        opts.speed = Some(2.5);
        assert!(opts.validate().is_err());

        let mut opts = valid();
        opts.pitch = Some(13);
        assert!(opts.validate().is_err());

        let mut opts = valid();
        opts.volume = Some(0.0);
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_enumerated_conversions() {
        assert_eq!(SampleRate::try_from(22050).unwrap(), SampleRate::Hz22050);
        assert!(SampleRate::try_from(48000).is_err());
        assert_eq!(Bitrate::try_from(64000).unwrap(), Bitrate::Bps64000);
        assert!(Bitrate::try_from(96000).is_err());
        assert_eq!(Channels::try_from(2).unwrap(), Channels::Stereo);
        assert!(Channels::try_from(3).is_err());
        assert_eq!("Happy".parse::<Emotion>().unwrap(), Emotion::Happy);
        assert!("bored".parse::<Emotion>().is_err());
    }

    #[test]
    fn test_with_update_leaves_original_untouched() {
        let base = valid();
        let update = OptionsUpdate {
            voice_id: Some("male-qn-qingse".into()),
            emotion: Some(Emotion::Sad),
            ..Default::default()
        };
        let next = base.with_update(&update);
        assert_eq!(next.voice_id, "male-qn-qingse");
        assert_eq!(next.emotion, Some(Emotion::Sad));
        assert_eq!(base.voice_id, DEFAULT_VOICE_ID);
        assert_eq!(next.api_key, base.api_key);
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let rendered = format!("{:?}", valid());
        assert!(!rendered.contains("sk-live-123"));
        assert!(rendered.contains("<redacted>"));
    }
}
