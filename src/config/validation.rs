use super::ClientConfig;
use crate::core::tts::minimax::{Bitrate, Channels, Emotion, SampleRate};

/// The service closes sessions after this many seconds; pooled connections
/// must be retired before it.
const SERVICE_SESSION_LIMIT_SECS: u64 = 120;

/// Validate a merged configuration
///
/// Credentials are not required here so that a configuration can be loaded
/// before they are known; building a client rejects missing credentials.
pub fn validate_config(config: &ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    validate_audio(config)?;
    validate_voice(config)?;
    validate_pool(config)?;
    validate_connection(config)?;
    Ok(())
}

/// Validate that the audio settings are among the values the service accepts
pub fn validate_audio(config: &ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    SampleRate::try_from(config.sample_rate)?;
    Bitrate::try_from(config.bitrate)?;
    Channels::try_from(config.channels)?;
    Ok(())
}

pub fn validate_voice(config: &ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.model.trim().is_empty() {
        return Err("MINIMAX_MODEL must not be empty".into());
    }
    if config.voice_id.trim().is_empty() {
        return Err("MINIMAX_VOICE_ID must not be empty".into());
    }
    if let Some(speed) = config.speed
        && !(0.5..=2.0).contains(&speed)
    {
        return Err(format!("MINIMAX_SPEED must be between 0.5 and 2.0, got {speed}").into());
    }
    if let Some(emotion) = &config.emotion {
        emotion.parse::<Emotion>()?;
    }
    Ok(())
}

/// Validate pool lifetimes
///
/// `max_session_secs` must be non-zero and strictly below the service's own
/// session limit.
pub fn validate_pool(config: &ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.max_session_secs == 0 || config.max_session_secs >= SERVICE_SESSION_LIMIT_SECS {
        return Err(format!(
            "TTS_MAX_SESSION_SECS must be between 1 and {}, got {}",
            SERVICE_SESSION_LIMIT_SECS - 1,
            config.max_session_secs
        )
        .into());
    }
    if config.reaper_interval_secs == Some(0) {
        return Err("TTS_REAPER_INTERVAL_SECS must be greater than zero".into());
    }
    Ok(())
}

pub fn validate_connection(config: &ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.connect_timeout_secs == 0 {
        return Err("TTS_CONNECT_TIMEOUT_SECS must be greater than zero".into());
    }
    Ok(())
}
