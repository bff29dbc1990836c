use std::env;

use super::ClientConfig;
use super::utils::{env_bool, env_parse};
use super::yaml::YamlConfig;

/// Merge YAML configuration with environment variables
///
/// Priority order (highest to lowest):
/// 1. YAML configuration values
/// 2. Environment variables
/// 3. Default values
///
/// Environment variables provide the base configuration (credentials usually
/// live there) while a YAML file can pin specific values per deployment.
///
/// # Errors
/// Returns an error when an environment variable consulted for a missing YAML
/// value does not parse.
pub fn merge_config(
    yaml_config: Option<YamlConfig>,
) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let yaml = yaml_config.unwrap_or_default();
    let defaults = ClientConfig::default();

    // Helper macro for string values: YAML > ENV > Default
    macro_rules! get_value {
        ($env_var:expr, $yaml_value:expr, $default:expr) => {
            $yaml_value
                .or_else(|| env::var($env_var).ok().filter(|v| !v.trim().is_empty()))
                .unwrap_or($default)
        };
    }

    // Helper macro for optional strings: YAML > ENV
    macro_rules! get_optional {
        ($env_var:expr, $yaml_value:expr) => {
            $yaml_value.or_else(|| env::var($env_var).ok().filter(|v| !v.trim().is_empty()))
        };
    }

    // Helper macro for parsed values: YAML > ENV (strictly parsed)
    macro_rules! get_parsed {
        ($env_var:expr, $yaml_value:expr) => {
            match $yaml_value {
                Some(value) => Some(value),
                None => env_parse($env_var)?,
            }
        };
    }

    let minimax = yaml.minimax.unwrap_or_default();
    let voice = yaml.voice.unwrap_or_default();
    let audio = yaml.audio.unwrap_or_default();
    let pool = yaml.pool.unwrap_or_default();
    let connection = yaml.connection.unwrap_or_default();
    let stream = yaml.stream.unwrap_or_default();

    // Credentials and endpoint
    let api_key = get_optional!("MINIMAX_API_KEY", minimax.api_key);
    let group_id = get_optional!("MINIMAX_GROUP_ID", minimax.group_id);
    let base_url = get_value!("MINIMAX_BASE_URL", minimax.base_url, defaults.base_url);

    // Voice settings
    let model = get_value!("MINIMAX_MODEL", voice.model, defaults.model);
    let voice_id = get_value!("MINIMAX_VOICE_ID", voice.voice_id, defaults.voice_id);
    let speed = get_parsed!("MINIMAX_SPEED", voice.speed);
    let emotion = get_optional!("MINIMAX_EMOTION", voice.emotion);
    let language = get_optional!("MINIMAX_LANGUAGE", voice.language);

    // Audio settings
    let sample_rate =
        get_parsed!("MINIMAX_SAMPLE_RATE", audio.sample_rate).unwrap_or(defaults.sample_rate);
    let bitrate = get_parsed!("MINIMAX_BITRATE", audio.bitrate).unwrap_or(defaults.bitrate);
    let channels = get_parsed!("MINIMAX_CHANNELS", audio.channels).unwrap_or(defaults.channels);

    // Pool settings
    let max_session_secs = get_parsed!("TTS_MAX_SESSION_SECS", pool.max_session_secs)
        .unwrap_or(defaults.max_session_secs);
    let pool_max_idle =
        get_parsed!("TTS_POOL_MAX_IDLE", pool.max_idle).unwrap_or(defaults.pool_max_idle);
    let prewarm = match pool.prewarm {
        Some(prewarm) => prewarm,
        None => env_bool("TTS_PREWARM")?.unwrap_or(defaults.prewarm),
    };
    let reaper_interval_secs = get_parsed!("TTS_REAPER_INTERVAL_SECS", pool.reaper_interval_secs);

    // Connection retry settings
    let connect_timeout_secs = get_parsed!("TTS_CONNECT_TIMEOUT_SECS", connection.timeout_secs)
        .unwrap_or(defaults.connect_timeout_secs);
    let max_retry =
        get_parsed!("TTS_MAX_RETRY", connection.max_retry).unwrap_or(defaults.max_retry);
    let retry_interval_ms = get_parsed!("TTS_RETRY_INTERVAL_MS", connection.retry_interval_ms)
        .unwrap_or(defaults.retry_interval_ms);

    // Stream settings
    let completion_grace_ms = get_parsed!("TTS_COMPLETION_GRACE_MS", stream.completion_grace_ms)
        .unwrap_or(defaults.completion_grace_ms);

    Ok(ClientConfig {
        api_key,
        group_id,
        base_url,
        model,
        voice_id,
        speed,
        emotion,
        language,
        sample_rate,
        bitrate,
        channels,
        max_session_secs,
        pool_max_idle,
        prewarm,
        reaper_interval_secs,
        connect_timeout_secs,
        max_retry,
        retry_interval_ms,
        completion_grace_ms,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::yaml::{AudioYaml, MinimaxYaml, PoolYaml, VoiceYaml};
    use serial_test::serial;

    pub(crate) const ENV_VARS: &[&str] = &[
        "MINIMAX_API_KEY",
        "MINIMAX_GROUP_ID",
        "MINIMAX_BASE_URL",
        "MINIMAX_MODEL",
        "MINIMAX_VOICE_ID",
        "MINIMAX_SAMPLE_RATE",
        "MINIMAX_BITRATE",
        "MINIMAX_CHANNELS",
        "MINIMAX_SPEED",
        "MINIMAX_EMOTION",
        "MINIMAX_LANGUAGE",
        "TTS_MAX_SESSION_SECS",
        "TTS_CONNECT_TIMEOUT_SECS",
        "TTS_MAX_RETRY",
        "TTS_RETRY_INTERVAL_MS",
        "TTS_COMPLETION_GRACE_MS",
        "TTS_POOL_MAX_IDLE",
        "TTS_PREWARM",
        "TTS_REAPER_INTERVAL_SECS",
    ];

    pub(crate) fn cleanup_env_vars() {
        unsafe {
            for var in ENV_VARS {
                env::remove_var(var);
            }
        }
    }

    #[test]
    #[serial]
    fn test_merge_yaml_only() {
        cleanup_env_vars();

        let yaml = YamlConfig {
            minimax: Some(MinimaxYaml {
                api_key: Some("sk-yaml".to_string()),
                group_id: Some("1899".to_string()),
                base_url: None,
            }),
            audio: Some(AudioYaml {
                sample_rate: Some(24000),
                bitrate: None,
                channels: Some(2),
            }),
            ..Default::default()
        };

        let config = merge_config(Some(yaml)).unwrap();
        assert_eq!(config.api_key, Some("sk-yaml".to_string()));
        assert_eq!(config.group_id, Some("1899".to_string()));
        assert_eq!(config.base_url, "https://api.minimaxi.chat");
        assert_eq!(config.sample_rate, 24000);
        assert_eq!(config.bitrate, 128000);
        assert_eq!(config.channels, 2);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_merge_yaml_overrides_env() {
        cleanup_env_vars();

        unsafe {
            env::set_var("MINIMAX_API_KEY", "sk-env");
            env::set_var("MINIMAX_VOICE_ID", "env-voice");
            env::set_var("TTS_POOL_MAX_IDLE", "8");
        }

        let yaml = YamlConfig {
            voice: Some(VoiceYaml {
                voice_id: Some("yaml-voice".to_string()),
                ..Default::default()
            }),
            pool: Some(PoolYaml {
                max_idle: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = merge_config(Some(yaml)).unwrap();
        assert_eq!(config.voice_id, "yaml-voice");
        assert_eq!(config.pool_max_idle, 1);
        // Not in YAML, so the environment fills the gap
        assert_eq!(config.api_key, Some("sk-env".to_string()));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_merge_defaults_when_no_yaml_or_env() {
        cleanup_env_vars();

        let config = merge_config(None).unwrap();
        assert_eq!(config.api_key, None);
        assert_eq!(config.model, "speech-01-hd");
        assert_eq!(config.voice_id, "female-shaoning");
        assert_eq!(config.sample_rate, 32000);
        assert_eq!(config.max_session_secs, 100);
        assert_eq!(config.max_retry, 3);
        assert_eq!(config.retry_interval_ms, 2000);
        assert_eq!(config.completion_grace_ms, 5000);
        assert!(!config.prewarm);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_merge_env_only() {
        cleanup_env_vars();

        unsafe {
            env::set_var("MINIMAX_SPEED", "1.5");
            env::set_var("MINIMAX_EMOTION", "fear");
            env::set_var("TTS_PREWARM", "yes");
            env::set_var("TTS_REAPER_INTERVAL_SECS", "20");
        }

        let config = merge_config(None).unwrap();
        assert_eq!(config.speed, Some(1.5));
        assert_eq!(config.emotion, Some("fear".to_string()));
        assert!(config.prewarm);
        assert_eq!(config.reaper_interval_secs, Some(20));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_merge_invalid_env_number() {
        cleanup_env_vars();

        unsafe {
            env::set_var("TTS_MAX_RETRY", "three");
        }

        let result = merge_config(None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("TTS_MAX_RETRY"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_merge_yaml_value_skips_invalid_env() {
        cleanup_env_vars();

        unsafe {
            env::set_var("TTS_MAX_RETRY", "three");
        }

        let yaml = YamlConfig {
            connection: Some(crate::config::yaml::ConnectionYaml {
                max_retry: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = merge_config(Some(yaml)).unwrap();
        assert_eq!(config.max_retry, 0);

        cleanup_env_vars();
    }
}
