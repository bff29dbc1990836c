use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values missing from
/// the file are taken from environment variables, then from defaults.
///
/// # Example YAML structure
/// ```yaml
/// minimax:
///   api_key: "your-api-key"
///   group_id: "your-group-id"
///   base_url: "https://api.minimaxi.chat"
///
/// voice:
///   model: "speech-01-hd"
///   voice_id: "female-shaoning"
///   speed: 1.0
///   emotion: "happy"
///   language: "Chinese"
///
/// audio:
///   sample_rate: 32000
///   bitrate: 128000
///   channels: 1
///
/// pool:
///   max_session_secs: 100
///   max_idle: 4
///   prewarm: true
///   reaper_interval_secs: 30
///
/// connection:
///   timeout_secs: 10
///   max_retry: 3
///   retry_interval_ms: 2000
///
/// stream:
///   completion_grace_ms: 5000
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub minimax: Option<MinimaxYaml>,
    pub voice: Option<VoiceYaml>,
    pub audio: Option<AudioYaml>,
    pub pool: Option<PoolYaml>,
    pub connection: Option<ConnectionYaml>,
    pub stream: Option<StreamYaml>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MinimaxYaml {
    pub api_key: Option<String>,
    pub group_id: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct VoiceYaml {
    pub model: Option<String>,
    pub voice_id: Option<String>,
    pub speed: Option<f32>,
    pub emotion: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub sample_rate: Option<u32>,
    pub bitrate: Option<u32>,
    pub channels: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PoolYaml {
    pub max_session_secs: Option<u64>,
    pub max_idle: Option<usize>,
    pub prewarm: Option<bool>,
    pub reaper_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ConnectionYaml {
    pub timeout_secs: Option<u64>,
    pub max_retry: Option<u32>,
    pub retry_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StreamYaml {
    pub completion_grace_ms: Option<u64>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or contains invalid YAML
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
