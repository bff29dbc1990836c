//! Configuration module for the MiniMax TTS client
//!
//! This module handles client configuration from various sources: YAML files and
//! environment variables. The configuration is split into logical submodules:
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//! - `utils`: Utility functions for configuration parsing
//!
//! # Example
//! ```rust,no_run
//! use minimax_tts::config::ClientConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file, falling back to environment variables
//! let config_path = PathBuf::from("minimax.yaml");
//! let config = ClientConfig::from_file(&config_path)?;
//!
//! let options = config.to_synthesis_options()?;
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::core::tokenizer::TokenizerConfig;
use crate::core::tts::TTSResult;
use crate::core::tts::minimax::{
    Bitrate, Channels, ConnectOptions, DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_VOICE_ID, Emotion,
    PoolConfig, SampleRate, StreamConfig, SynthesisOptions,
};

mod env;
mod merge;
mod utils;
mod validation;
mod yaml;

pub use utils::parse_bool;

/// Client configuration
///
/// Contains everything needed to build a [`crate::MinimaxTTS`]:
/// - Credentials and endpoint
/// - Voice and audio parameters
/// - Connection pool, retry and stream tuning
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // Credentials and endpoint
    pub api_key: Option<String>,
    pub group_id: Option<String>,
    pub base_url: String,

    // Voice settings
    pub model: String,
    pub voice_id: String,
    pub speed: Option<f32>,
    pub emotion: Option<String>,
    pub language: Option<String>,

    // Audio settings
    pub sample_rate: u32,
    pub bitrate: u32,
    pub channels: u16,

    // Pool settings
    pub max_session_secs: u64,
    pub pool_max_idle: usize,
    pub prewarm: bool,
    pub reaper_interval_secs: Option<u64>,

    // Connection retry settings
    pub connect_timeout_secs: u64,
    pub max_retry: u32,
    pub retry_interval_ms: u64,

    // Stream settings
    pub completion_grace_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            group_id: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice_id: DEFAULT_VOICE_ID.to_string(),
            speed: None,
            emotion: None,
            language: None,
            sample_rate: SampleRate::default().as_u32(),
            bitrate: Bitrate::default().as_u32(),
            channels: Channels::default().as_u16(),
            max_session_secs: 100,
            pool_max_idle: 4,
            prewarm: false,
            reaper_interval_secs: None,
            connect_timeout_secs: 10,
            max_retry: 3,
            retry_interval_ms: 2000,
            completion_grace_ms: 5000,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a YAML file merged with environment variables
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables
    /// 3. Default values
    ///
    /// After loading and merging, performs validation on the final configuration.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        // .env is not loaded here: the YAML file is the source of truth and
        // only real environment variables fill its gaps.
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate_config(&config)?;
        Ok(config)
    }

    /// Whether both credentials are present (not whether they are valid)
    pub fn has_credentials(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
            && self.group_id.as_deref().is_some_and(|g| !g.trim().is_empty())
    }

    /// Build the per-client synthesis options.
    ///
    /// Credential checks happen when the client is constructed from these options.
    pub fn to_synthesis_options(&self) -> TTSResult<SynthesisOptions> {
        let emotion = self
            .emotion
            .as_deref()
            .map(str::parse::<Emotion>)
            .transpose()?;

        Ok(SynthesisOptions {
            model: self.model.clone(),
            voice_id: self.voice_id.clone(),
            sample_rate: SampleRate::try_from(self.sample_rate)?,
            bitrate: Bitrate::try_from(self.bitrate)?,
            channels: Channels::try_from(self.channels)?,
            speed: self.speed,
            volume: None,
            pitch: None,
            emotion,
            language: self.language.clone(),
            api_key: self.api_key.clone().unwrap_or_default(),
            group_id: self.group_id.clone().unwrap_or_default(),
            base_url: self.base_url.clone(),
        })
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_session_duration: Duration::from_secs(self.max_session_secs),
            mark_refreshed_on_get: true,
            max_idle: self.pool_max_idle,
        }
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            timeout: Duration::from_secs(self.connect_timeout_secs),
            max_retry: self.max_retry,
            retry_interval: Duration::from_millis(self.retry_interval_ms),
        }
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            completion_grace: Duration::from_millis(self.completion_grace_ms),
            tokenizer: TokenizerConfig::default(),
            ..Default::default()
        }
    }
}
