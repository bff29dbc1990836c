//! MiniMax streaming TTS client.
//!
//! [`MinimaxTTS`] owns the connection pool and the options snapshot shared by
//! every stream it opens. Each call to [`MinimaxTTS::stream`] spawns one
//! pipeline task; [`MinimaxTTS::aclose`] cancels them all and closes the pool.
//!
//! # Example
//! ```rust,no_run
//! use futures::StreamExt;
//! use minimax_tts::core::tts::AudioEvent;
//! use minimax_tts::core::tts::minimax::{MinimaxTTS, SynthesisOptions};
//!
//! # async fn example() -> Result<(), minimax_tts::core::tts::TTSError> {
//! let tts = MinimaxTTS::new(SynthesisOptions::new("sk-...", "1899"))?;
//!
//! let mut stream = tts.stream()?;
//! stream.push_text("Hello. 你好。")?;
//! stream.end_input();
//!
//! while let Some(event) = stream.next().await {
//!     if let AudioEvent::Frame(frame) = event? {
//!         println!("{} bytes", frame.data.len());
//!     }
//! }
//! tts.aclose().await;
//! # Ok(())
//! # }
//! ```

use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};
use uuid::Uuid;

use super::config::{ConnectOptions, OptionsUpdate, PoolConfig, StreamConfig, SynthesisOptions};
use super::metrics::SynthesisMetrics;
use super::pool::{ConnectionPool, MinimaxConnector};
use super::stream::{Pipeline, SynthesizeStream};
use crate::config::ClientConfig;
use crate::core::tts::base::{AudioEmitter, AudioEvent, TTSError, TTSResult};
use crate::core::tts::emitter::{ChannelAudioEmitter, EventSender};

/// Result of a one-shot [`MinimaxTTS::synthesize`] call.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    /// Concatenated 16-bit little-endian PCM
    pub pcm: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Per-token failures the stream survived
    pub token_errors: Vec<TTSError>,
    pub metrics: SynthesisMetrics,
}

impl SynthesizedAudio {
    pub fn duration(&self) -> Duration {
        let bytes_per_second = self.sample_rate as u64 * 2 * self.channels.max(1) as u64;
        if bytes_per_second == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.pcm.len() as f64 / bytes_per_second as f64)
    }
}

pub struct MinimaxTTS {
    pool: ConnectionPool<MinimaxConnector>,
    stream_config: StreamConfig,
    connect: ConnectOptions,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl MinimaxTTS {
    /// Create a client with default pool, retry and stream settings.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(options: SynthesisOptions) -> TTSResult<Self> {
        Self::with_config(
            options,
            PoolConfig::default(),
            ConnectOptions::default(),
            StreamConfig::default(),
        )
    }

    /// Create a client. Options are validated here, never at first use.
    pub fn with_config(
        options: SynthesisOptions,
        pool_config: PoolConfig,
        connect: ConnectOptions,
        stream_config: StreamConfig,
    ) -> TTSResult<Self> {
        options.validate()?;
        if pool_config.max_session_duration.is_zero() {
            return Err(TTSError::InvalidConfiguration(
                "max_session_duration must be greater than zero".to_string(),
            ));
        }

        info!(
            "Creating MiniMax TTS client: model={}, voice={}, {} Hz, {} channel(s)",
            options.model,
            options.voice_id,
            options.sample_rate.as_u32(),
            options.channels.as_u16()
        );

        let pool = ConnectionPool::new(MinimaxConnector::new(options), pool_config);
        Ok(Self {
            pool,
            stream_config,
            connect,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            reaper: Mutex::new(None),
        })
    }

    /// Create a client from loaded configuration, starting the optional
    /// prewarm and reaper.
    pub fn from_config(config: &ClientConfig) -> TTSResult<Self> {
        let client = Self::with_config(
            config.to_synthesis_options()?,
            config.pool_config(),
            config.connect_options(),
            config.stream_config(),
        )?;
        if config.prewarm {
            client.prewarm();
        }
        if let Some(secs) = config.reaper_interval_secs {
            client.start_reaper(Duration::from_secs(secs));
        }
        Ok(client)
    }

    /// Current options snapshot.
    pub fn options(&self) -> Arc<SynthesisOptions> {
        self.pool.connector().options()
    }

    pub fn sample_rate(&self) -> u32 {
        self.options().sample_rate.as_u32()
    }

    pub fn num_channels(&self) -> u16 {
        self.options().channels.as_u16()
    }

    pub fn pool(&self) -> &ConnectionPool<MinimaxConnector> {
        &self.pool
    }

    /// Open one connection in the background so the first stream skips the handshake.
    pub fn prewarm(&self) -> JoinHandle<()> {
        self.pool.prewarm(self.connect.timeout)
    }

    /// Start (or restart) the background reaper for expired idle connections.
    pub fn start_reaper(&self, period: Duration) {
        let handle = self.pool.spawn_reaper(period);
        if let Some(previous) = self.reaper.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Change session parameters for streams opened from now on.
    ///
    /// Idle connections were started with the old parameters and are retired;
    /// streams already running keep theirs.
    pub async fn update_options(&self, update: OptionsUpdate) -> TTSResult<()> {
        let next = self.options().with_update(&update);
        next.validate()?;
        self.pool.connector().set_options(next);
        self.pool.invalidate().await;
        debug!("Options updated; idle connections retired");
        Ok(())
    }

    /// Open a stream whose audio is delivered as [`AudioEvent`]s on the stream itself.
    ///
    /// Frames queue up until polled; see [`SynthesizeStream`] on buffering.
    pub fn stream(&self) -> TTSResult<SynthesizeStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = ChannelAudioEmitter::new(tx.clone(), self.stream_config.frame_duration);
        self.start_pipeline(Box::new(emitter), tx, rx)
    }

    /// Open a stream that writes audio into `emitter`.
    ///
    /// The returned stream still carries per-token errors and the terminal error.
    pub fn stream_with_emitter(
        &self,
        emitter: Box<dyn AudioEmitter>,
    ) -> TTSResult<SynthesizeStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.start_pipeline(emitter, tx, rx)
    }

    /// Synthesize `text` in one call and collect the PCM.
    pub async fn synthesize(&self, text: &str) -> TTSResult<SynthesizedAudio> {
        let mut stream = self.stream()?;
        stream.push_text(text)?;
        stream.end_input();

        let mut pcm = Vec::new();
        let mut token_errors = Vec::new();
        while let Some(event) = stream.next().await {
            match event? {
                AudioEvent::Frame(frame) => pcm.extend_from_slice(&frame.data),
                AudioEvent::TokenError { error, .. } => token_errors.push(error),
                AudioEvent::SegmentEnd { .. } => {}
            }
        }

        let options = self.options();
        Ok(SynthesizedAudio {
            pcm,
            sample_rate: options.sample_rate.as_u32(),
            channels: options.channels.as_u16(),
            token_errors,
            metrics: stream.metrics(),
        })
    }

    /// Cancel every stream, wait for their cleanup and close the pool.
    pub async fn aclose(&self) {
        info!("Closing MiniMax TTS client");
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        if let Some(reaper) = self.reaper.lock().take() {
            reaper.abort();
        }
        self.pool.close_all().await;
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn start_pipeline(
        &self,
        emitter: Box<dyn AudioEmitter>,
        events: EventSender,
        events_rx: mpsc::UnboundedReceiver<Result<AudioEvent, TTSError>>,
    ) -> TTSResult<SynthesizeStream> {
        if self.is_closed() || self.pool.is_closed() {
            return Err(TTSError::StreamClosed("client is closed".to_string()));
        }

        let request_id = Uuid::new_v4().to_string();
        debug!("[{request_id}] Opening synthesis stream");

        let pipeline = Pipeline {
            metrics: Arc::new(Mutex::new(SynthesisMetrics::new(&request_id))),
            request_id,
            pool: self.pool.clone(),
            options: self.options(),
            stream_config: self.stream_config.clone(),
            connect: self.connect.clone(),
            emitter,
            events,
            cancel: self.shutdown.child_token(),
        };
        Ok(pipeline.start(events_rx, |task| self.tasks.spawn(task)))
    }
}

impl Drop for MinimaxTTS {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(reaper) = self.reaper.lock().take() {
            reaper.abort();
        }
    }
}
