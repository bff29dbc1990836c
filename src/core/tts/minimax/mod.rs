//! MiniMax streaming text-to-speech over WebSocket.
//!
//! - [`config`]: synthesis options and pool, retry and stream tuning
//! - [`messages`]: wire protocol (client commands, server events)
//! - [`session`]: one WebSocket connection with a started synthesis session
//! - [`pool`]: age-bounded reuse of session connections
//! - [`stream`]: the per-stream input/send/receive pipeline
//! - [`client`]: [`MinimaxTTS`], the entry point tying them together

pub mod client;
pub mod config;
pub mod messages;
pub mod metrics;
pub mod pending;
pub mod pool;
pub mod session;
pub mod stream;

pub use client::{MinimaxTTS, SynthesizedAudio};
pub use config::{
    Bitrate, Channels, ConnectOptions, DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_VOICE_ID, Emotion,
    OptionsUpdate, PoolConfig, SampleRate, StreamConfig, SynthesisOptions,
};
pub use messages::{ApiError, AudioChunk, ClientMessage, ServerEvent};
pub use metrics::SynthesisMetrics;
pub use pending::{PendingRequests, PendingSnapshot};
pub use pool::{ConnectionPool, Connector, MinimaxConnector, PoolMetrics, PooledConnection};
pub use session::{HandshakeState, SessionConnection, SessionReceiver, SessionSender};
pub use stream::SynthesizeStream;
