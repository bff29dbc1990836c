mod base;
pub mod emitter;
pub mod minimax;

pub use base::{AudioEmitter, AudioEvent, AudioFrame, TTSError, TTSResult};
pub use emitter::{ChannelAudioEmitter, EventSender};
pub use minimax::{MinimaxTTS, OptionsUpdate, SynthesisOptions, SynthesizeStream};
