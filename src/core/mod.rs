pub mod tokenizer;
pub mod tts;

// Re-export commonly used types for convenience
pub use tokenizer::{MixedLanguageTokenizer, SentenceStream, SentenceTokenizer, TokenizerConfig};
pub use tts::{
    AudioEmitter, AudioEvent, AudioFrame, MinimaxTTS, OptionsUpdate, SynthesisOptions,
    SynthesizeStream, TTSError, TTSResult,
};
