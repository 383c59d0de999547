// Chat front-end over a pluggable text-generation pipeline.
//
// The pipeline (model loading + inference + tokenizer) is a black box
// behind traits; this crate owns the streaming response filter that masks
// the chat-template preamble, the session state machine, conversation
// bookkeeping, progress reporting, and configuration.

pub mod config;
pub mod conversation;
pub mod logger;
pub mod pipeline;
pub mod progress;
pub mod session;
pub mod streamer;
pub mod tokenizer;

// Scripted pipeline, enabled for the REPL binary and E2E tests
#[cfg(feature = "mock")]
pub mod mock;

// Re-export commonly used types
pub use config::ChatConfig;
pub use conversation::{ChatMessage, ConversationHistory};
pub use pipeline::{
    GenerationOptions, GenerationOutput, PipelineError, PipelineLoader, TextGenerationPipeline,
};
pub use progress::ProgressEvent;
pub use session::{ChatError, ChatSession, SessionState};
pub use streamer::{DisplaySink, ResponseStreamer, StreamerOptions};
pub use tokenizer::{DecodeError, DecodeOptions, TokenDecoder};
