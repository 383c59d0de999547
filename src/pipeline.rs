//! Boundary to the model-loading and inference capability.
//!
//! The pipeline is a black box to this crate: it loads a named model,
//! produces token-id batches during generation, and carries the tokenizer
//! used to decode them. Everything here is a trait seam so real backends
//! and scripted test pipelines plug in the same way.

use std::sync::Arc;
use thiserror::Error;

use crate::conversation::ChatMessage;
use crate::progress::ProgressEvent;
use crate::streamer::ResponseStreamer;
use crate::tokenizer::TokenDecoder;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to load model {model}: {reason}")]
    ModelLoad { model: String, reason: String },
    #[error("generation failed: {0}")]
    Generation(String),
}

/// Sampling and length options passed through to the pipeline untouched.
#[derive(Clone, Debug)]
pub struct GenerationOptions {
    pub max_new_tokens: u32,
    pub do_sample: bool,
    pub temperature: f64,
    pub top_k: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_new_tokens: 512,
            do_sample: true,
            temperature: 0.7,
            top_k: 50,
        }
    }
}

/// Output from one generation run.
pub struct GenerationOutput {
    /// Raw accumulated output, template preamble included.
    pub response: String,
    pub tokens_generated: usize,
}

/// Loads a named model into a ready-to-generate pipeline, reporting
/// download/load progress along the way.
pub trait PipelineLoader: Send + Sync {
    fn load(
        &self,
        model: &str,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<Arc<dyn TextGenerationPipeline>, PipelineError>;
}

/// A loaded text-generation pipeline.
///
/// `generate` must call `streamer.feed` for every produced token batch and
/// `streamer.finish` exactly once when generation completes or is aborted.
pub trait TextGenerationPipeline: Send + Sync {
    /// The tokenizer capability used to decode this pipeline's token ids.
    fn decoder(&self) -> Arc<dyn TokenDecoder>;

    fn generate(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
        streamer: &ResponseStreamer,
    ) -> Result<GenerationOutput, PipelineError>;
}
