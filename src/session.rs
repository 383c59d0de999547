//! Chat session controller.
//!
//! Owns the session state machine (replacing ad-hoc loading/generating
//! flags), the conversation history, and the handle to the loaded
//! pipeline. Requests arriving while a load or generation is in flight
//! are dropped silently, mirroring how a front-end disables its inputs.
//! Heavy pipeline work goes on the blocking thread pool.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::task;

use crate::config::{ChatConfig, DEFAULT_SYSTEM_PROMPT};
use crate::conversation::ConversationHistory;
use crate::pipeline::{GenerationOutput, PipelineError, PipelineLoader, TextGenerationPipeline};
use crate::progress::ProgressEvent;
use crate::streamer::{DisplaySink, ResponseStreamer};
use crate::{log_debug, log_info, log_warn};

/// Explicit session state. One session is in exactly one of these at any
/// time; transitions happen only inside [`ChatSession`] methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No model loaded yet (or the last load failed).
    Idle,
    LoadingModel,
    /// Model loaded, ready to accept a message.
    Ready,
    Generating,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

pub struct ChatSession {
    state: SessionState,
    pipeline: Option<Arc<dyn TextGenerationPipeline>>,
    model_name: Option<String>,
    history: ConversationHistory,
    config: ChatConfig,
}

impl ChatSession {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            state: SessionState::Idle,
            pipeline: None,
            model_name: None,
            history: ConversationHistory::new(),
            config,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn model_name(&self) -> Option<&str> {
        self.model_name.as_deref()
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Load a model through the given loader, reporting progress events.
    ///
    /// Dropped silently when the name is empty or a load/generation is
    /// already in flight. On failure the pipeline handle is cleared and
    /// the session returns to `Idle`.
    pub async fn load_model(
        &mut self,
        loader: Arc<dyn PipelineLoader>,
        model: &str,
        progress: Box<dyn FnMut(ProgressEvent) + Send>,
    ) -> Result<(), ChatError> {
        let model = model.trim().to_string();
        if model.is_empty()
            || matches!(
                self.state,
                SessionState::LoadingModel | SessionState::Generating
            )
        {
            log_debug!("Ignoring load request for \"{model}\" in state {:?}", self.state);
            return Ok(());
        }

        self.state = SessionState::LoadingModel;
        self.pipeline = None;
        log_info!("Attempting to load model: {model}");

        let task_model = model.clone();
        let mut progress = progress;
        let result =
            task::spawn_blocking(move || loader.load(&task_model, progress.as_mut())).await;

        match result {
            Ok(Ok(pipeline)) => {
                self.pipeline = Some(pipeline);
                self.model_name = Some(model.clone());
                self.state = SessionState::Ready;
                log_info!("Model \"{model}\" loaded successfully. Ready to chat.");
                Ok(())
            }
            Ok(Err(e)) => {
                log_warn!("Model loading failed: {e}");
                self.model_name = None;
                self.state = SessionState::Idle;
                Err(ChatError::Pipeline(e))
            }
            Err(e) => {
                log_warn!("Model loading task panicked: {e}");
                self.model_name = None;
                self.state = SessionState::Idle;
                Err(ChatError::TaskJoin(e.to_string()))
            }
        }
    }

    /// Run one generation turn, streaming the visible reply to `sink`.
    ///
    /// The user message is appended to the history, a default system
    /// prompt is injected when none exists, and a fresh streaming filter
    /// is built for this turn. The filtered final text (from the sink's
    /// `is_final` call) becomes the recorded assistant message.
    ///
    /// Returns `Ok(None)` without side effects when the text is empty or
    /// the session is not `Ready`.
    pub async fn send_message(
        &mut self,
        text: &str,
        sink: DisplaySink,
    ) -> Result<Option<GenerationOutput>, ChatError> {
        let text = text.trim().to_string();
        if text.is_empty() || self.state != SessionState::Ready {
            log_debug!("Ignoring message in state {:?}", self.state);
            return Ok(None);
        }
        let pipeline = match self.pipeline.clone() {
            Some(pipeline) => pipeline,
            None => {
                log_warn!("Session marked ready but no pipeline is loaded");
                return Ok(None);
            }
        };

        self.state = SessionState::Generating;
        self.history.push_user(&text);
        let system_prompt = self
            .config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        self.history.ensure_system_prompt(&system_prompt);

        // Capture the final filtered text as it passes through the sink,
        // the same way a front-end records the reply on its final update.
        let final_text: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let capture = final_text.clone();
        let mut user_sink = sink;
        let wrapped: DisplaySink = Box::new(move |visible, is_final| {
            if is_final {
                if let Ok(mut slot) = capture.lock() {
                    *slot = Some(visible.to_string());
                }
            }
            user_sink(visible, is_final);
        });

        let streamer =
            ResponseStreamer::new(pipeline.decoder(), wrapped, self.config.streamer_options());
        let messages = self.history.messages().to_vec();
        let options = self.config.generation_options();

        log_info!("Generating response ({} messages in context)", messages.len());
        let result =
            task::spawn_blocking(move || pipeline.generate(&messages, &options, &streamer)).await;

        self.state = SessionState::Ready;

        match result {
            Ok(Ok(output)) => {
                let reply = final_text
                    .lock()
                    .ok()
                    .and_then(|mut slot| slot.take())
                    .unwrap_or_else(|| {
                        log_warn!("Pipeline returned without a final streamer callback, recording raw output");
                        output.response.trim().to_string()
                    });
                log_info!(
                    "Assistant reply recorded ({} chars, {} tokens)",
                    reply.len(),
                    output.tokens_generated
                );
                self.history.push_assistant(&reply);
                Ok(Some(output))
            }
            Ok(Err(e)) => {
                log_warn!("Generation failed: {e}");
                Err(ChatError::Pipeline(e))
            }
            Err(e) => {
                log_warn!("Generation task panicked: {e}");
                Err(ChatError::TaskJoin(e.to_string()))
            }
        }
    }
}
