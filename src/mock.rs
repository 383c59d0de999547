//! Scripted pipeline for the REPL binary and end-to-end flows.
//!
//! Renders the conversation through a ChatML-style template, tokenizes it
//! with a toy interning tokenizer, and streams the token ids back in small
//! batches. Decoding with `skip_special_tokens` strips the `<|im_start|>`
//! and `<|im_end|>` delimiters, which leaves the bare `"assistant\n"` role
//! line the streaming filter keys on.

use std::sync::{Arc, Mutex};

use crate::conversation::ChatMessage;
use crate::pipeline::{
    GenerationOptions, GenerationOutput, PipelineError, PipelineLoader, TextGenerationPipeline,
};
use crate::progress::ProgressEvent;
use crate::streamer::ResponseStreamer;
use crate::tokenizer::{DecodeError, DecodeOptions, TokenDecoder};

const TURN_OPEN: &str = "<|im_start|>";
const TURN_CLOSE: &str = "<|im_end|>";

/// Interning tokenizer: each distinct text piece gets the next free id.
#[derive(Default)]
pub struct MockTokenizer {
    pieces: Mutex<Vec<String>>,
}

impl MockTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split text into whitespace-terminated pieces and intern each one.
    pub fn encode(&self, text: &str) -> Vec<u32> {
        let mut ids = Vec::new();
        if let Ok(mut pieces) = self.pieces.lock() {
            for piece in text.split_inclusive(|c: char| c.is_whitespace()) {
                let id = match pieces.iter().position(|p| p == piece) {
                    Some(pos) => pos as u32,
                    None => {
                        pieces.push(piece.to_string());
                        (pieces.len() - 1) as u32
                    }
                };
                ids.push(id);
            }
        }
        ids
    }
}

impl TokenDecoder for MockTokenizer {
    fn decode(&self, token_ids: &[u32], options: &DecodeOptions) -> Result<String, DecodeError> {
        let pieces = self
            .pieces
            .lock()
            .map_err(|_| DecodeError("tokenizer vocabulary unavailable".to_string()))?;
        let mut out = String::new();
        for &id in token_ids {
            let piece = pieces
                .get(id as usize)
                .ok_or_else(|| DecodeError(format!("unknown token id {id}")))?;
            if options.skip_special_tokens {
                out.push_str(&strip_special(piece));
            } else {
                out.push_str(piece);
            }
        }
        Ok(out)
    }
}

fn strip_special(piece: &str) -> String {
    piece.replace(TURN_OPEN, "").replace(TURN_CLOSE, "")
}

/// Deterministic pipeline that echoes the last user message.
pub struct MockPipeline {
    tokenizer: Arc<MockTokenizer>,
}

impl MockPipeline {
    fn render_prompt(messages: &[ChatMessage]) -> String {
        let mut prompt = String::new();
        for message in messages {
            prompt.push_str(TURN_OPEN);
            prompt.push_str(&message.role);
            prompt.push('\n');
            prompt.push_str(&message.content);
            prompt.push_str(TURN_CLOSE);
            prompt.push('\n');
        }
        prompt.push_str(TURN_OPEN);
        prompt.push_str("assistant\n");
        prompt
    }

    fn scripted_reply(messages: &[ChatMessage]) -> String {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("nothing");
        format!("You said: \"{last_user}\". How can I help further?")
    }
}

impl TextGenerationPipeline for MockPipeline {
    fn decoder(&self) -> Arc<dyn TokenDecoder> {
        self.tokenizer.clone()
    }

    fn generate(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
        streamer: &ResponseStreamer,
    ) -> Result<GenerationOutput, PipelineError> {
        let prompt = Self::render_prompt(messages);
        let reply = Self::scripted_reply(messages);

        let prompt_ids = self.tokenizer.encode(&prompt);
        let mut reply_ids = self.tokenizer.encode(&reply);
        reply_ids.truncate(options.max_new_tokens as usize);
        let tokens_generated = reply_ids.len();

        let mut ids = prompt_ids;
        ids.extend(&reply_ids);
        for batch in ids.chunks(4) {
            streamer.feed(batch);
        }
        streamer.finish();

        Ok(GenerationOutput {
            response: strip_special(&prompt) + &reply,
            tokens_generated,
        })
    }
}

/// Loader that fabricates a pipeline after a short scripted progress run.
#[derive(Default)]
pub struct MockLoader;

impl MockLoader {
    pub fn new() -> Self {
        Self
    }
}

impl PipelineLoader for MockLoader {
    fn load(
        &self,
        model: &str,
        progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<Arc<dyn TextGenerationPipeline>, PipelineError> {
        if model.contains("missing") {
            return Err(PipelineError::ModelLoad {
                model: model.to_string(),
                reason: "model not found".to_string(),
            });
        }

        let weights = "model.onnx".to_string();
        progress(ProgressEvent::Initiate {
            file: weights.clone(),
        });
        progress(ProgressEvent::Progress {
            file: weights.clone(),
            loaded: 4 * 1024 * 1024,
            total: Some(8 * 1024 * 1024),
        });
        progress(ProgressEvent::Progress {
            file: weights.clone(),
            loaded: 8 * 1024 * 1024,
            total: Some(8 * 1024 * 1024),
        });
        progress(ProgressEvent::Done { file: weights });
        progress(ProgressEvent::Loaded);

        Ok(Arc::new(MockPipeline {
            tokenizer: Arc::new(MockTokenizer::new()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streamer::{DisplaySink, StreamerOptions};

    #[test]
    fn decode_round_trips_interned_pieces() {
        let tokenizer = MockTokenizer::new();
        let ids = tokenizer.encode("hello there\nworld ");
        let text = tokenizer
            .decode(&ids, &DecodeOptions::default())
            .expect("decode");
        assert_eq!(text, "hello there\nworld ");
    }

    #[test]
    fn special_tokens_are_stripped_on_decode() {
        let tokenizer = MockTokenizer::new();
        let ids = tokenizer.encode("<|im_start|>assistant\nhi<|im_end|>\n");
        let text = tokenizer
            .decode(&ids, &DecodeOptions::default())
            .expect("decode");
        assert_eq!(text, "assistant\nhi\n");

        let verbatim = tokenizer
            .decode(
                &ids,
                &DecodeOptions {
                    skip_special_tokens: false,
                },
            )
            .expect("decode");
        assert_eq!(verbatim, "<|im_start|>assistant\nhi<|im_end|>\n");
    }

    #[test]
    fn generate_streams_only_the_reply() {
        let pipeline = MockPipeline {
            tokenizer: Arc::new(MockTokenizer::new()),
        };
        let finals: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let capture = finals.clone();
        let sink: DisplaySink = Box::new(move |text, is_final| {
            if is_final {
                capture
                    .lock()
                    .expect("final log poisoned")
                    .push(text.to_string());
            }
        });

        let streamer = ResponseStreamer::new(
            pipeline.decoder(),
            sink,
            StreamerOptions::default(),
        );
        let messages = vec![
            ChatMessage::new("system", "You are a helpful assistant."),
            ChatMessage::new("user", "ping"),
        ];
        let output = pipeline
            .generate(&messages, &GenerationOptions::default(), &streamer)
            .expect("generate");

        let finals = finals.lock().expect("final log poisoned");
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0], "You said: \"ping\". How can I help further?");
        assert!(output.tokens_generated > 0);
        assert!(output.response.contains("assistant\nYou said:"));
    }
}
