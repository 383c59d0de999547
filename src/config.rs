//! JSON-file configuration with per-field defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::log_warn;
use crate::pipeline::GenerationOptions;
use crate::streamer::StreamerOptions;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChatConfig {
    /// Model to load on startup (front-ends may override interactively).
    pub model_name: Option<String>,
    /// System prompt injected when the conversation has none.
    /// `None` falls back to [`DEFAULT_SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,
    /// Role-delimiter literal after which the assistant reply begins.
    #[serde(default = "default_response_marker")]
    pub response_marker: String,
    #[serde(default = "default_true")]
    pub skip_special_tokens: bool,
    // Generation parameters
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,
    #[serde(default = "default_true")]
    pub do_sample: bool,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
}

fn default_response_marker() -> String {
    "assistant\n".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_new_tokens() -> u32 {
    512
}

fn default_temperature() -> f64 {
    0.7
}

fn default_top_k() -> u32 {
    50
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model_name: None,
            system_prompt: None,
            response_marker: default_response_marker(),
            skip_special_tokens: default_true(),
            max_new_tokens: default_max_new_tokens(),
            do_sample: default_true(),
            temperature: default_temperature(),
            top_k: default_top_k(),
        }
    }
}

impl ChatConfig {
    /// Load from a JSON file, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    log_warn!("Invalid config at {}: {e}. Using defaults.", path.display());
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, json)
    }

    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            max_new_tokens: self.max_new_tokens,
            do_sample: self.do_sample,
            temperature: self.temperature,
            top_k: self.top_k,
        }
    }

    pub fn streamer_options(&self) -> StreamerOptions {
        StreamerOptions {
            response_marker: self.response_marker.clone(),
            skip_special_tokens: self.skip_special_tokens,
        }
    }
}
