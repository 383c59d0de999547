//! Boundary to the external tokenizer capability.
//!
//! The pipeline owns the real tokenizer; this crate only ever asks it to
//! turn a flat batch of token ids back into text.

use thiserror::Error;

/// Malformed token batch. Callers recover locally; never fatal.
#[derive(Debug, Error)]
#[error("failed to decode token batch: {0}")]
pub struct DecodeError(pub String);

/// Options forwarded to the decode capability.
#[derive(Clone, Copy, Debug)]
pub struct DecodeOptions {
    /// Strip special/control tokens (role delimiters, EOS markers) from the
    /// decoded text.
    pub skip_special_tokens: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            skip_special_tokens: true,
        }
    }
}

/// Decodes flat batches of token ids into text.
pub trait TokenDecoder: Send + Sync {
    fn decode(&self, token_ids: &[u32], options: &DecodeOptions) -> Result<String, DecodeError>;
}
