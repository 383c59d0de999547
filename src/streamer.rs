//! Incremental decoding filter that masks the chat-template preamble.
//!
//! Token batches arrive while the model generates. Each batch is decoded
//! and appended to a running buffer; nothing reaches the display sink
//! until the role marker (`"assistant\n"` by default) shows up in the
//! buffer. From then on every update re-emits the text after the LAST
//! marker occurrence, and `finish` delivers one guaranteed final call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::tokenizer::{DecodeOptions, TokenDecoder};
use crate::{log_debug, log_warn};

/// Display callback receiving the visible reply so far and a final flag.
///
/// Called repeatedly with monotonically-extending text until the final
/// call (`is_final == true`), after which no further calls occur for the
/// session. The sink runs inside the filter's critical section and must
/// not call back into the filter.
pub type DisplaySink = Box<dyn FnMut(&str, bool) + Send>;

/// Filter configuration, fixed at construction.
#[derive(Clone, Debug)]
pub struct StreamerOptions {
    /// Literal marking the start of the assistant reply in decoded output.
    /// Usually corresponds to the role name used in the prompt format.
    pub response_marker: String,
    /// Strip special/control tokens while decoding.
    pub skip_special_tokens: bool,
}

impl Default for StreamerOptions {
    fn default() -> Self {
        Self {
            response_marker: "assistant\n".to_string(),
            skip_special_tokens: true,
        }
    }
}

struct FilterState {
    /// Everything decoded so far, prompt/template text included.
    full_output: String,
    /// Set once the marker has been located; reset by `finish`.
    found_marker: bool,
    sink: DisplaySink,
}

/// Streaming response filter for one generation session.
///
/// The pipeline calls [`feed`](Self::feed) with each new token batch and
/// [`finish`](Self::finish) exactly once when generation completes or is
/// aborted. Construct a fresh instance per generation session: `finish`
/// resets the marker flag but intentionally leaves the buffer populated,
/// so reuse is unsupported.
pub struct ResponseStreamer {
    decoder: Arc<dyn TokenDecoder>,
    options: StreamerOptions,
    state: Mutex<FilterState>,
    /// At-most-one-in-flight latch for overlapping `feed` calls.
    decoding: AtomicBool,
}

impl ResponseStreamer {
    pub fn new(decoder: Arc<dyn TokenDecoder>, sink: DisplaySink, options: StreamerOptions) -> Self {
        Self {
            decoder,
            options,
            state: Mutex::new(FilterState {
                full_output: String::new(),
                found_marker: false,
                sink,
            }),
            decoding: AtomicBool::new(false),
        }
    }

    /// Decode a flat batch of token ids and stream the visible suffix.
    ///
    /// A call arriving while a previous one is still decoding is dropped
    /// silently rather than queued; the dropped batch is simply omitted.
    /// Decode failures are logged and ignored, the session continues.
    pub fn feed(&self, token_ids: &[u32]) {
        if self.decoding.swap(true, Ordering::Acquire) {
            log_debug!(
                "Streamer busy, dropping overlapping batch of {} tokens",
                token_ids.len()
            );
            return;
        }
        self.process(token_ids);
        self.decoding.store(false, Ordering::Release);
    }

    fn process(&self, token_ids: &[u32]) {
        if token_ids.is_empty() {
            return;
        }

        let decode_options = DecodeOptions {
            skip_special_tokens: self.options.skip_special_tokens,
        };
        let decoded = match self.decoder.decode(token_ids, &decode_options) {
            Ok(text) => text,
            Err(e) => {
                log_warn!("{e}. Continuing generation.");
                return;
            }
        };
        if decoded.is_empty() {
            return;
        }

        let marker = &self.options.response_marker;
        if let Ok(mut state) = self.state.lock() {
            state.full_output.push_str(&decoded);

            if !state.found_marker {
                // Search the entire accumulated output, not just this chunk:
                // the marker may have been completed across batch boundaries.
                if let Some(idx) = state.full_output.rfind(marker.as_str()) {
                    state.found_marker = true;
                    let visible = state.full_output[idx + marker.len()..].to_string();
                    log_debug!("Response marker found at byte {idx}, streaming started");
                    (state.sink)(&visible, false);
                }
            } else {
                // Re-locate the last occurrence each time so a late repeat of
                // the marker shifts the visible window rather than leaking it.
                let visible = match state.full_output.rfind(marker.as_str()) {
                    Some(idx) => state.full_output[idx + marker.len()..].to_string(),
                    None => {
                        log_warn!("Marker flag set but marker missing from buffer, showing raw output");
                        state.full_output.clone()
                    }
                };
                (state.sink)(&visible, false);
            }
        }
    }

    /// Deliver the final visible text and close the session.
    ///
    /// If the marker never appeared, the entire accumulated output is shown
    /// instead; the model likely ignored the prompt format, and raw output
    /// is more useful than nothing.
    pub fn finish(&self) {
        let marker = &self.options.response_marker;
        if let Ok(mut state) = self.state.lock() {
            let final_text = if state.found_marker {
                match state.full_output.rfind(marker.as_str()) {
                    Some(idx) => state.full_output[idx + marker.len()..].to_string(),
                    None => state.full_output.clone(),
                }
            } else {
                log_warn!(
                    "Response marker never appeared in {} chars of output, showing raw output",
                    state.full_output.len()
                );
                state.full_output.clone()
            };

            (state.sink)(&final_text, true);
            state.found_marker = false;
        }
    }

    /// Everything decoded so far, unfiltered.
    pub fn raw_output(&self) -> String {
        self.state
            .lock()
            .map(|state| state.full_output.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::DecodeError;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    /// Maps each token id to a fixed string piece.
    struct TableDecoder {
        pieces: Vec<&'static str>,
    }

    impl TokenDecoder for TableDecoder {
        fn decode(&self, token_ids: &[u32], _options: &DecodeOptions) -> Result<String, DecodeError> {
            let mut out = String::new();
            for &id in token_ids {
                let piece = self
                    .pieces
                    .get(id as usize)
                    .ok_or_else(|| DecodeError(format!("unknown token id {id}")))?;
                out.push_str(piece);
            }
            Ok(out)
        }
    }

    type SinkLog = Arc<Mutex<Vec<(String, bool)>>>;

    fn recording_sink() -> (SinkLog, DisplaySink) {
        let log: SinkLog = Arc::new(Mutex::new(Vec::new()));
        let writer = log.clone();
        let sink: DisplaySink = Box::new(move |text, is_final| {
            writer
                .lock()
                .expect("sink log poisoned")
                .push((text.to_string(), is_final));
        });
        (log, sink)
    }

    fn streamer_with(pieces: Vec<&'static str>) -> (SinkLog, ResponseStreamer) {
        let (log, sink) = recording_sink();
        let streamer = ResponseStreamer::new(
            Arc::new(TableDecoder { pieces }),
            sink,
            StreamerOptions::default(),
        );
        (log, streamer)
    }

    fn calls(log: &SinkLog) -> Vec<(String, bool)> {
        log.lock().expect("sink log poisoned").clone()
    }

    #[test]
    fn marker_then_reply_streams_suffix_only() {
        let (log, streamer) = streamer_with(vec!["Hello ", "assistant\n", "Hi there"]);

        streamer.feed(&[0]);
        assert!(calls(&log).is_empty(), "nothing visible before the marker");

        streamer.feed(&[1]);
        assert_eq!(calls(&log), vec![("".to_string(), false)]);

        streamer.feed(&[2]);
        assert_eq!(
            calls(&log).last(),
            Some(&("Hi there".to_string(), false))
        );

        streamer.finish();
        assert_eq!(calls(&log).last(), Some(&("Hi there".to_string(), true)));
        assert_eq!(calls(&log).len(), 3);
    }

    #[test]
    fn marker_split_across_batches() {
        let (log, streamer) = streamer_with(vec!["role: assist", "ant\n", "ok"]);

        streamer.feed(&[0]);
        streamer.feed(&[1]);
        // Marker completed by the second chunk; suffix is empty so far.
        assert_eq!(calls(&log), vec![("".to_string(), false)]);

        streamer.feed(&[2]);
        assert_eq!(calls(&log).last(), Some(&("ok".to_string(), false)));
    }

    #[test]
    fn missing_marker_degrades_to_raw_output() {
        let (log, streamer) = streamer_with(vec!["foo", "bar"]);

        streamer.feed(&[0]);
        streamer.feed(&[1]);
        assert!(calls(&log).is_empty());

        streamer.finish();
        assert_eq!(calls(&log), vec![("foobar".to_string(), true)]);
    }

    #[test]
    fn last_marker_occurrence_wins() {
        let (log, streamer) = streamer_with(vec!["assistant\n", "first reply ", "second reply"]);

        streamer.feed(&[0, 1]);
        assert_eq!(calls(&log).last(), Some(&("first reply ".to_string(), false)));

        // A second marker shifts the visible window to what follows it.
        streamer.feed(&[0, 2]);
        assert_eq!(calls(&log).last(), Some(&("second reply".to_string(), false)));

        streamer.finish();
        assert_eq!(calls(&log).last(), Some(&("second reply".to_string(), true)));
    }

    #[test]
    fn empty_batch_and_empty_decode_are_no_ops() {
        let (log, streamer) = streamer_with(vec!["", "assistant\n"]);

        streamer.feed(&[]);
        streamer.feed(&[0]); // decodes to ""
        assert!(calls(&log).is_empty());
        assert_eq!(streamer.raw_output(), "");

        streamer.feed(&[1]);
        assert_eq!(calls(&log).len(), 1);
    }

    #[test]
    fn decode_error_is_swallowed_and_session_continues() {
        let (log, streamer) = streamer_with(vec!["assistant\n", "ok"]);

        streamer.feed(&[99]); // unknown id -> DecodeError
        assert!(calls(&log).is_empty());
        assert_eq!(streamer.raw_output(), "");

        streamer.feed(&[0, 1]);
        assert_eq!(calls(&log).last(), Some(&("ok".to_string(), false)));
    }

    #[test]
    fn finish_is_exactly_one_sink_call() {
        let (log, streamer) = streamer_with(vec!["assistant\n", "done"]);
        streamer.feed(&[0, 1]);
        let before = calls(&log).len();
        streamer.finish();
        assert_eq!(calls(&log).len(), before + 1);
        assert_eq!(calls(&log).last(), Some(&("done".to_string(), true)));
    }

    #[test]
    fn custom_marker_is_respected() {
        let (log, sink) = recording_sink();
        let streamer = ResponseStreamer::new(
            Arc::new(TableDecoder {
                pieces: vec!["<|im_start|>assistant\n", "yo"],
            }),
            sink,
            StreamerOptions {
                response_marker: "<|im_start|>assistant\n".to_string(),
                skip_special_tokens: false,
            },
        );

        streamer.feed(&[0, 1]);
        assert_eq!(calls(&log), vec![("yo".to_string(), false)]);
    }

    /// Signals when decoding starts, then stalls so a second feed can race.
    struct SlowDecoder {
        started: mpsc::Sender<()>,
        decode_calls: AtomicUsize,
    }

    impl TokenDecoder for SlowDecoder {
        fn decode(&self, _token_ids: &[u32], _options: &DecodeOptions) -> Result<String, DecodeError> {
            self.decode_calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.started.send(());
            thread::sleep(Duration::from_millis(100));
            Ok("slow chunk".to_string())
        }
    }

    #[test]
    fn overlapping_feed_is_dropped_not_queued() {
        let (started_tx, started_rx) = mpsc::channel();
        let decoder = Arc::new(SlowDecoder {
            started: started_tx,
            decode_calls: AtomicUsize::new(0),
        });
        let (_log, sink) = recording_sink();
        let streamer = Arc::new(ResponseStreamer::new(
            decoder.clone(),
            sink,
            StreamerOptions::default(),
        ));

        let first = {
            let streamer = streamer.clone();
            thread::spawn(move || streamer.feed(&[1]))
        };

        // Wait until the first feed is inside decode, then race a second one.
        started_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("first feed never started decoding");
        streamer.feed(&[2]);

        first.join().expect("feeding thread panicked");

        assert_eq!(decoder.decode_calls.load(Ordering::SeqCst), 1);
        assert_eq!(streamer.raw_output(), "slow chunk");

        // The latch is released afterwards; later feeds process normally.
        streamer.feed(&[3]);
        assert_eq!(decoder.decode_calls.load(Ordering::SeqCst), 2);
        assert_eq!(streamer.raw_output(), "slow chunkslow chunk");
    }
}
