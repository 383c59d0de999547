//! Model download/load progress events.

use serde::Serialize;

/// Progress reported by the pipeline loader while a model downloads and
/// initializes. Serialized with a `status` tag so front-ends can forward
/// events as-is.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ProgressEvent {
    Initiate { file: String },
    Progress { file: String, loaded: u64, total: Option<u64> },
    Ready { file: String },
    Done { file: String },
    Loaded,
}

impl ProgressEvent {
    /// Human-readable status line for a status display.
    pub fn format_status(&self) -> String {
        match self {
            ProgressEvent::Initiate { .. } => "Initiating model loading...".to_string(),
            ProgressEvent::Progress { file, loaded, total } => {
                let percentage = match total {
                    Some(total) if *total > 0 => {
                        format!("{:.1}", *loaded as f64 / *total as f64 * 100.0)
                    }
                    _ => "??".to_string(),
                };
                let loaded_mb = *loaded as f64 / 1024.0 / 1024.0;
                let total_mb = match total {
                    Some(total) => format!("{:.1}", *total as f64 / 1024.0 / 1024.0),
                    None => "??".to_string(),
                };
                format!("Downloading {file}... {percentage}% ({loaded_mb:.1}MB / {total_mb}MB)")
            }
            ProgressEvent::Ready { file } => format!("Model file {file} ready."),
            ProgressEvent::Done { file } => {
                format!("Model file {file} downloaded successfully.")
            }
            ProgressEvent::Loaded => "Model weights loaded.".to_string(),
        }
    }
}
