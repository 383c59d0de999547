use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

const LOG_PATH: &str = "logs/pipeline_chat.log";

/// Append-only file logger shared by the whole library.
///
/// If the log file cannot be opened (read-only filesystem, missing
/// permissions) the logger degrades to stderr instead of failing startup.
pub struct Logger {
    file: Option<Mutex<File>>,
}

impl Logger {
    pub fn new(log_path: &str) -> Self {
        let file = Self::open(log_path);
        if file.is_none() {
            eprintln!("Could not open {log_path}, logging to stderr");
        }
        Logger {
            file: file.map(Mutex::new),
        }
    }

    fn open(log_path: &str) -> Option<File> {
        if let Some(parent) = Path::new(log_path).parent() {
            std::fs::create_dir_all(parent).ok()?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .ok()
    }

    pub fn log(&self, level: &str, message: &str) {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let log_line = format!("[{timestamp}] [{level}] {message}\n");

        match self.file {
            Some(ref file) => {
                if let Ok(mut file) = file.lock() {
                    let _ = file.write_all(log_line.as_bytes());
                    let _ = file.flush();
                }
            }
            None => eprint!("{log_line}"),
        }
    }
}

// Global logger instance
lazy_static::lazy_static! {
    pub static ref LOGGER: Logger = Logger::new(LOG_PATH);
}

// Convenience macros
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logger::LOGGER.log("DEBUG", &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::LOGGER.log("INFO", &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::LOGGER.log("WARN", &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logger::LOGGER.log("ERROR", &format!($($arg)*));
    };
}
