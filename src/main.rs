// Terminal front-end driving a chat session against the scripted pipeline.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, LevelFilter};
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use pipeline_chat::config::ChatConfig;
use pipeline_chat::mock::MockLoader;
use pipeline_chat::progress::ProgressEvent;
use pipeline_chat::session::{ChatSession, SessionState};
use pipeline_chat::streamer::DisplaySink;

const CONFIG_PATH: &str = "chat_config.json";
const DEFAULT_MODEL: &str = "mock/tiny-instruct";

fn init_logging() -> Result<()> {
    let logfile = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} [{l}] {m}{n}",
        )))
        .build("logs/repl.log")
        .context("failed to create log file appender")?;

    let config = Config::builder()
        .appender(Appender::builder().build("logfile", Box::new(logfile)))
        .build(Root::builder().appender("logfile").build(LevelFilter::Info))
        .context("invalid logging config")?;

    log4rs::init_config(config).context("failed to initialize logging")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let config = ChatConfig::load(CONFIG_PATH);
    let model = config
        .model_name
        .clone()
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let mut session = ChatSession::new(config);

    let loader = Arc::new(MockLoader::new());
    let progress: Box<dyn FnMut(ProgressEvent) + Send> = Box::new(|event| {
        println!("Status: {}", event.format_status());
    });
    session
        .load_model(loader, &model, progress)
        .await
        .with_context(|| format!("failed to load model {model}"))?;
    info!("model {model} loaded");
    println!("Model \"{model}\" loaded. You can start chatting (ctrl-d to quit).");

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() || session.state() != SessionState::Ready {
            continue;
        }

        print!("Assistant: ");
        io::stdout().flush()?;

        // The sink receives the whole visible reply each time; print only
        // what extends past what is already on screen.
        let mut printed = 0usize;
        let sink: DisplaySink = Box::new(move |text, is_final| {
            if text.len() > printed {
                print!("{}", &text[printed..]);
                let _ = io::stdout().flush();
                printed = text.len();
            }
            if is_final {
                println!();
            }
        });

        if let Err(e) = session.send_message(line, sink).await {
            eprintln!("Error generating response: {e}");
        }
    }

    info!("session ended with {} messages", session.history().len());
    Ok(())
}
