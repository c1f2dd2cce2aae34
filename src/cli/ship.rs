use crate::appender::{Appender, AppenderError};
use crate::config::parse::{load_config, ConfigError};
use crate::config::types::AppenderConfig;
use crate::event::{Event, Payload, PayloadValue};
use crate::exception::{ExceptionCapture, Frame};
use chrono::{DateTime, Local};
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ShipError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("appender error: {0}")]
    Appender(#[from] AppenderError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Command-line overrides applied on top of the loaded config.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub urls: Vec<String>,
    pub index: Option<String>,
}

/// One line of input.
#[derive(Debug, Deserialize)]
pub struct InputEvent {
    pub level: String,
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Local>>,
    #[serde(default)]
    pub payload: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub exception: Option<InputException>,
}

#[derive(Debug, Deserialize)]
pub struct InputException {
    pub name: String,
    pub message: String,
    #[serde(default)]
    pub stack_trace: Vec<String>,
    #[serde(default)]
    pub cause: Option<Box<InputException>>,
}

impl From<InputException> for ExceptionCapture {
    fn from(input: InputException) -> Self {
        let capture = ExceptionCapture::new(input.name, input.message)
            .with_frames(input.stack_trace.iter().map(|raw| Frame::parse(raw)));
        match input.cause {
            Some(cause) => capture.with_cause((*cause).into()),
            None => capture,
        }
    }
}

impl From<InputEvent> for Event {
    fn from(input: InputEvent) -> Self {
        let mut event = match input.timestamp {
            Some(ts) => Event::at(input.level, input.message, ts),
            None => Event::new(input.level, input.message),
        };
        if let Some(exception) = input.exception {
            event = event.with_exception(exception.into());
        }
        if let Some(payload) = input.payload {
            let payload: Payload = payload
                .into_iter()
                .map(|(k, v)| (k, PayloadValue::from(v)))
                .collect();
            event = event.with_payload(payload);
        }
        event
    }
}

/// Parse one JSON input line into an event.
pub fn parse_line(line: &str) -> Result<Event, serde_json::Error> {
    let input: InputEvent = serde_json::from_str(line)?;
    Ok(input.into())
}

pub fn resolve_config(
    config_path: Option<PathBuf>,
    overrides: Overrides,
) -> Result<AppenderConfig, ConfigError> {
    let mut config = match config_path {
        Some(path) => {
            info!(config_path = %path.display(), "Loading configuration");
            load_config(&path)?
        }
        None => {
            info!("No config file found, using defaults");
            AppenderConfig::default()
        }
    };

    if !overrides.urls.is_empty() {
        config.urls = overrides.urls;
    }
    if let Some(index) = overrides.index {
        config.index = index;
    }
    Ok(config)
}

/// Read JSON events from stdin and ship them until EOF or Ctrl+C.
pub async fn run(config_path: Option<PathBuf>, overrides: Overrides) -> Result<(), ShipError> {
    let config = resolve_config(config_path, overrides)?;
    let appender = Appender::new(&config)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0u64;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }
                match parse_line(&line) {
                    Ok(event) => {
                        if let Err(e) = appender.log(event) {
                            warn!(line = line_no, error = %e, "Event rejected");
                        }
                    }
                    Err(e) => warn!(line = line_no, error = %e, "Skipping malformed input line"),
                }
            }
        }
    }

    let stats = appender.stats();
    appender.close().await?;
    info!(
        appended = stats.appended,
        dropped = stats.dropped,
        "Shipping complete"
    );
    Ok(())
}
