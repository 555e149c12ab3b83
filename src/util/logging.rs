//! Logging setup

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;
use crate::error::{KvError, Result};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `config.level`. When `config.file` is set, logs are
/// appended to that file without ANSI colours.
pub fn init(config: &LogConfig) -> Result<()> {
  let filter = env_filter(&config.level);
  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(true)
    .with_thread_ids(true);

  let installed = match &config.file {
    Some(path) => {
      let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| KvError::Config(format!("Failed to open log file '{}': {}", path, e)))?;
      builder
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
    }
    None => builder.try_init(),
  };

  installed.map_err(|e| KvError::Config(format!("Failed to install logger: {}", e)))
}

fn env_filter(level: &str) -> EnvFilter {
  EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}
