use serde::{Deserialize, Serialize};
use std::fs;

use crate::error::{KvError, Result};

/// Log configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LogConfig {
  /// Log file path, if not set, logs will be printed to stdout
  pub file: Option<String>,
  /// Log level, default is "info"
  #[serde(default = "default_log_level")]
  pub level: String,
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      file: None,
      level: default_log_level(),
    }
  }
}

/// Queue service (broker) connection parameters
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueueConfig {
  /// Broker address
  #[serde(default = "default_queue_address")]
  pub address: String,
  /// Name of the inbound request queue
  #[serde(default = "default_queue_name")]
  pub queue_name: String,
}

fn default_queue_address() -> String {
  "127.0.0.1:5672".to_string()
}

fn default_queue_name() -> String {
  "rpc_queue".to_string()
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      address: default_queue_address(),
      queue_name: default_queue_name(),
    }
  }
}

/// ShardKV configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
  /// Size of the worker pool, also the number of virtual nodes per worker
  #[serde(default = "default_workers_count")]
  pub processing_workers_count: usize,

  /// Queue service configuration
  #[serde(default)]
  pub queue: QueueConfig,

  /// Log configuration
  #[serde(default)]
  pub log: LogConfig,
}

fn default_workers_count() -> usize {
  4
}

impl Default for Config {
  fn default() -> Self {
    Self {
      processing_workers_count: default_workers_count(),
      queue: QueueConfig::default(),
      log: LogConfig::default(),
    }
  }
}

impl Config {
  /// Load configuration from TOML file
  pub fn from_file(path: &str) -> Result<Self> {
    let config_str = fs::read_to_string(path)
      .map_err(|e| KvError::Config(format!("Failed to read config file '{}': {}", path, e)))?;

    Self::from_toml(&config_str)
      .map_err(|e| KvError::Config(format!("Failed to parse config file '{}': {}", path, e)))
  }

  /// Parse configuration from a TOML string
  pub fn from_toml(config_str: &str) -> std::result::Result<Self, toml::de::Error> {
    toml::from_str(config_str)
  }

  /// Load the file if given (defaults otherwise) and apply environment
  /// overrides. Callers validate once their own overrides are applied.
  pub fn load(path: Option<&str>) -> Result<Self> {
    let mut config = match path {
      Some(path) => Self::from_file(path)?,
      None => Self::default(),
    };
    config.apply_env(std::env::vars())?;
    Ok(config)
  }

  /// Override settings from `PROCESSING_WORKERS_COUNT`, `QUEUE_ADDRESS` and
  /// `QUEUE_NAME`; other variables are ignored
  pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
  where
    I: IntoIterator<Item = (String, String)>,
  {
    for (name, value) in vars {
      match name.as_str() {
        "PROCESSING_WORKERS_COUNT" => {
          self.processing_workers_count = value.trim().parse().map_err(|e| {
            KvError::Config(format!("invalid PROCESSING_WORKERS_COUNT '{}': {}", value, e))
          })?;
        }
        "QUEUE_ADDRESS" => self.queue.address = value,
        "QUEUE_NAME" => self.queue.queue_name = value,
        _ => {}
      }
    }
    Ok(())
  }

  pub fn validate(&self) -> Result<()> {
    if self.processing_workers_count == 0 {
      return Err(KvError::Config(
        "processing_workers_count must be positive".to_string(),
      ));
    }
    if self.queue.queue_name.is_empty() {
      return Err(KvError::Config("queue.queue_name must not be empty".to_string()));
    }
    Ok(())
  }
}
