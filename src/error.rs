//! Error types shared by the dispatch pipeline, the transports and config
//! loading.

use thiserror::Error;

/// Errors produced by ShardKV components
#[derive(Debug, Error)]
pub enum KvError {
    /// Text does not match any of the recognised command forms
    #[error("invalid command format: {0}")]
    MalformedCommand(String),

    /// The hash ring has no workers to route to
    #[error("no worker available for key '{0}'")]
    NoWorker(String),

    /// The ring returned a worker identity that is not a pool index
    #[error("invalid worker id '{0}'")]
    InvalidWorkerId(String),

    #[error("failed to encode items to JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    LockPoisoned,

    /// Broker connect/consume/publish failure
    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KvError>;
