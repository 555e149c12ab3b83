//! ShardKV - a sharded in-memory key-value service
//!
//! Requests arrive from a queue service as text commands, are routed by key
//! onto a fixed pool of workers through a consistent hash ring, and are
//! executed against one shared insertion-ordered store. Every request gets
//! exactly one reply, sent back to the queue named in its `reply_to`.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod processor;
pub mod protocol;
pub mod queue;
pub mod ring;
pub mod store;
pub mod util;

pub use config::Config;
pub use dispatcher::Dispatcher;
pub use error::{KvError, Result};
pub use processor::{CommandProcessor, CommandsProcessor};
pub use store::{KeyValueStorage, OrderedMap};
