//! Queue service boundary
//!
//! A queue service feeds inbound requests from a broker into the pipeline and
//! delivers the pipeline's replies back to it. Two implementations live here:
//!
//! - [`tcp::TcpQueueService`] accepts client connections speaking the
//!   line-delimited JSON protocol in [`wire`].
//! - [`memory::MemoryQueueService`] is backed by channels, for tests and for
//!   embedding the pipeline in-process.

pub mod memory;
pub mod tcp;
pub mod wire;

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{KvError, Result};
use crate::protocol::Message;

pub use memory::{MemoryQueueClient, MemoryQueueService};
pub use tcp::TcpQueueService;

/// Transport feeding the dispatcher.
///
/// `initialize` must succeed before `run`. Once running, each reply read from
/// `replies` is delivered at most once; delivery failures are logged and the
/// reply is dropped.
#[async_trait]
pub trait QueueService: Send {
    /// Connect to the broker and prepare to consume requests
    async fn initialize(&mut self) -> Result<()>;

    /// Start forwarding requests into `requests` and delivering `replies`.
    /// Returns once the forwarding tasks are running.
    async fn run(
        &mut self,
        requests: mpsc::Sender<Message>,
        replies: mpsc::Receiver<Message>,
    ) -> Result<()>;

    /// Stop forwarding and release broker resources
    async fn close(&mut self) -> Result<()>;
}

/// Lifecycle shared by the queue service implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Initialized,
    Running,
    Closed,
}

impl ServiceState {
    /// Error for an operation attempted in the wrong state
    pub(crate) fn unexpected(self, operation: &str) -> KvError {
        KvError::Transport(format!("cannot {} a queue service that is {}", operation, self))
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::Created => "not initialized",
            ServiceState::Initialized => "initialized",
            ServiceState::Running => "running",
            ServiceState::Closed => "closed",
        };
        f.write_str(name)
    }
}
