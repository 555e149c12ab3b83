use async_trait::async_trait;
use futures::future::join_all;
use tokio::select;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::{KvError, Result};
use crate::protocol::Message;
use crate::queue::{QueueService, ServiceState};

const CLIENT_BUFFER: usize = 64;

/// Channel-backed queue service
pub struct MemoryQueueService {
  state: ServiceState,
  inbox: Option<mpsc::Receiver<Message>>,
  outbox: Option<mpsc::Sender<Message>>,
  shutdown: watch::Sender<bool>,
  tasks: Vec<JoinHandle<()>>,
}

/// Client side of a [`MemoryQueueService`]
pub struct MemoryQueueClient {
  requests: mpsc::Sender<Message>,
  replies: mpsc::Receiver<Message>,
}

impl MemoryQueueService {
  pub fn new() -> (Self, MemoryQueueClient) {
    let (requests, inbox) = mpsc::channel(CLIENT_BUFFER);
    let (outbox, replies) = mpsc::channel(CLIENT_BUFFER);
    let (shutdown, _) = watch::channel(false);

    let service = Self {
      state: ServiceState::Created,
      inbox: Some(inbox),
      outbox: Some(outbox),
      shutdown,
      tasks: Vec::new(),
    };
    (service, MemoryQueueClient { requests, replies })
  }

  pub fn state(&self) -> ServiceState {
    self.state
  }
}

impl MemoryQueueClient {
  /// Publish a request
  pub async fn submit(&self, message: Message) -> Result<()> {
    self
      .requests
      .send(message)
      .await
      .map_err(|_| KvError::Transport("queue service is closed".to_string()))
  }

  /// Wait for the next reply; `None` once the service is closed
  pub async fn take_reply(&mut self) -> Option<Message> {
    self.replies.recv().await
  }
}

#[async_trait]
impl QueueService for MemoryQueueService {
  async fn initialize(&mut self) -> Result<()> {
    if self.state != ServiceState::Created {
      return Err(self.state.unexpected("initialize"));
    }
    self.state = ServiceState::Initialized;
    Ok(())
  }

  async fn run(
    &mut self,
    requests: mpsc::Sender<Message>,
    mut replies: mpsc::Receiver<Message>,
  ) -> Result<()> {
    if self.state != ServiceState::Initialized {
      return Err(self.state.unexpected("run"));
    }
    let (Some(mut inbox), Some(outbox)) = (self.inbox.take(), self.outbox.take()) else {
      return Err(KvError::Transport("client channels missing".to_string()));
    };

    let mut shutdown = self.shutdown.subscribe();
    self.tasks.push(tokio::spawn(async move {
      loop {
        let request = select! {
          _ = shutdown.changed() => break,
          request = inbox.recv() => request,
        };
        let Some(request) = request else { break };
        if requests.send(request).await.is_err() {
          debug!("request stream closed");
          break;
        }
      }
    }));

    let mut shutdown = self.shutdown.subscribe();
    self.tasks.push(tokio::spawn(async move {
      loop {
        let reply = select! {
          _ = shutdown.changed() => break,
          reply = replies.recv() => reply,
        };
        let Some(reply) = reply else { break };
        if let Err(e) = outbox.send(reply).await {
          warn!(
            correlation_id = %e.0.correlation_id,
            "client gone, dropping reply"
          );
        }
      }
    }));

    self.state = ServiceState::Running;
    Ok(())
  }

  async fn close(&mut self) -> Result<()> {
    if !matches!(
      self.state,
      ServiceState::Initialized | ServiceState::Running
    ) {
      return Err(self.state.unexpected("close"));
    }

    self.shutdown.send_replace(true);
    for result in join_all(self.tasks.drain(..)).await {
      if let Err(e) = result {
        error!("Queue service task failed: {}", e);
      }
    }
    self.inbox = None;
    self.outbox = None;
    self.state = ServiceState::Closed;
    Ok(())
  }
}
