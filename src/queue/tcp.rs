use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::{KvError, Result};
use crate::protocol::Message;
use crate::queue::wire::{ClientFrame, ServerFrame, read_frame, write_frame};
use crate::queue::{QueueService, ServiceState};

/// Replies buffered per connection before the publisher waits on it
const DELIVERY_BUFFER: usize = 64;

/// Queue service acting as a small TCP broker.
///
/// Clients publish requests to the configured queue name and declare named
/// reply queues; each reply is routed to the connection that declared its
/// `reply_to` queue. Replies for undeclared queues are dropped.
pub struct TcpQueueService {
  config: QueueConfig,
  state: ServiceState,
  listener: Option<TcpListener>,
  local_addr: Option<SocketAddr>,
  consumers: Arc<Consumers>,
  shutdown: watch::Sender<bool>,
  tasks: Vec<JoinHandle<()>>,
}

impl TcpQueueService {
  pub fn new(config: QueueConfig) -> Self {
    let (shutdown, _) = watch::channel(false);
    Self {
      config,
      state: ServiceState::Created,
      listener: None,
      local_addr: None,
      consumers: Arc::new(Consumers::default()),
      shutdown,
      tasks: Vec::new(),
    }
  }

  /// Bound address, available once initialized
  pub fn local_addr(&self) -> Option<SocketAddr> {
    self.local_addr
  }

  pub fn state(&self) -> ServiceState {
    self.state
  }
}

#[async_trait]
impl QueueService for TcpQueueService {
  async fn initialize(&mut self) -> Result<()> {
    if self.state != ServiceState::Created {
      return Err(self.state.unexpected("initialize"));
    }

    let listener = TcpListener::bind(&self.config.address).await.map_err(|e| {
      KvError::Transport(format!("failed to bind {}: {}", self.config.address, e))
    })?;
    let local_addr = listener.local_addr()?;
    info!("Queue service bound to {}", local_addr);

    self.listener = Some(listener);
    self.local_addr = Some(local_addr);
    self.state = ServiceState::Initialized;
    Ok(())
  }

  async fn run(
    &mut self,
    requests: mpsc::Sender<Message>,
    replies: mpsc::Receiver<Message>,
  ) -> Result<()> {
    if self.state != ServiceState::Initialized {
      return Err(self.state.unexpected("run"));
    }
    let listener = self
      .listener
      .take()
      .ok_or_else(|| KvError::Transport("listener missing".to_string()))?;

    let receiver = run_receiver(
      listener,
      Arc::from(self.config.queue_name.as_str()),
      requests,
      Arc::clone(&self.consumers),
      self.shutdown.subscribe(),
    );
    let sender = run_sender(
      replies,
      Arc::clone(&self.consumers),
      self.shutdown.subscribe(),
    );
    self.tasks.push(tokio::spawn(receiver));
    self.tasks.push(tokio::spawn(sender));

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

    info!("Closing queue service");
    self.shutdown.send_replace(true);
    for result in join_all(self.tasks.drain(..)).await {
      if let Err(e) = result {
        error!("Queue service task failed: {}", e);
      }
    }
    self.listener = None;
    self.consumers.clear().await;
    self.state = ServiceState::Closed;
    Ok(())
  }
}

/// Reply queues declared by connected clients
#[derive(Default)]
struct Consumers {
  queues: Mutex<HashMap<String, mpsc::Sender<Message>>>,
}

impl Consumers {
  async fn register(&self, queue: String, deliveries: mpsc::Sender<Message>) {
    let mut queues = self.queues.lock().await;
    if queues.insert(queue.clone(), deliveries).is_some() {
      debug!(queue = %queue, "reply queue taken over by a new consumer");
    }
  }

  /// Remove `queue` if it still belongs to `deliveries`
  async fn unregister(&self, queue: &str, deliveries: &mpsc::Sender<Message>) {
    let mut queues = self.queues.lock().await;
    if queues
      .get(queue)
      .is_some_and(|current| current.same_channel(deliveries))
    {
      queues.remove(queue);
    }
  }

  async fn deliver(&self, reply: Message) {
    let consumer = self.queues.lock().await.get(&reply.reply_to).cloned();
    let Some(consumer) = consumer else {
      warn!(
        reply_to = %reply.reply_to,
        correlation_id = %reply.correlation_id,
        "no consumer for reply queue, dropping reply"
      );
      return;
    };

    if let Err(e) = consumer.send(reply).await {
      warn!(
        reply_to = %e.0.reply_to,
        correlation_id = %e.0.correlation_id,
        "consumer disconnected, dropping reply"
      );
    }
  }

  async fn clear(&self) {
    self.queues.lock().await.clear();
  }
}

/// Accept connections and forward their published requests
async fn run_receiver(
  listener: TcpListener,
  queue_name: Arc<str>,
  requests: mpsc::Sender<Message>,
  consumers: Arc<Consumers>,
  mut shutdown: watch::Receiver<bool>,
) {
  info!(queue = %queue_name, "Consuming requests");

  loop {
    select! {
      _ = shutdown.changed() => break,
      accepted = listener.accept() => match accepted {
        Ok((stream, peer)) => {
          info!("New connection accepted from {}", peer);
          let queue_name = Arc::clone(&queue_name);
          let requests = requests.clone();
          let consumers = Arc::clone(&consumers);
          let shutdown = shutdown.clone();
          tokio::spawn(async move {
            if let Err(e) =
              handle_connection(stream, peer, queue_name, requests, consumers, shutdown).await
            {
              warn!("Connection from {} closed with error: {}", peer, e);
            }
          });
        }
        Err(e) => {
          error!("Failed to accept connection: {}", e);
        }
      }
    }
  }

  info!("Consumer stopped");
}

/// Deliver replies to the connections that declared their queues
async fn run_sender(
  mut replies: mpsc::Receiver<Message>,
  consumers: Arc<Consumers>,
  mut shutdown: watch::Receiver<bool>,
) {
  loop {
    let reply = select! {
      _ = shutdown.changed() => break,
      reply = replies.recv() => reply,
    };
    match reply {
      Some(reply) => consumers.deliver(reply).await,
      None => break,
    }
  }

  info!("Publisher stopped");
}

async fn handle_connection(
  stream: TcpStream,
  peer: SocketAddr,
  queue_name: Arc<str>,
  requests: mpsc::Sender<Message>,
  consumers: Arc<Consumers>,
  mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
  let (reader, mut writer) = stream.into_split();
  let mut reader = BufReader::new(reader);
  let (deliveries, mut outbox) = mpsc::channel::<Message>(DELIVERY_BUFFER);

  let writer_task = tokio::spawn(async move {
    while let Some(message) = outbox.recv().await {
      if let Err(e) = write_frame(&mut writer, &ServerFrame::Delivery { message }).await {
        warn!("Failed to write reply to {}: {}", peer, e);
        break;
      }
    }
  });

  let mut declared = Vec::new();
  let result = loop {
    let frame = select! {
      _ = shutdown.changed() => break Ok(()),
      frame = read_frame::<_, ClientFrame>(&mut reader) => frame,
    };

    match frame {
      Ok(Some(ClientFrame::Declare { queue })) => {
        debug!(peer = %peer, queue = %queue, "reply queue declared");
        consumers.register(queue.clone(), deliveries.clone()).await;
        declared.push(queue);
      }
      Ok(Some(ClientFrame::Publish { queue, message })) => {
        if queue != *queue_name {
          warn!(peer = %peer, queue = %queue, "publish to unknown queue, dropping message");
          continue;
        }
        debug!(peer = %peer, body = %message.body, "received request");
        if requests.send(message).await.is_err() {
          warn!("Request stream closed, dropping connection from {}", peer);
          break Ok(());
        }
      }
      Ok(None) => break Ok(()),
      Err(e) => break Err(e),
    }
  };

  for queue in &declared {
    consumers.unregister(queue, &deliveries).await;
  }
  drop(deliveries);
  let _ = writer_task.await;

  info!("Connection closed by client: {}", peer);
  result
}
