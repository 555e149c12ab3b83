//! Sharded worker pool.
//!
//! A single routing loop reads inbound requests, extracts each command's
//! shard key and forwards the request to the worker owning that key on a
//! consistent hash ring. Every worker drains its own FIFO channel, so
//! commands touching the same key are applied in the order they arrived even
//! though the workers share one store and run concurrently.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::select;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{KvError, Result};
use crate::processor::CommandsProcessor;
use crate::protocol::{CommandsParser, Message};
use crate::ring::ConsistentHash;

/// Worker that receives commands without a shard key (`getAllItems()`)
pub const DESIGNATED_WORKER: usize = 0;

/// Per-worker channel capacity. A single slot keeps a slow worker
/// throttling the routing loop instead of letting requests pile up.
const WORKER_CHANNEL_CAPACITY: usize = 1;

pub struct Dispatcher {
    workers_count: usize,
    parser: Arc<dyn CommandsParser>,
    processor: Arc<dyn CommandsProcessor>,
}

impl Dispatcher {
    /// Create a dispatcher for a pool of `workers_count` workers.
    ///
    /// Fails if the pool would be empty.
    pub fn new(
        workers_count: usize,
        parser: Arc<dyn CommandsParser>,
        processor: Arc<dyn CommandsProcessor>,
    ) -> Result<Self> {
        if workers_count == 0 {
            return Err(KvError::Config(
                "worker pool size must be positive".to_string(),
            ));
        }

        Ok(Self {
            workers_count,
            parser,
            processor,
        })
    }

    pub fn workers_count(&self) -> usize {
        self.workers_count
    }

    /// Ring with workers `0..workers_count`, each with `workers_count`
    /// virtual nodes
    pub fn build_ring(workers_count: usize) -> ConsistentHash {
        let mut ring = ConsistentHash::new(workers_count, None);
        ring.add((0..workers_count).map(|id| id.to_string()));
        ring
    }

    /// Run the pool until `shutdown` resolves or `requests` is closed.
    ///
    /// Replies are sent on `replies` in completion order. Once the loop stops,
    /// `requests` is closed so later sends fail, requests already buffered are
    /// still routed, every worker channel is closed and drained, and all
    /// workers are joined before this returns.
    pub async fn run<F>(
        &self,
        mut requests: mpsc::Receiver<Message>,
        replies: mpsc::Sender<Message>,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let ring = Self::build_ring(self.workers_count);

        let mut senders = Vec::with_capacity(self.workers_count);
        let mut handles = Vec::with_capacity(self.workers_count);
        for worker_id in 0..self.workers_count {
            let (tx, rx) = mpsc::channel(WORKER_CHANNEL_CAPACITY);
            senders.push(tx);
            handles.push(tokio::spawn(worker_loop(
                worker_id,
                rx,
                Arc::clone(&self.processor),
                replies.clone(),
            )));
        }

        info!(
            workers = self.workers_count,
            virtual_nodes = ring.len(),
            "dispatcher started"
        );

        tokio::pin!(shutdown);
        loop {
            select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, no longer accepting requests");
                    break;
                }
                request = requests.recv() => match request {
                    Some(request) => self.route(&ring, &senders, &replies, request).await,
                    None => {
                        info!("inbound request stream closed");
                        break;
                    }
                }
            }
        }

        // Refuse new requests; those already buffered were accepted and are
        // still routed so each of them gets a reply
        requests.close();
        while let Some(request) = requests.recv().await {
            self.route(&ring, &senders, &replies, request).await;
        }

        // Closing the channels lets each worker finish its queue and exit
        drop(senders);
        drop(replies);
        for (worker_id, result) in join_all(handles).await.into_iter().enumerate() {
            if let Err(e) = result {
                error!(worker = worker_id, error = %e, "worker task failed");
            }
        }

        info!("dispatcher terminated");
        Ok(())
    }

    /// Pick the worker for a request body
    pub fn select_worker(&self, ring: &ConsistentHash, body: &str) -> Result<usize> {
        let key = self.parser.command_id(body)?;
        if key.is_empty() {
            return Ok(DESIGNATED_WORKER);
        }

        let worker = ring.get(&key).ok_or_else(|| KvError::NoWorker(key.clone()))?;
        worker
            .parse::<usize>()
            .ok()
            .filter(|&id| id < self.workers_count)
            .ok_or_else(|| KvError::InvalidWorkerId(worker.to_string()))
    }

    async fn route(
        &self,
        ring: &ConsistentHash,
        senders: &[mpsc::Sender<Message>],
        replies: &mpsc::Sender<Message>,
        request: Message,
    ) {
        let worker_id = match self.select_worker(ring, &request.body) {
            Ok(worker_id) => worker_id,
            Err(e) => {
                warn!(
                    correlation_id = %request.correlation_id,
                    error = %e,
                    "failed to route request"
                );
                let body = match e {
                    KvError::MalformedCommand(_) => format!("Failed to get command ID: {}", e),
                    _ => format!("Failed to route command: {}", e),
                };
                if replies.send(request.reply(body)).await.is_err() {
                    warn!("reply stream closed, dropping routing failure reply");
                }
                return;
            }
        };

        debug!(
            worker = worker_id,
            correlation_id = %request.correlation_id,
            "routing request"
        );
        if let Err(e) = senders[worker_id].send(request).await {
            error!(
                worker = worker_id,
                correlation_id = %e.0.correlation_id,
                "worker channel closed, dropping request"
            );
        }
    }
}

/// Idle until a request arrives, process it, emit the reply, repeat. Exits
/// once the channel is closed and drained.
async fn worker_loop(
    worker_id: usize,
    mut requests: mpsc::Receiver<Message>,
    processor: Arc<dyn CommandsProcessor>,
    replies: mpsc::Sender<Message>,
) {
    debug!(worker = worker_id, "worker started");

    while let Some(request) = requests.recv().await {
        let reply = processor.process(worker_id, &request);
        if replies.send(reply).await.is_err() {
            warn!(
                worker = worker_id,
                correlation_id = %request.correlation_id,
                "reply stream closed, dropping reply"
            );
        }
    }

    debug!(worker = worker_id, "worker terminated");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MockParser;

    impl CommandsParser for MockParser {
        fn parse_command(&self, _text: &str) -> Result<crate::protocol::Command> {
            unimplemented!("the dispatcher only routes")
        }

        fn command_id(&self, text: &str) -> Result<String> {
            match text {
                "invalid" => Err(KvError::MalformedCommand("invalid command".to_string())),
                "all" => Ok(String::new()),
                other => Ok(other.split(':').next().unwrap_or_default().to_string()),
            }
        }
    }

    /// Echoes requests and records which worker saw which body
    #[derive(Default)]
    struct RecordingProcessor {
        seen: Mutex<Vec<(usize, String)>>,
    }

    impl CommandsProcessor for RecordingProcessor {
        fn process(&self, worker_id: usize, request: &Message) -> Message {
            self.seen
                .lock()
                .unwrap()
                .push((worker_id, request.body.clone()));
            if request.body == "processError" {
                return request.reply("error");
            }
            request.reply(format!("processed: {}", request.body))
        }
    }

    fn dispatcher(workers: usize, processor: Arc<RecordingProcessor>) -> Dispatcher {
        Dispatcher::new(workers, Arc::new(MockParser), processor).unwrap()
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = Dispatcher::new(
            0,
            Arc::new(MockParser),
            Arc::new(RecordingProcessor::default()),
        );
        assert!(matches!(result, Err(KvError::Config(_))));

        let dispatcher = dispatcher(3, Arc::new(RecordingProcessor::default()));
        assert_eq!(dispatcher.workers_count(), 3);
    }

    #[test]
    fn test_select_worker() {
        let dispatcher = dispatcher(4, Arc::new(RecordingProcessor::default()));
        let ring = Dispatcher::build_ring(4);

        assert_eq!(
            dispatcher.select_worker(&ring, "all").unwrap(),
            DESIGNATED_WORKER
        );
        assert!(matches!(
            dispatcher.select_worker(&ring, "invalid"),
            Err(KvError::MalformedCommand(_))
        ));

        for i in 0..100 {
            let key = format!("key{}", i);
            let worker = dispatcher.select_worker(&ring, &key).unwrap();
            assert!(worker < 4);
            assert_eq!(ring.get(&key), Some(worker.to_string().as_str()));
        }
    }

    #[test]
    fn test_select_worker_on_empty_ring() {
        let dispatcher = dispatcher(2, Arc::new(RecordingProcessor::default()));
        let ring = ConsistentHash::new(2, None);
        assert!(matches!(
            dispatcher.select_worker(&ring, "key"),
            Err(KvError::NoWorker(_))
        ));
    }

    #[test]
    fn test_select_worker_rejects_unknown_worker_id() {
        let dispatcher = dispatcher(2, Arc::new(RecordingProcessor::default()));
        let mut ring = ConsistentHash::new(1, None);
        ring.add(["not-a-worker"]);
        assert!(matches!(
            dispatcher.select_worker(&ring, "key"),
            Err(KvError::InvalidWorkerId(_))
        ));
    }

    #[tokio::test]
    async fn test_run_replies_to_each_request() {
        let processor = Arc::new(RecordingProcessor::default());
        let dispatcher = dispatcher(3, Arc::clone(&processor));

        let (requests_tx, requests_rx) = mpsc::channel(10);
        let (replies_tx, mut replies_rx) = mpsc::channel(10);
        let pool = tokio::spawn(async move {
            dispatcher
                .run(requests_rx, replies_tx, std::future::pending())
                .await
        });

        let cases = [
            ("command1", "processed: command1"),
            ("command2", "processed: command2"),
            (
                "invalid",
                "Failed to get command ID: invalid command format: invalid command",
            ),
            ("processError", "error"),
        ];
        for (i, (body, expected)) in cases.into_iter().enumerate() {
            let correlation_id = i.to_string();
            requests_tx
                .send(Message::new(body, "replies", correlation_id.clone()))
                .await
                .unwrap();
            let reply = replies_rx.recv().await.unwrap();
            assert_eq!(reply.body, expected);
            assert_eq!(reply.reply_to, "replies");
            assert_eq!(reply.correlation_id, correlation_id);
        }

        drop(requests_tx);
        pool.await.unwrap().unwrap();
        assert!(replies_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_same_key_goes_to_same_worker_in_order() {
        let processor = Arc::new(RecordingProcessor::default());
        let dispatcher = dispatcher(4, Arc::clone(&processor));

        let (requests_tx, requests_rx) = mpsc::channel(16);
        let (replies_tx, mut replies_rx) = mpsc::channel(16);
        let pool = tokio::spawn(async move {
            dispatcher
                .run(requests_rx, replies_tx, std::future::pending())
                .await
        });

        let collector = tokio::spawn(async move {
            let mut received = 0;
            while replies_rx.recv().await.is_some() {
                received += 1;
            }
            received
        });

        let mut sent = 0;
        for seq in 0..50 {
            for key in ["alpha", "beta", "gamma", "delta"] {
                requests_tx
                    .send(Message::new(format!("{}:{}", key, seq), "", ""))
                    .await
                    .unwrap();
                sent += 1;
            }
        }
        drop(requests_tx);

        pool.await.unwrap().unwrap();
        assert_eq!(collector.await.unwrap(), sent);

        let seen = processor.seen.lock().unwrap();
        let mut per_key: HashMap<String, Vec<(usize, u32)>> = HashMap::new();
        for (worker, body) in seen.iter() {
            let (key, seq) = body.split_once(':').unwrap();
            per_key
                .entry(key.to_string())
                .or_default()
                .push((*worker, seq.parse().unwrap()));
        }

        for (key, entries) in per_key {
            let worker = entries[0].0;
            assert!(
                entries.iter().all(|(w, _)| *w == worker),
                "key {} split across workers",
                key
            );
            let seqs: Vec<u32> = entries.iter().map(|(_, seq)| *seq).collect();
            assert_eq!(seqs, (0..50).collect::<Vec<_>>(), "key {} out of order", key);
        }
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_work() {
        let processor = Arc::new(RecordingProcessor::default());
        let dispatcher = dispatcher(2, Arc::clone(&processor));

        let (requests_tx, requests_rx) = mpsc::channel(8);
        // Unread single-slot reply channel keeps the worker backed up
        let (replies_tx, mut replies_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let pool = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            dispatcher.run(requests_rx, replies_tx, shutdown).await
        });

        for seq in 1..=3 {
            requests_tx
                .send(Message::new(format!("k:{}", seq), "", seq.to_string()))
                .await
                .unwrap();
        }
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !requests_tx.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("request stream should close on shutdown");
        assert!(requests_tx.send(Message::new("k:late", "", "late")).await.is_err());

        let mut bodies = Vec::new();
        while let Some(reply) = replies_rx.recv().await {
            bodies.push(reply.body);
        }
        pool.await.unwrap().unwrap();

        assert_eq!(
            bodies,
            vec!["processed: k:1", "processed: k:2", "processed: k:3"]
        );
        assert!(
            processor
                .seen
                .lock()
                .unwrap()
                .iter()
                .all(|(_, body)| body != "k:late")
        );
    }
}
