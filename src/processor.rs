use std::sync::{Arc, RwLock};

use tracing::{debug, error, warn};

use crate::error::{KvError, Result};
use crate::protocol::{Command, CommandKind, CommandsParser, Message};
use crate::store::KeyValueStorage;

/// Reply body for commands that only mutate the store
pub const ACK: &str = "OK";

/// Command execution capability used by the dispatcher's workers
pub trait CommandsProcessor: Send + Sync {
    /// Execute one request and build exactly one reply for it
    fn process(&self, worker_id: usize, request: &Message) -> Message;
}

/// Executes commands against a store shared by every worker.
///
/// The store sits behind a read/write lock: `addItem`/`deleteItem` take it
/// exclusively, `getItem`/`getAllItems` share it, so a full scan never sees a
/// half-applied write.
pub struct CommandProcessor<P, S> {
    parser: P,
    store: Arc<RwLock<S>>,
}

impl<P, S> CommandProcessor<P, S>
where
    P: CommandsParser,
    S: KeyValueStorage,
{
    pub fn new(parser: P, store: Arc<RwLock<S>>) -> Self {
        Self { parser, store }
    }

    /// Run a parsed command and return the reply body
    pub fn execute(&self, cmd: &Command) -> Result<String> {
        match cmd.kind {
            CommandKind::AddItem => {
                let mut store = self.store.write().map_err(|_| KvError::LockPoisoned)?;
                store.add(cmd.key.clone(), cmd.value.clone());
                Ok(ACK.to_string())
            }
            CommandKind::DeleteItem => {
                let mut store = self.store.write().map_err(|_| KvError::LockPoisoned)?;
                store.remove(&cmd.key);
                Ok(ACK.to_string())
            }
            CommandKind::GetItem => {
                let value = self
                    .store
                    .read()
                    .map_err(|_| KvError::LockPoisoned)?
                    .get(&cmd.key);
                Ok(value.unwrap_or_else(|| format!("Key not found: {}", cmd.key)))
            }
            CommandKind::GetAllItems => {
                let items = self
                    .store
                    .read()
                    .map_err(|_| KvError::LockPoisoned)?
                    .get_all();
                Ok(serde_json::to_string(&items)?)
            }
        }
    }
}

impl<P, S> CommandsProcessor for CommandProcessor<P, S>
where
    P: CommandsParser,
    S: KeyValueStorage,
{
    fn process(&self, worker_id: usize, request: &Message) -> Message {
        let cmd = match self.parser.parse_command(&request.body) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!(worker = worker_id, error = %e, "failed to parse command");
                return request.reply(format!("Failed to parse command: {}", e));
            }
        };

        debug!(worker = worker_id, command = %cmd, "processing command");

        match self.execute(&cmd) {
            Ok(body) => request.reply(body),
            Err(e) => {
                error!(worker = worker_id, command = %cmd, error = %e, "failed to execute command");
                request.reply(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CommandParser;
    use crate::store::{KeyValue, OrderedMap};

    fn processor() -> CommandProcessor<CommandParser, OrderedMap<String>> {
        CommandProcessor::new(CommandParser::new(), Arc::new(RwLock::new(OrderedMap::new())))
    }

    fn body(processor: &impl CommandsProcessor, text: &str) -> String {
        processor.process(1, &Message::new(text, "", "")).body
    }

    #[test]
    fn test_add_get_delete() {
        let processor = processor();

        assert_eq!(body(&processor, "addItem('key1', 'value1')"), ACK);
        assert_eq!(body(&processor, "getItem('key1')"), "value1");
        assert_eq!(body(&processor, "deleteItem('key1')"), ACK);
        assert_eq!(body(&processor, "getItem('key1')"), "Key not found: key1");
    }

    #[test]
    fn test_delete_missing_key() {
        let processor = processor();
        assert_eq!(body(&processor, "deleteItem('nope')"), ACK);
    }

    #[test]
    fn test_get_all_items() {
        let processor = processor();
        assert_eq!(body(&processor, "getAllItems()"), "[]");

        body(&processor, "addItem('b', '2')");
        body(&processor, "addItem('a', '1')");
        body(&processor, "addItem('b', '3')");

        assert_eq!(
            body(&processor, "getAllItems()"),
            r#"[{"Key":"b","Value":"3"},{"Key":"a","Value":"1"}]"#
        );
    }

    #[test]
    fn test_malformed_command() {
        let processor = processor();
        assert_eq!(
            body(&processor, "invalidCommand('key1')"),
            "Failed to parse command: invalid command format: unknown command 'invalidCommand'"
        );
    }

    #[test]
    fn test_reply_metadata() {
        let processor = processor();
        let reply = processor.process(0, &Message::new("getItem('x')", "reply_queue", "abc"));
        assert_eq!(reply, Message::new("Key not found: x", "reply_queue", "abc"));
    }

    #[test]
    fn test_shared_store() {
        let store = Arc::new(RwLock::new(OrderedMap::new()));
        let processor = CommandProcessor::new(CommandParser::new(), Arc::clone(&store));

        body(&processor, "addItem('k', 'v')");

        let items = store.read().unwrap().get_all();
        assert_eq!(
            items,
            vec![KeyValue {
                key: "k".to_string(),
                value: "v".to_string()
            }]
        );
    }

    #[test]
    fn test_poisoned_store() {
        let store = Arc::new(RwLock::new(OrderedMap::<String>::new()));
        let poison = Arc::clone(&store);
        let _ = std::thread::spawn(move || {
            let _guard = poison.write().unwrap();
            panic!("poison the lock");
        })
        .join();

        let processor = CommandProcessor::new(CommandParser::new(), store);
        assert_eq!(body(&processor, "getItem('k')"), "store lock poisoned");
        assert_eq!(body(&processor, "addItem('k', 'v')"), "store lock poisoned");
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let processor = Arc::new(processor());
        let mut handles = Vec::new();

        for t in 0..4 {
            let processor = Arc::clone(&processor);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    body(&*processor, &format!("addItem('t{}-{}', '{}')", t, i, i));
                    let all = body(&*processor, "getAllItems()");
                    let items: Vec<serde_json::Value> = serde_json::from_str(&all).unwrap();
                    assert!(!items.is_empty());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let all = body(&*processor, "getAllItems()");
        let items: Vec<serde_json::Value> = serde_json::from_str(&all).unwrap();
        assert_eq!(items.len(), 400);
    }
}
