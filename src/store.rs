use std::collections::HashMap;

use serde::Serialize;

/// One entry of a full scan.
///
/// Field names are part of the `getAllItems()` reply format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyValue<V> {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: V,
}

/// Storage capability used by the command processor.
///
/// Implementations carry no locking of their own; the processor serialises
/// access to them.
pub trait KeyValueStorage: Send + Sync {
    /// Insert or overwrite a key
    fn add(&mut self, key: String, value: String);
    /// Remove a key, doing nothing if it is absent
    fn remove(&mut self, key: &str);
    /// Look up a key
    fn get(&self, key: &str) -> Option<String>;
    /// Copy of every entry in iteration order
    fn get_all(&self) -> Vec<KeyValue<String>>;
}

struct Node<V> {
    key: String,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Hash map that remembers first-insertion order.
///
/// Entries live in a slot arena linked into a doubly linked list, and the
/// hash index maps each key to its slot, so point operations are O(1) and a
/// full scan walks the list from head to tail. Re-adding a key updates the
/// value in place and keeps its position.
pub struct OrderedMap<V> {
    index: HashMap<String, usize>,
    slots: Vec<Option<Node<V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<V> OrderedMap<V> {
    /// Create a new empty map
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    /// Insert a key, or overwrite its value without moving it
    pub fn add(&mut self, key: String, value: V) {
        if let Some(&slot) = self.index.get(&key) {
            if let Some(node) = self.slots[slot].as_mut() {
                node.value = value;
            }
            return;
        }

        let node = Node {
            key: key.clone(),
            value,
            prev: self.tail,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };

        match self.tail.and_then(|tail| self.slots[tail].as_mut()) {
            Some(tail) => tail.next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        self.index.insert(key, slot);
    }

    /// Remove a key and return its value
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let slot = self.index.remove(key)?;
        let node = self.slots[slot].take()?;

        match node.prev.and_then(|prev| self.slots[prev].as_mut()) {
            Some(prev) => prev.next = node.next,
            None => self.head = node.next,
        }
        match node.next.and_then(|next| self.slots[next].as_mut()) {
            Some(next) => next.prev = node.prev,
            None => self.tail = node.prev,
        }

        self.free.push(slot);
        Some(node.value)
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.slots[slot].as_ref().map(|node| &node.value)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Iterate entries in first-insertion order
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            map: self,
            cursor: self.head,
        }
    }
}

impl<V: Clone> OrderedMap<V> {
    /// Snapshot of every entry in first-insertion order
    pub fn get_all(&self) -> Vec<KeyValue<V>> {
        let mut items = Vec::with_capacity(self.len());
        items.extend(self.iter().map(|(key, value)| KeyValue {
            key: key.to_string(),
            value: value.clone(),
        }));
        items
    }
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a, V> {
    map: &'a OrderedMap<V>,
    cursor: Option<usize>,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (&'a str, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.map.slots[self.cursor?].as_ref()?;
        self.cursor = node.next;
        Some((node.key.as_str(), &node.value))
    }
}

impl KeyValueStorage for OrderedMap<String> {
    fn add(&mut self, key: String, value: String) {
        OrderedMap::add(self, key, value);
    }

    fn remove(&mut self, key: &str) {
        OrderedMap::remove(self, key);
    }

    fn get(&self, key: &str) -> Option<String> {
        OrderedMap::get(self, key).cloned()
    }

    fn get_all(&self) -> Vec<KeyValue<String>> {
        OrderedMap::get_all(self)
    }
}
