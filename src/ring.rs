//! Consistent hash ring mapping shard keys to worker identities.

use std::collections::{BTreeSet, HashMap};

/// Hash function used to place virtual nodes and keys on the ring
pub type Hash = fn(&[u8]) -> u32;

/// Circular keyspace with virtual nodes.
///
/// Every worker added gets `replicas` positions on the ring, at
/// `hash(index + worker_id)` for `index` in `0..replicas`. A key belongs to
/// the worker owning the first position at or after `hash(key)`, wrapping
/// around past the largest position. The ring is built up front and only read
/// afterwards.
pub struct ConsistentHash {
    hash: Hash,
    replicas: usize,
    positions: Vec<u32>,
    owners: HashMap<u32, String>,
}

impl ConsistentHash {
    /// Create an empty ring placing `replicas` virtual nodes per worker.
    ///
    /// Uses CRC32 (IEEE) when no hash function is given.
    pub fn new(replicas: usize, hash: Option<Hash>) -> Self {
        Self {
            hash: hash.unwrap_or(crc32fast::hash),
            replicas,
            positions: Vec::new(),
            owners: HashMap::new(),
        }
    }

    /// Insert the virtual nodes of each worker
    pub fn add<I, S>(&mut self, workers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for worker in workers {
            let worker = worker.as_ref();
            for i in 0..self.replicas {
                let position = (self.hash)(format!("{}{}", i, worker).as_bytes());
                // Colliding positions go to the most recently added worker
                if self.owners.insert(position, worker.to_string()).is_none() {
                    self.positions.push(position);
                }
            }
        }
        self.positions.sort_unstable();
    }

    /// Worker owning `key`, or `None` if the ring is empty
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.positions.is_empty() {
            return None;
        }

        let hash = (self.hash)(key.as_bytes());
        let idx = self.positions.partition_point(|&position| position < hash);
        let position = self.positions[idx % self.positions.len()];

        self.owners.get(&position).map(String::as_str)
    }

    /// Number of virtual nodes on the ring
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Distinct worker identities present on the ring
    pub fn workers(&self) -> BTreeSet<&str> {
        self.owners.values().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(workers: usize) -> ConsistentHash {
        let mut ring = ConsistentHash::new(workers, None);
        ring.add((0..workers).map(|i| i.to_string()));
        ring
    }

    // Maps bytes to their decimal value so positions are predictable
    fn decimal(data: &[u8]) -> u32 {
        std::str::from_utf8(data).unwrap().parse().unwrap()
    }

    #[test]
    fn test_empty_ring_has_no_worker() {
        let ring = ConsistentHash::new(3, None);
        assert!(ring.is_empty());
        assert_eq!(ring.get("anything"), None);
    }

    #[test]
    fn test_virtual_node_count() {
        let ring = build(4);
        assert_eq!(ring.len(), 16);
        assert_eq!(ring.workers().len(), 4);
    }

    #[test]
    fn test_lookup_with_custom_hash() {
        // Workers "2", "4", "6" with 3 replicas: positions 2,12,22 / 4,14,24 / 6,16,26
        let mut ring = ConsistentHash::new(3, Some(decimal));
        ring.add(["6", "4", "2"]);

        let cases = [("2", "2"), ("11", "2"), ("23", "4"), ("27", "2"), ("15", "6")];
        for (key, worker) in cases {
            assert_eq!(ring.get(key), Some(worker), "key {}", key);
        }

        // Worker "8" owns position 28
        ring.add(["8"]);
        assert_eq!(ring.get("27"), Some("8"));
    }

    #[test]
    fn test_deterministic_across_rebuilds() {
        let first = build(5);
        let second = build(5);

        for i in 0..1000 {
            let key = format!("key_{}", i);
            let owner = first.get(&key);
            assert!(owner.is_some());
            assert_eq!(owner, first.get(&key));
            assert_eq!(owner, second.get(&key));
        }
    }

    #[test]
    fn test_every_worker_receives_keys() {
        use rand::Rng;

        let ring = build(8);
        let mut rng = rand::rng();
        let mut counts = HashMap::new();

        for _ in 0..20_000 {
            let key: u64 = rng.random();
            let owner = ring.get(&key.to_string()).unwrap();
            *counts.entry(owner.to_string()).or_insert(0usize) += 1;
        }

        for worker in 0..8 {
            assert!(
                counts.get(&worker.to_string()).copied().unwrap_or(0) > 0,
                "worker {} received no keys",
                worker
            );
        }
    }

    #[test]
    fn test_single_worker_owns_everything() {
        let ring = build(1);
        for key in ["", "a", "x", "some longer key"] {
            assert_eq!(ring.get(key), Some("0"));
        }
    }
}
