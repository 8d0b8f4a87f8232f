//! Memoization for read-only chain calls.

use std::any::Any;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Cache key: the logical call plus the block it was evaluated at. `None`
/// means the call ran against `latest` and the entry expires after the TTL;
/// historical blocks never change so those entries live forever.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallKey {
    pub method: &'static str,
    pub args: Vec<u8>,
    pub block: Option<u64>,
}

impl CallKey {
    pub fn latest(method: &'static str) -> Self {
        Self {
            method,
            args: vec![],
            block: None,
        }
    }

    pub fn historical(method: &'static str, args: Vec<u8>, block: u64) -> Self {
        Self {
            method,
            args,
            block: Some(block),
        }
    }
}

struct Entry {
    value: Box<dyn Any + Send + Sync>,
    inserted: Instant,
}

pub struct CallCache {
    ttl: Duration,
    entries: Mutex<HashMap<CallKey, Entry>>,
}

impl CallCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get<T: Clone + 'static>(&self, key: &CallKey) -> Option<T> {
        let mut entries = self.entries.lock();
        let entry = entries.get(key)?;
        if key.block.is_none() && entry.inserted.elapsed() > self.ttl {
            entries.remove(key);
            return None;
        }
        entry.value.downcast_ref::<T>().cloned()
    }

    pub fn insert<T: Clone + Send + Sync + 'static>(&self, key: CallKey, value: T) {
        let mut entries = self.entries.lock();
        entries.insert(
            key,
            Entry {
                value: Box::new(value),
                inserted: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn historical_entries_do_not_expire() {
        let cache = CallCache::new(Duration::from_millis(0));
        let key = CallKey::historical("epoch_start_block", 75u64.to_be_bytes().to_vec(), 75);
        cache.insert(key.clone(), 1234u64);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get::<u64>(&key), Some(1234));
    }

    #[test]
    fn latest_entries_expire() {
        let cache = CallCache::new(Duration::from_millis(1));
        let key = CallKey::latest("beacon_head");
        cache.insert(key.clone(), 99u64);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.get::<u64>(&key), None);
    }

    #[test]
    fn type_mismatch_yields_none() {
        let cache = CallCache::new(Duration::from_secs(60));
        let key = CallKey::latest("beacon_head");
        cache.insert(key.clone(), 99u64);
        assert_eq!(cache.get::<String>(&key), None);
    }
}
