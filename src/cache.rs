use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::models::AvailableClass;

/// Key/value store whose entries expire after a per-entry time-to-live.
pub trait TtlCache<V>: Send + Sync {
    fn get(&self, key: &str) -> Option<V>;
    fn set(&self, key: &str, value: V, ttl: Duration);
}

pub type ClassListCache = Box<dyn TtlCache<Vec<AvailableClass>>>;

/// Login attempt counters keyed by client address.
pub type LoginThrottle = Box<dyn TtlCache<u32>>;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Process-local cache. Expired entries are dropped lazily on read and
/// swept on write.
pub struct MemoryCache<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
}

impl<V> MemoryCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> Default for MemoryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send> TtlCache<V> for MemoryCache<V> {
    fn get(&self, key: &str) -> Option<V> {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(_) => {
                warn!(key = %key, "Cache lock poisoned, treating as miss");
                return None;
            }
        };

        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                debug!(key = %key, "Cache entry expired");
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: V, ttl: Duration) {
        let Ok(mut entries) = self.entries.lock() else {
            warn!(key = %key, "Cache lock poisoned, skipping write");
            return;
        };

        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
    }
}
