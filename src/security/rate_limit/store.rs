//! Fixed-window counter storage
//!
//! A window starts at the first hit for a key and lasts for the policy's
//! window; hits inside it are counted, the first hit after it starts a new one.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store unavailable: {message}")]
    Unavailable { message: String },
}

/// Counter state after a hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Hits in the current window, this one included
    pub hits: u64,
    /// Time until the window resets
    pub reset_after: Duration,
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Record a hit for `key` and return the window's state
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError>;

    /// Drop the counter for `key`
    async fn reset(&self, key: &str) -> Result<(), StoreError>;

    /// Number of live counters, when the backend can tell cheaply
    async fn tracked_keys(&self) -> Option<usize>;

    async fn health_check(&self) -> Result<(), StoreError>;

    fn backend(&self) -> &'static str;
}

/// Position of a window in the expiry index; the sequence number keeps
/// windows that reset at the same instant distinct
type Slot = (Instant, u64);

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    hits: u64,
    slot: Slot,
}

/// Counters plus an index ordered by reset time
#[derive(Debug, Default)]
struct Windows {
    entries: HashMap<String, WindowEntry>,
    expiries: BTreeMap<Slot, String>,
    next_seq: u64,
}

impl Windows {
    fn slot(&mut self, reset_at: Instant) -> Slot {
        self.next_seq = self.next_seq.wrapping_add(1);
        (reset_at, self.next_seq)
    }

    fn insert(&mut self, key: &str, reset_at: Instant) {
        let slot = self.slot(reset_at);
        self.expiries.insert(slot, key.to_string());
        self.entries.insert(key.to_string(), WindowEntry { hits: 1, slot });
    }

    /// Count a hit on a tracked key, starting a new window if the old one ran out
    fn hit_existing(&mut self, key: &str, now: Instant, window: Duration) -> Option<WindowEntry> {
        let entry = self.entries.get_mut(key)?;
        if now >= entry.slot.0 {
            self.next_seq = self.next_seq.wrapping_add(1);
            let slot = (now + window, self.next_seq);
            self.expiries.remove(&entry.slot);
            self.expiries.insert(slot, key.to_string());
            *entry = WindowEntry { hits: 0, slot };
        }
        entry.hits += 1;
        Some(*entry)
    }

    fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            self.expiries.remove(&entry.slot);
        }
    }

    /// Drop windows that reset at or before `now`
    fn purge(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        while let Some(entry) = self.expiries.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let key = entry.remove();
            self.entries.remove(&key);
            removed += 1;
        }
        removed
    }

    /// Drop the window closest to reset
    fn evict_oldest(&mut self) -> Option<String> {
        let (_, key) = self.expiries.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// In-process store, bounded to `max_keys` counters
pub struct MemoryStore {
    windows: Arc<Mutex<Windows>>,
    max_keys: usize,
}

impl MemoryStore {
    pub fn new(max_keys: usize) -> Self {
        Self {
            windows: Arc::new(Mutex::new(Windows::default())),
            max_keys: max_keys.max(1),
        }
    }

    /// Periodically drop expired windows; stops once the store is dropped
    pub fn start_cleanup_task(&self, every: Duration) -> JoinHandle<()> {
        let windows = Arc::downgrade(&self.windows);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                ticker.tick().await;
                if purge(&windows).await.is_none() {
                    break;
                }
            }
        })
    }

    /// Remove every expired window, returning how many were dropped
    pub async fn purge_expired(&self) -> usize {
        self.windows.lock().await.purge(Instant::now())
    }
}

async fn purge(windows: &Weak<Mutex<Windows>>) -> Option<usize> {
    let windows = windows.upgrade()?;
    let mut windows = windows.lock().await;
    let removed = windows.purge(Instant::now());
    if removed > 0 {
        debug!(
            "Rate limit cleanup removed {} expired windows, {} remain",
            removed,
            windows.len()
        );
    }
    Some(removed)
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        if let Some(entry) = windows.hit_existing(key, now, window) {
            return Ok(WindowCount {
                hits: entry.hits,
                reset_after: entry.slot.0 - now,
            });
        }

        if windows.len() >= self.max_keys {
            windows.purge(now);
            if windows.len() >= self.max_keys {
                if let Some(oldest) = windows.evict_oldest() {
                    warn!(
                        "Rate limit store full ({} keys), evicting {}",
                        self.max_keys, oldest
                    );
                }
            }
        }

        windows.insert(key, now + window);
        Ok(WindowCount {
            hits: 1,
            reset_after: window,
        })
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        self.windows.lock().await.remove(key);
        Ok(())
    }

    async fn tracked_keys(&self) -> Option<usize> {
        Some(self.windows.lock().await.len())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
