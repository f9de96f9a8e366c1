use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

struct CacheEntry<T> {
    value: Arc<T>,
    fetched_at: Instant,
}

/// Process-wide value with a refresh deadline.
///
/// The slot only ever holds an immutable `Arc` snapshot: a refresh builds a new
/// entry and swaps the pointer under a short write lock, so readers see either
/// the old snapshot or the new one, never a half-written value. No lock is held
/// while the loader runs; concurrent refreshes may both fetch, and the last
/// writer wins.
pub struct TtlCache<T> {
    ttl: Duration,
    slot: RwLock<Option<Arc<CacheEntry<T>>>>,
}

impl<T> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, slot: RwLock::new(None) }
    }

    /// Current snapshot if it is younger than the TTL.
    pub fn fresh(&self) -> Option<Arc<T>> {
        let guard = self.slot.read();
        guard
            .as_ref()
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| Arc::clone(&entry.value))
    }

    /// Current snapshot regardless of age.
    pub fn stale(&self) -> Option<Arc<T>> {
        self.slot.read().as_ref().map(|entry| Arc::clone(&entry.value))
    }

    pub fn replace(&self, value: T) -> Arc<T> {
        let entry = Arc::new(CacheEntry { value: Arc::new(value), fetched_at: Instant::now() });
        let value = Arc::clone(&entry.value);
        *self.slot.write() = Some(entry);
        value
    }

    pub fn invalidate(&self) {
        *self.slot.write() = None;
    }

    /// Returns the fresh snapshot, or runs `load` and swaps in its result.
    ///
    /// A failed load falls back to the stale snapshot when there is one; the
    /// next call retries.
    pub async fn get_or_refresh<F, Fut, E>(&self, load: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if let Some(value) = self.fresh() {
            return Ok(value);
        }

        match load().await {
            Ok(value) => Ok(self.replace(value)),
            Err(err) => match self.stale() {
                Some(stale) => {
                    tracing::warn!(error = %err, "cache refresh failed, serving stale value");
                    Ok(stale)
                }
                None => Err(err),
            },
        }
    }
}
