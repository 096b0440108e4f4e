//! Short-term memory of recently shown artworks.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};

/// Tracks when each artwork was last shown.
///
/// Implementations must be safe to share between concurrent invocations.
/// Entries older than the exclusion window are treated as absent.
pub trait RecencyCache: Send + Sync {
    /// When `id` was last shown, if that is still inside the window.
    fn last_shown(&self, id: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>>;

    /// Mark `id` as shown at `now`, replacing any earlier entry.
    fn record(&self, id: &str, now: DateTime<Utc>);

    /// Drop expired entries. Returns how many were removed.
    fn prune(&self, now: DateTime<Utc>) -> usize;

    /// Number of stored entries, expired or not.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local [`RecencyCache`] backed by a mutex-guarded map.
#[derive(Debug)]
pub struct InMemoryRecencyCache {
    window: TimeDelta,
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryRecencyCache {
    pub fn new(window: std::time::Duration) -> Self {
        Self {
            window: TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        // A panic elsewhere cannot leave the map half-updated.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_live(&self, shown: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(shown) < self.window
    }
}

impl RecencyCache for InMemoryRecencyCache {
    fn last_shown(&self, id: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.entries()
            .get(id)
            .copied()
            .filter(|shown| self.is_live(*shown, now))
    }

    fn record(&self, id: &str, now: DateTime<Utc>) {
        self.entries().insert(id.to_string(), now);
    }

    fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, shown| self.is_live(*shown, now));
        before - entries.len()
    }

    fn len(&self) -> usize {
        self.entries().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn entries_expire_after_window() {
        let cache = InMemoryRecencyCache::new(Duration::from_secs(3600));
        cache.record("1", at(0));

        assert_eq!(cache.last_shown("1", at(10)), Some(at(0)));
        assert_eq!(cache.last_shown("1", at(3599)), Some(at(0)));
        assert_eq!(cache.last_shown("1", at(3600)), None);
        assert_eq!(cache.last_shown("2", at(10)), None);
    }

    #[test]
    fn record_overwrites() {
        let cache = InMemoryRecencyCache::new(Duration::from_secs(60));
        cache.record("1", at(0));
        cache.record("1", at(50));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.last_shown("1", at(100)), Some(at(50)));
    }

    #[test]
    fn prune_removes_only_expired() {
        let cache = InMemoryRecencyCache::new(Duration::from_secs(60));
        cache.record("old", at(0));
        cache.record("new", at(100));

        assert_eq!(cache.prune(at(120)), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.last_shown("new", at(120)).is_some());
        assert_eq!(cache.prune(at(120)), 0);
    }

    #[test]
    fn shared_across_threads() {
        let cache = std::sync::Arc::new(InMemoryRecencyCache::new(Duration::from_secs(60)));
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.record(&n.to_string(), at(0)))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 4);
    }
}
