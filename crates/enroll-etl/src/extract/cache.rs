//! In-process row cache
//!
//! Keeps the result of the last successful extraction for a source key so a
//! re-run within the TTL does not hit the remote API again. Entries are
//! dropped on expiry and whenever feedback is written to the same source.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::RawRow;

/// Default cache TTL in seconds
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

struct CacheEntry {
    rows: Vec<RawRow>,
    stored_at: Instant,
}

/// TTL cache of extracted rows keyed by source identity
pub struct RowCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl RowCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Key for a spreadsheet range
    pub fn key(spreadsheet_id: &str, range: &str) -> String {
        format!("{}/{}", spreadsheet_id, range)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<Vec<RawRow>> {
        let mut entries = self.lock();
        let fresh = entries
            .get(key)
            .map(|entry| entry.stored_at.elapsed() < self.ttl)?;

        if fresh {
            debug!(key, "Row cache hit");
            entries.get(key).map(|entry| entry.rows.clone())
        } else {
            debug!(key, "Row cache entry expired");
            entries.remove(key);
            None
        }
    }

    pub fn insert(&self, key: impl Into<String>, rows: Vec<RawRow>) {
        self.lock().insert(
            key.into(),
            CacheEntry {
                rows,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        if self.lock().remove(key).is_some() {
            debug!(key, "Row cache entry invalidated");
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn rows() -> Vec<RawRow> {
        vec![RawRow::new(2, BTreeMap::new()).with_status("pending")]
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = RowCache::new(Duration::from_secs(60));
        let key = RowCache::key("sheet-1", "Enrollments!A2:G");
        cache.insert(key.clone(), rows());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get(&key), Some(rows()));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(&key), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_removes_entry() {
        let cache = RowCache::new(Duration::from_secs(60));
        cache.insert("a/b", rows());
        assert_eq!(cache.len(), 1);

        cache.invalidate("a/b");
        assert!(cache.get("a/b").is_none());
    }

    #[test]
    fn test_key_format() {
        assert_eq!(RowCache::key("abc", "Sheet1!A2:G"), "abc/Sheet1!A2:G");
    }
}
