use std::time::{Duration, Instant};

use chrono::NaiveDate;
use dashmap::DashMap;

use crate::types::MatchResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    date: NaiveDate,
    home: String,
    away: String,
}

impl CacheKey {
    fn new(date: NaiveDate, home: &str, away: &str) -> Self {
        Self {
            date,
            home: home.trim().to_lowercase(),
            away: away.trim().to_lowercase(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: Option<MatchResult>,
    stored_at: Instant,
}

/// Per-run memo of feed lookups keyed by (date, home, away).
///
/// Created fresh by each reconciliation run and dropped with it, so nothing
/// outlives an invocation. Entries expire after `ttl` (see
/// `RESULT_CACHE_TTL_SECS`). Only successful lookups are cached; errors are
/// never memoised so a retry in the same run can still succeed.
pub struct ResultCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl }
    }

    /// `Some(cached)` on a fresh hit, where `cached` is itself `None` for a
    /// remembered "no fixture". Expired entries are evicted.
    pub fn get(&self, date: NaiveDate, home: &str, away: &str) -> Option<Option<MatchResult>> {
        let key = CacheKey::new(date, home, away);
        let entry = self.entries.get(&key)?;
        if entry.stored_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(&key);
            return None;
        }
        Some(entry.result.clone())
    }

    pub fn insert(&self, date: NaiveDate, home: &str, away: &str, result: Option<MatchResult>) {
        self.entries.insert(
            CacheKey::new(date, home, away),
            CacheEntry { result, stored_at: Instant::now() },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
