use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

const ENTRY_COST: usize = 1;

#[derive(Debug, Clone, Copy)]
struct Entry {
    valid: bool,
    stored_at: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub admitted: u64,
    pub rejected: u64,
}

/// Last observed verdict per probe URL, shared by every probe of every session.
///
/// Positive verdicts are kept until evicted. Negative verdicts stop being
/// served once `negative_ttl` has passed, so a host that comes up later is
/// probed again. Every entry costs one unit against `max_cost`; when the
/// budget is spent, expired negatives are swept and, if that frees nothing,
/// the new entry is refused. Admission is approximate under contention.
pub struct VerdictCache {
    entries: DashMap<String, Entry>,
    max_cost: usize,
    negative_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    admitted: AtomicU64,
    rejected: AtomicU64,
}

impl VerdictCache {
    pub fn new(max_cost: usize, negative_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_cost,
            negative_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn get(&self, url: &str) -> Option<bool> {
        let now = Instant::now();
        // The shard guard must be released before remove_if touches the same shard.
        let lookup = self
            .entries
            .get(url)
            .map(|entry| (entry.valid, self.is_expired(&entry, now)));

        match lookup {
            Some((valid, false)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(valid)
            }
            Some((_, true)) => {
                self.entries
                    .remove_if(url, |_, entry| self.is_expired(entry, now));
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set(&self, url: &str, valid: bool) -> bool {
        let entry = Entry {
            valid,
            stored_at: Instant::now(),
        };

        if let Some(mut existing) = self.entries.get_mut(url) {
            *existing = entry;
            self.admitted.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        if !self.has_room() {
            self.sweep_expired();
            if !self.has_room() {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(url = %url, max_cost = self.max_cost, "verdict cache full, entry refused");
                return false;
            }
        }

        self.entries.insert(url.to_string(), entry);
        self.admitted.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    fn has_room(&self) -> bool {
        (self.entries.len() + 1) * ENTRY_COST <= self.max_cost
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        !entry.valid && now.saturating_duration_since(entry.stored_at) >= self.negative_ttl
    }

    fn sweep_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| !self.is_expired(entry, now));
    }
}

impl Default for VerdictCache {
    fn default() -> Self {
        Self::new(1_000_000, Duration::from_secs(300))
    }
}
