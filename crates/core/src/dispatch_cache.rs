//! Process-local idempotency markers for container dispatch.
//!
//! A [`DispatchCache`] remembers which container names have already been
//! launched so that a retried attempt of the same logical operation does
//! not start a second container. Entries expire after a fixed TTL even if
//! the owning workflow never clears them, which bounds memory growth.
//!
//! Contract:
//! - the activity sets the marker (via [`DispatchCache::claim`]) strictly
//!   before the container is started;
//! - only the owning workflow deletes it, after it has observed a terminal
//!   result for that name;
//! - a missing entry means "not yet dispatched", never an error.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Default lifetime of a dispatch marker (60 minutes).
pub const DEFAULT_DISPATCH_TTL: Duration = Duration::from_secs(60 * 60);

/// Marker stored per dispatched container name.
#[derive(Debug, Clone, Copy)]
pub struct DispatchRecord {
    pub inserted_at: Instant,
}

impl DispatchRecord {
    fn now() -> Self {
        Self {
            inserted_at: Instant::now(),
        }
    }

    fn is_live(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() < ttl
    }
}

/// Concurrent name -> marker store with a fixed TTL.
///
/// Shared across every activity in one worker process (wrap it in an
/// `Arc`). Entries are keyed per container name so distinct runs never
/// contend on the same shard entry.
pub struct DispatchCache {
    entries: DashMap<String, DispatchRecord>,
    ttl: Duration,
}

impl DispatchCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Configured entry lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether `name` has a live dispatch marker.
    ///
    /// Expired entries are removed on the way out.
    pub fn get(&self, name: &str) -> bool {
        let live = match self.entries.get(name) {
            Some(record) => record.is_live(self.ttl),
            None => return false,
        };
        if !live {
            let ttl = self.ttl;
            self.entries.remove_if(name, |_, record| !record.is_live(ttl));
        }
        live
    }

    /// Insert (or refresh) the marker for `name`.
    pub fn set(&self, name: &str) {
        self.entries.insert(name.to_string(), DispatchRecord::now());
    }

    /// Remove the marker for `name`. Returns `true` if one was present.
    pub fn delete(&self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    /// Atomically set the marker unless a live one already exists.
    ///
    /// Returns `true` if this caller now owns the dispatch, `false` if a
    /// previous attempt already dispatched `name`. Two concurrent callers
    /// can never both observe `true`.
    pub fn claim(&self, name: &str) -> bool {
        match self.entries.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_live(self.ttl) {
                    false
                } else {
                    entry.insert(DispatchRecord::now());
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(DispatchRecord::now());
                true
            }
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, record| record.is_live(ttl));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DispatchCache {
    fn default() -> Self {
        Self::new(DEFAULT_DISPATCH_TTL)
    }
}

impl std::fmt::Debug for DispatchCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchCache")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
