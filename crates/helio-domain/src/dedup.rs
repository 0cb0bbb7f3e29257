//! Ingestion deduplication.
//!
//! Field devices retransmit the same reading in bursts. A bounded map from
//! (owner, device) to the last seen payload fingerprint suppresses repeats
//! inside a short window so each reading is applied at most once.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Repeats of the same payload inside this window are dropped
    pub window: Duration,
    /// Entry count above which expired entries are pruned
    pub capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(5),
            capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SeenEntry {
    last_seen: Instant,
    fingerprint: u64,
}

/// Bounded, time-aware duplicate suppressor. Single-owner: lives behind the
/// ingestion consumer, so no internal locking.
#[derive(Debug)]
pub struct Deduplicator {
    config: DedupConfig,
    entries: HashMap<(String, String), SeenEntry>,
}

impl Deduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
        }
    }

    fn fingerprint(payload: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        payload.hash(&mut hasher);
        hasher.finish()
    }

    /// Returns true when the event should pass through to the accumulator.
    /// Updates the device entry either way a fresh payload is seen.
    pub fn should_process(
        &mut self,
        owner_id: &str,
        device_id: &str,
        payload: &str,
        now: Instant,
    ) -> bool {
        let fingerprint = Self::fingerprint(payload);
        let key = (owner_id.to_string(), device_id.to_string());

        if let Some(entry) = self.entries.get(&key) {
            let within_window = now.duration_since(entry.last_seen) < self.config.window;
            if within_window && entry.fingerprint == fingerprint {
                return false;
            }
        }

        self.entries.insert(
            key,
            SeenEntry {
                last_seen: now,
                fingerprint,
            },
        );

        if self.entries.len() > self.config.capacity {
            self.prune(now);
        }

        true
    }

    /// Age-based eviction; falls back to a full clear only when every entry
    /// is still live and the map is past capacity.
    fn prune(&mut self, now: Instant) {
        let window = self.config.window;
        self.entries
            .retain(|_, entry| now.duration_since(entry.last_seen) < window);

        if self.entries.len() > self.config.capacity {
            warn!(
                entries = self.entries.len(),
                capacity = self.config.capacity,
                "dedup map over capacity with no expired entries, clearing"
            );
            self.entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
