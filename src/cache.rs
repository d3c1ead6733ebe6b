use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::{CacheStats, SecretEntry};

struct CacheState {
    by_id: HashMap<Uuid, SecretEntry>,
    key_to_id: HashMap<String, Uuid>,
    last_sync: DateTime<Utc>,
}

/// Per-tenant secret cache: the id map, the key index, and the sync
/// watermark, all behind one lock. Pure state; nothing here talks to the
/// network.
pub struct TenantCache {
    state: Mutex<CacheState>,
}

impl TenantCache {
    /// The watermark starts 60 s in the past so the first incremental sync
    /// returns everything the upstream has.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState {
                by_id: HashMap::new(),
                key_to_id: HashMap::new(),
                last_sync: Utc::now() - Duration::seconds(60),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().expect("tenant cache lock poisoned")
    }

    pub fn lookup_by_id(&self, id: Uuid) -> Option<SecretEntry> {
        self.state().by_id.get(&id).cloned()
    }

    pub fn lookup_key(&self, key: &str) -> Option<Uuid> {
        self.state().key_to_id.get(key).copied()
    }

    pub fn key_map_is_empty(&self) -> bool {
        self.state().key_to_id.is_empty()
    }

    /// Write entries into both mappings. A key that moved to a new id
    /// upstream wins the mapping; the orphaned id stays retrievable until
    /// the next reset.
    pub fn install(&self, entries: impl IntoIterator<Item = SecretEntry>) {
        let mut state = self.state();
        for entry in entries {
            state.key_to_id.insert(entry.key.clone(), entry.id);
            state.by_id.insert(entry.id, entry);
        }
    }

    /// Clear both mappings, returning the sizes observed immediately before.
    /// The watermark stays put: a reset evicts local state, it does not ask
    /// the upstream to resend history.
    pub fn reset(&self) -> CacheStats {
        let mut state = self.state();
        let before = CacheStats {
            secret_cache_size: state.by_id.len(),
            keymap_cache_size: state.key_to_id.len(),
        };
        state.by_id.clear();
        state.key_to_id.clear();
        before
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state();
        CacheStats {
            secret_cache_size: state.by_id.len(),
            keymap_cache_size: state.key_to_id.len(),
        }
    }

    pub fn last_sync(&self) -> DateTime<Utc> {
        self.state().last_sync
    }

    /// Monotonic: a proposed watermark older than the current one is ignored.
    pub fn advance_watermark(&self, to: DateTime<Utc>) {
        let mut state = self.state();
        if to > state.last_sync {
            state.last_sync = to;
        }
    }
}

impl Default for TenantCache {
    fn default() -> Self {
        Self::new()
    }
}
