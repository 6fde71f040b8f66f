use crate::metrics_defs::SNAPSHOT_KEYS;
use crate::types::ConfigSnapshot;
use parking_lot::RwLock;
use shared::gauge;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Holds the current snapshot. Readers clone the `Arc` under a short read lock
/// so a replacement is observed either completely or not at all.
pub struct ConfigCache {
    current: RwLock<Arc<ConfigSnapshot>>,
}

impl ConfigCache {
    pub fn new() -> Self {
        ConfigCache {
            current: RwLock::new(Arc::new(ConfigSnapshot::default())),
        }
    }

    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.current.read().clone()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.current.read().get(key).map(str::to_owned)
    }

    pub fn keys(&self) -> BTreeSet<String> {
        self.current.read().keys()
    }

    /// Swaps in `snapshot` unless it carries the token already in place.
    /// Returns whether the snapshot was applied.
    pub fn replace(&self, snapshot: ConfigSnapshot) -> bool {
        let key_count = snapshot.len();
        let next = Arc::new(snapshot);

        let mut write_guard = self.current.write();
        if write_guard.token().is_some() && write_guard.token() == next.token() {
            return false;
        }
        *write_guard = next;
        drop(write_guard);

        gauge!(SNAPSHOT_KEYS).set(key_count as f64);
        true
    }

    /// Drops all values and the token.
    pub(crate) fn clear(&self) {
        *self.current.write() = Arc::new(ConfigSnapshot::default());
        gauge!(SNAPSHOT_KEYS).set(0.0);
    }
}

impl Default for ConfigCache {
    fn default() -> Self {
        Self::new()
    }
}
