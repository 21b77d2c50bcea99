// Per-character advisory locks for the battle workflow.
//
// The cooldown check is a plain read outside the battle transaction, so
// two near-simultaneous requests from the same character could both pass
// it before either battle commits, each against a different opponent.
// The unordered-pair unique index cannot catch that. Holding this lock
// from the cooldown read through the transaction commit serializes battle
// requests per character and closes the gap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Thread-safe map of per-character async mutexes.
#[derive(Debug, Clone, Default)]
pub struct BattleLocks {
    inner: Arc<Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>>,
}

impl BattleLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for one character, waiting if another battle
    /// request for the same character is already in flight. The returned
    /// guard releases the lock on drop.
    pub async fn acquire(&self, character_id: i64) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.inner.lock().unwrap();
            // Sweep idle entries so the map stays bounded by in-flight
            // battles rather than every character that ever fought. An
            // outstanding guard keeps a clone of the Arc alive, so a
            // strong count of 1 means nobody holds or awaits the lock.
            map.retain(|_, m| Arc::strong_count(m) > 1);
            map.entry(character_id).or_default().clone()
        };
        entry.lock_owned().await
    }
}
