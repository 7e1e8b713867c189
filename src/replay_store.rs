//! Idempotency-key replay suppression with TTL (spec `§4.2`).
//!
//! Backed by `dashmap`, the same concurrent-map crate the teacher uses for its provider
//! cache. A background sweeper purges expired fingerprints at an interval no longer than
//! half the TTL, and is cancelled via the same `tokio_util::sync::CancellationToken` the
//! teacher's `SigDown` uses for shutdown.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// `(idempotency_key, request_hash)`.
pub type Fingerprint = (String, String);

pub struct ReplayStore {
    entries: DashMap<Fingerprint, chrono::DateTime<chrono::Utc>>,
    ttl: Duration,
}

impl ReplayStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Atomically checks for a live duplicate and, if none, remembers this fingerprint.
    /// Returns `true` if the fingerprint was already present and unexpired (a replay).
    pub fn check_and_store(&self, fingerprint: Fingerprint) -> bool {
        let now = chrono::Utc::now();
        match self.entries.entry(fingerprint) {
            dashmap::mapref::entry::Entry::Occupied(mut occ) => {
                if *occ.get() > now {
                    true
                } else {
                    occ.insert(now + self.ttl);
                    false
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vac) => {
                vac.insert(now + self.ttl);
                false
            }
        }
    }

    fn sweep(&self) {
        let now = chrono::Utc::now();
        self.entries.retain(|_, expires_at| *expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Spawns the background sweeper. Returns its `JoinHandle` so callers can await it during
/// shutdown; the task exits as soon as `cancellation_token` is triggered.
pub fn spawn_sweeper(store: Arc<ReplayStore>, cancellation_token: CancellationToken) -> tokio::task::JoinHandle<()> {
    let interval = (store.ttl / 2).max(Duration::from_millis(100));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => store.sweep(),
                _ = cancellation_token.cancelled() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_admission_is_not_a_replay() {
        let store = ReplayStore::new(Duration::from_secs(300));
        assert!(!store.check_and_store(("idem-1".into(), "hash-a".into())));
    }

    #[test]
    fn duplicate_within_ttl_is_rejected() {
        let store = ReplayStore::new(Duration::from_secs(300));
        let fp = ("idem-1".to_string(), "hash-a".to_string());
        assert!(!store.check_and_store(fp.clone()));
        assert!(store.check_and_store(fp));
    }

    #[test]
    fn sweep_drops_expired_entries() {
        let store = ReplayStore::new(Duration::from_millis(0));
        store.check_and_store(("idem-1".into(), "hash-a".into()));
        std::thread::sleep(Duration::from_millis(5));
        store.sweep();
        assert!(store.is_empty());
    }
}
