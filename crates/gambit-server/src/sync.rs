//! Session synchronizer: best-effort snapshot persistence.
//!
//! Saves never block or roll back gameplay. Each match has at most one
//! persister task, fed through a watch channel, so only the newest snapshot
//! is ever pending and saves for one match never run concurrently. The
//! persister outlives eviction until its last snapshot is handled, and a
//! match loaded in that window is taken from the pending snapshot rather
//! than the store. A failed save is retried once after a jittered backoff,
//! then dropped.

use crate::store::SnapshotStore;
use dashmap::DashMap;
use gambit_core::{MatchId, Snapshot};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, warn};

/// A running persister and the number of rooms holding it.
#[derive(Debug)]
struct PersisterSlot {
    tx: watch::Sender<Option<Snapshot>>,
    handles: usize,
}

type PersisterSlots = Arc<DashMap<MatchId, PersisterSlot>>;

pub struct SessionSynchronizer {
    store: Arc<dyn SnapshotStore>,
    retry_backoff: Duration,
    persisters: PersisterSlots,
}

impl SessionSynchronizer {
    pub fn new(store: Arc<dyn SnapshotStore>, retry_backoff: Duration) -> Self {
        Self {
            store,
            retry_backoff,
            persisters: Arc::new(DashMap::new()),
        }
    }

    /// Latest snapshot for a match. A snapshot still waiting in the match's
    /// persister wins over the stored one. Unreadable snapshots count as
    /// absent.
    pub async fn load_latest_snapshot(&self, match_id: MatchId) -> Option<Snapshot> {
        if let Some(pending) = self.pending_snapshot(match_id) {
            debug!(
                %match_id,
                move_number = pending.turn.move_number,
                "loaded snapshot from persister"
            );
            return Some(pending);
        }

        let blob = match self.store.get(match_id).await {
            Ok(blob) => blob?,
            Err(e) => {
                error!(%match_id, error = %e, "failed to load snapshot");
                return None;
            }
        };

        match Snapshot::from_bytes(&blob) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                error!(%match_id, error = %e, "stored snapshot is unreadable");
                None
            }
        }
    }

    fn pending_snapshot(&self, match_id: MatchId) -> Option<Snapshot> {
        let slot = self.persisters.get(&match_id)?;
        let pending = slot.tx.borrow().clone();
        pending
    }

    /// Persist `snapshot`, retrying once. Returns whether it was stored.
    pub async fn save_snapshot(&self, snapshot: &Snapshot) -> bool {
        let match_id = snapshot.match_id;
        let blob = match snapshot.to_bytes() {
            Ok(blob) => blob,
            Err(e) => {
                error!(%match_id, error = %e, "snapshot dropped: encoding failed");
                return false;
            }
        };

        let first = match self.store.put(match_id, blob.clone()).await {
            Ok(()) => {
                debug!(%match_id, move_number = snapshot.turn.move_number, "snapshot saved");
                return true;
            }
            Err(e) => e,
        };
        warn!(%match_id, error = %first, "snapshot save failed, retrying once");

        tokio::time::sleep(self.jittered_backoff()).await;
        match self.store.put(match_id, blob).await {
            Ok(()) => {
                debug!(%match_id, "snapshot saved on retry");
                true
            }
            Err(e) => {
                error!(%match_id, error = %e, "snapshot dropped after retry");
                false
            }
        }
    }

    fn jittered_backoff(&self) -> Duration {
        let base = self.retry_backoff.as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=base / 2);
        Duration::from_millis(base + jitter)
    }

    /// Number of matches with a running persister.
    pub fn active_persisters(&self) -> usize {
        self.persisters.len()
    }

    /// Get a handle to the match's persister, starting it if none is running.
    ///
    /// The task stops once every handle is dropped and the last queued
    /// snapshot has been handled.
    pub fn attach_persister(self: &Arc<Self>, match_id: MatchId) -> SnapshotSender {
        self.persisters
            .entry(match_id)
            .and_modify(|slot| slot.handles += 1)
            .or_insert_with(|| {
                let (tx, rx) = watch::channel(None::<Snapshot>);
                tokio::spawn(Arc::clone(self).run_persister(match_id, rx));
                PersisterSlot { tx, handles: 1 }
            });

        SnapshotSender {
            match_id,
            slots: Arc::clone(&self.persisters),
        }
    }

    async fn run_persister(
        self: Arc<Self>,
        match_id: MatchId,
        mut rx: watch::Receiver<Option<Snapshot>>,
    ) {
        let mut saved: Option<Snapshot> = None;
        loop {
            let latest = rx.borrow_and_update().clone();
            if latest.is_some() && latest != saved {
                if let Some(snapshot) = &latest {
                    self.save_snapshot(snapshot).await;
                }
                saved = latest;
            }

            // Senders only touch the channel under the slot lock
            let finished = self
                .persisters
                .remove_if(&match_id, |_, slot| {
                    slot.handles == 0 && !rx.has_changed().unwrap_or(false)
                })
                .is_some();
            if finished || rx.changed().await.is_err() {
                break;
            }
        }
        debug!(%match_id, "persister stopped");
    }
}

/// Hands snapshots to a match's persister without waiting for the save.
#[derive(Debug)]
pub struct SnapshotSender {
    match_id: MatchId,
    slots: PersisterSlots,
}

impl SnapshotSender {
    /// A sender with no task behind it. The receiver sees every snapshot.
    #[cfg(test)]
    pub(crate) fn detached(match_id: MatchId) -> (Self, watch::Receiver<Option<Snapshot>>) {
        let (tx, rx) = watch::channel(None);
        let slots: PersisterSlots = Arc::new(DashMap::new());
        slots.insert(match_id, PersisterSlot { tx, handles: 1 });
        (Self { match_id, slots }, rx)
    }

    pub fn save(&self, snapshot: Snapshot) {
        if let Some(slot) = self.slots.get(&self.match_id) {
            // Replaces any snapshot the persister has not picked up yet
            slot.tx.send_replace(Some(snapshot));
        }
    }

    /// Newest snapshot handed to the persister, saved or not.
    pub fn latest(&self) -> Option<Snapshot> {
        let slot = self.slots.get(&self.match_id)?;
        let latest = slot.tx.borrow().clone();
        latest
    }
}

impl Drop for SnapshotSender {
    fn drop(&mut self) {
        if let Some(mut slot) = self.slots.get_mut(&self.match_id) {
            slot.handles = slot.handles.saturating_sub(1);
            if slot.handles == 0 {
                // Wake the persister so it can flush and stop
                slot.tx.send_modify(|_| {});
            }
        }
    }
}
