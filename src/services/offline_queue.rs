//! Durable buffer of hole submissions that could not reach the backend.

use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
};

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::{
    dao::{
        local_store::LocalStore,
        models::{QueueEntry, QueueKey},
        storage::{StorageError, StorageResult},
    },
    error::ServiceError,
    state::{
        clock::Clock,
        scoring::{MatchId, ScoreSubmission, UserId},
    },
};

/// Storage key of the queue.
pub const QUEUE_KEY: &str = "offline_score_queue";

type Entries = IndexMap<QueueKey, QueueEntry>;

/// Outcome of replaying one submitter's queued entries for a match.
#[derive(Debug, Default)]
pub struct ReplayReport {
    /// Entries confirmed by the backend and removed.
    pub replayed: usize,
    /// Entries of the submitter still queued for the match.
    pub remaining: usize,
    /// Hole whose replay failed, stopping the run.
    pub halted_on: Option<u8>,
    /// Why the replay stopped. A non-transient error means the backend rejected the entry, which
    /// stays queued until resubmitted or discarded.
    pub error: Option<ServiceError>,
}

/// Offline queue stored as an ordered JSON list under [`QUEUE_KEY`].
///
/// Keys are unique per (match, submitter, hole): enqueueing an existing key drops the older entry
/// and appends the new one. Several users of the device may share the queue, so every entry keeps
/// its submitter.
pub struct OfflineQueue {
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    guard: Mutex<()>,
}

impl OfflineQueue {
    /// Queue persisted in `store`, timestamped by `clock`.
    pub fn new(store: Arc<dyn LocalStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            guard: Mutex::new(()),
        }
    }

    /// Record the latest local intent of `user_id` for (match, hole).
    pub fn enqueue(
        &self,
        match_id: MatchId,
        user_id: UserId,
        hole_number: u8,
        score_data: ScoreSubmission,
    ) -> StorageResult<QueueEntry> {
        let entry = QueueEntry {
            match_id,
            user_id,
            hole_number,
            score_data,
            timestamp: self.clock.now_ms(),
        };
        self.update(|entries| {
            entries.shift_remove(&entry.key());
            entries.insert(entry.key(), entry.clone());
        })?;
        info!(match_id = %match_id, user_id = %user_id, hole_number, "hole score queued for replay");
        Ok(entry)
    }

    /// Every queued entry in FIFO order.
    pub fn get_all(&self) -> Vec<QueueEntry> {
        let _lock = self.lock();
        self.load().into_values().collect()
    }

    /// Entries of one match in FIFO order, whoever submitted them.
    pub fn get_by_match(&self, match_id: MatchId) -> Vec<QueueEntry> {
        self.get_all()
            .into_iter()
            .filter(|entry| entry.match_id == match_id)
            .collect()
    }

    /// Entries `user_id` queued for one match, in FIFO order.
    pub fn get_by_user(&self, match_id: MatchId, user_id: UserId) -> Vec<QueueEntry> {
        self.get_all()
            .into_iter()
            .filter(|entry| entry.match_id == match_id && entry.user_id == user_id)
            .collect()
    }

    /// Number of entries across every match and submitter.
    pub fn size(&self) -> usize {
        self.get_all().len()
    }

    /// Number of entries queued for one match.
    pub fn size_for(&self, match_id: MatchId) -> usize {
        self.get_by_match(match_id).len()
    }

    /// Number of entries `user_id` queued for one match.
    pub fn size_for_user(&self, match_id: MatchId, user_id: UserId) -> usize {
        self.get_by_user(match_id, user_id).len()
    }

    /// Remove the entry of (match, submitter, hole). Returns whether an entry existed.
    pub fn remove(&self, match_id: MatchId, user_id: UserId, hole_number: u8) -> StorageResult<bool> {
        self.update(|entries| {
            entries
                .shift_remove(&(match_id, user_id, hole_number))
                .is_some()
        })
    }

    /// Pop the oldest entry.
    pub fn dequeue(&self) -> StorageResult<Option<QueueEntry>> {
        self.update(|entries| entries.shift_remove_index(0).map(|(_, entry)| entry))
    }

    /// Drop every entry.
    pub fn clear(&self) -> StorageResult<()> {
        let _lock = self.lock();
        self.store.remove(QUEUE_KEY)
    }

    /// Send the entries `user_id` queued for the match in FIFO order, stopping at the first
    /// failure. Entries of other submitters are left alone.
    ///
    /// Each confirmed entry is removed right away, unless a newer intent replaced it while the
    /// send was in flight.
    pub async fn replay<F, Fut>(
        &self,
        match_id: MatchId,
        user_id: UserId,
        mut send: F,
    ) -> StorageResult<ReplayReport>
    where
        F: FnMut(QueueEntry) -> Fut,
        Fut: Future<Output = Result<(), ServiceError>>,
    {
        let pending = self.get_by_user(match_id, user_id);
        let mut report = ReplayReport::default();

        for entry in pending {
            let hole_number = entry.hole_number;
            match send(entry.clone()).await {
                Ok(()) => {
                    self.update(|entries| {
                        if entries.get(&entry.key()) == Some(&entry) {
                            entries.shift_remove(&entry.key());
                        }
                    })?;
                    report.replayed += 1;
                    debug!(match_id = %match_id, hole_number, "queued score replayed");
                }
                Err(err) => {
                    warn!(match_id = %match_id, hole_number, error = %err, "replay halted");
                    report.halted_on = Some(hole_number);
                    report.error = Some(err);
                    break;
                }
            }
        }

        report.remaining = self.size_for_user(match_id, user_id);
        Ok(report)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<T>(&self, op: impl FnOnce(&mut Entries) -> T) -> StorageResult<T> {
        let _lock = self.lock();
        let mut entries = self.load();
        let result = op(&mut entries);
        self.save(&entries)?;
        Ok(result)
    }

    fn load(&self) -> Entries {
        let raw = match self.store.get(QUEUE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Entries::new(),
            Err(err) => {
                warn!(error = %err, "offline queue unreadable, treating as empty");
                return Entries::new();
            }
        };
        match serde_json::from_str::<Vec<QueueEntry>>(&raw) {
            Ok(list) => list.into_iter().map(|entry| (entry.key(), entry)).collect(),
            Err(err) => {
                warn!(error = %err, "offline queue corrupt, treating as empty");
                Entries::new()
            }
        }
    }

    fn save(&self, entries: &Entries) -> StorageResult<()> {
        if entries.is_empty() {
            return self.store.remove(QUEUE_KEY);
        }
        let list: Vec<&QueueEntry> = entries.values().collect();
        let raw = serde_json::to_string(&list).map_err(|source| StorageError::Encode {
            key: QUEUE_KEY.into(),
            source,
        })?;
        self.store.set(QUEUE_KEY, &raw)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    use super::*;
    use crate::{dao::local_store::MemoryStore, state::clock::ManualClock};

    fn queue() -> (OfflineQueue, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_000));
        (OfflineQueue::new(store.clone(), clock.clone()), store, clock)
    }

    fn score(own: u8) -> ScoreSubmission {
        ScoreSubmission {
            own_score: Some(own),
            marked_player_id: None,
            marked_score: None,
        }
    }

    fn holes(entries: &[QueueEntry]) -> Vec<u8> {
        entries.iter().map(|entry| entry.hole_number).collect()
    }

    #[test]
    fn enqueue_is_an_upsert_per_match_and_hole() {
        let (queue, _, clock) = queue();
        let (match_id, other, user) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        queue.enqueue(match_id, user, 1, score(4)).unwrap();
        queue.enqueue(match_id, user, 2, score(5)).unwrap();
        queue.enqueue(other, user, 1, score(3)).unwrap();
        clock.advance(Duration::from_secs(1));
        queue.enqueue(match_id, user, 1, score(6)).unwrap();

        let entries = queue.get_by_match(match_id);
        assert_eq!(holes(&entries), vec![2, 1]);
        assert_eq!(entries[1].score_data, score(6));
        assert_eq!(entries[1].timestamp, 2_000);
        assert_eq!(queue.size(), 3);
    }

    #[test]
    fn submitters_of_the_same_hole_do_not_overwrite_each_other() {
        let (queue, _, _) = queue();
        let (match_id, alice, bob) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        queue.enqueue(match_id, alice, 1, score(7)).unwrap();
        queue.enqueue(match_id, bob, 1, score(4)).unwrap();

        assert_eq!(queue.size_for(match_id), 2);
        assert_eq!(queue.size_for_user(match_id, alice), 1);
        assert_eq!(queue.get_by_user(match_id, alice)[0].score_data, score(7));
        assert_eq!(queue.get_by_user(match_id, bob)[0].user_id, bob);

        assert!(!queue.remove(match_id, bob, 2).unwrap());
        assert!(queue.remove(match_id, bob, 1).unwrap());
        assert_eq!(queue.size_for_user(match_id, alice), 1);
    }

    #[test]
    fn remove_dequeue_and_clear() {
        let (queue, _, _) = queue();
        let (match_id, user) = (Uuid::new_v4(), Uuid::new_v4());
        for hole in 1..=3 {
            queue.enqueue(match_id, user, hole, score(4)).unwrap();
        }

        assert!(queue.remove(match_id, user, 2).unwrap());
        assert!(!queue.remove(match_id, user, 2).unwrap());
        assert_eq!(queue.dequeue().unwrap().map(|entry| entry.hole_number), Some(1));
        assert_eq!(holes(&queue.get_all()), vec![3]);

        queue.clear().unwrap();
        assert_eq!(queue.size(), 0);
        assert!(queue.dequeue().unwrap().is_none());
    }

    #[test]
    fn corrupt_storage_reads_as_empty() {
        let (queue, store, _) = queue();
        store.set(QUEUE_KEY, "{not json").unwrap();
        assert!(queue.get_all().is_empty());

        queue.enqueue(Uuid::new_v4(), Uuid::new_v4(), 4, score(4)).unwrap();
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn queue_survives_a_new_instance_over_the_same_store() {
        let (queue, store, clock) = queue();
        let (match_id, user) = (Uuid::new_v4(), Uuid::new_v4());
        queue.enqueue(match_id, user, 9, score(5)).unwrap();
        drop(queue);

        let reloaded = OfflineQueue::new(store, clock);
        let entries = reloaded.get_by_match(match_id);
        assert_eq!(holes(&entries), vec![9]);
        assert_eq!(entries[0].user_id, user);
    }

    #[tokio::test]
    async fn replay_halts_on_first_failure_and_keeps_order() {
        let (queue, _, _) = queue();
        let (match_id, user) = (Uuid::new_v4(), Uuid::new_v4());
        for hole in 1..=3 {
            queue.enqueue(match_id, user, hole, score(4)).unwrap();
        }

        let mut attempted = Vec::new();
        let report = queue
            .replay(match_id, user, |entry| {
                attempted.push(entry.hole_number);
                async move {
                    if entry.hole_number == 2 {
                        Err(ServiceError::Network("connection reset".into()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(attempted, vec![1, 2]);
        assert_eq!(report.replayed, 1);
        assert_eq!(report.halted_on, Some(2));
        assert_eq!(report.remaining, 2);
        assert_eq!(holes(&queue.get_by_match(match_id)), vec![2, 3]);
    }

    #[tokio::test]
    async fn replay_sends_only_the_given_submitters_entries() {
        let (queue, _, _) = queue();
        let (match_id, alice, bob) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        queue.enqueue(match_id, alice, 1, score(7)).unwrap();
        queue.enqueue(match_id, bob, 2, score(4)).unwrap();

        let mut sent = Vec::new();
        let report = queue
            .replay(match_id, bob, |entry| {
                sent.push((entry.user_id, entry.hole_number));
                async { Ok(()) }
            })
            .await
            .unwrap();

        assert_eq!(sent, vec![(bob, 2)]);
        assert_eq!(report.replayed, 1);
        assert_eq!(report.remaining, 0);
        assert_eq!(queue.get_by_match(match_id)[0].user_id, alice);
    }

    #[tokio::test]
    async fn replay_keeps_an_intent_replaced_mid_flight() {
        let (queue, _, clock) = queue();
        let (match_id, user) = (Uuid::new_v4(), Uuid::new_v4());
        queue.enqueue(match_id, user, 1, score(4)).unwrap();

        let report = queue
            .replay(match_id, user, |_| {
                clock.advance(Duration::from_millis(5));
                queue.enqueue(match_id, user, 1, score(5)).unwrap();
                async { Ok(()) }
            })
            .await
            .unwrap();

        assert_eq!(report.replayed, 1);
        let entries = queue.get_by_match(match_id);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].score_data, score(5));
    }
}
