//! Polling watch over the shared lock record.
//!
//! Sessions in other processes write the same storage, so their lock changes never reach this
//! process' bus directly. The watch diffs the records it last saw and republishes the changes.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use dashmap::DashMap;
use tokio::time::{MissedTickBehavior, interval};
use tracing::debug;

use crate::{
    dao::models::SessionLockRecord,
    services::session_lock::{LockEvent, SessionLockManager},
    state::scoring::MatchId,
};

/// Diffs lock slots of watched matches and republishes the changes it observes.
pub struct LockWatch {
    locks: Arc<SessionLockManager>,
    watched: DashMap<MatchId, usize>,
    last_seen: Mutex<HashMap<String, Option<SessionLockRecord>>>,
}

impl LockWatch {
    /// Watch over the records of `locks`.
    pub fn new(locks: Arc<SessionLockManager>) -> Self {
        Self {
            locks,
            watched: DashMap::new(),
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Start watching the slot of `match_id`; calls are reference counted.
    pub fn watch(&self, match_id: MatchId) {
        *self.watched.entry(match_id).or_insert(0) += 1;
        let key = self.locks.key_for(match_id);
        let record = self.locks.read(&key);
        self.last_seen().entry(key).or_insert(record);
    }

    /// Stop watching once every [`LockWatch::watch`] call is matched.
    pub fn unwatch(&self, match_id: MatchId) {
        let remove = match self.watched.get_mut(&match_id) {
            Some(mut count) => {
                *count -= 1;
                *count == 0
            }
            None => false,
        };
        if remove {
            self.watched.remove(&match_id);
        }
    }

    /// Read every watched slot once, publishing what changed since the previous pass.
    pub fn poll_once(&self) -> Vec<LockEvent> {
        let mut keys: Vec<String> = self
            .watched
            .iter()
            .map(|entry| self.locks.key_for(*entry.key()))
            .collect();
        keys.sort_unstable();
        keys.dedup();

        let mut events = Vec::new();
        let mut last_seen = self.last_seen();
        for key in keys {
            let current = self.locks.read(&key);
            let previous = last_seen.insert(key, current.clone()).flatten();
            if let Some(event) = diff(previous.as_ref(), current.as_ref()) {
                events.push(event);
            }
        }
        drop(last_seen);

        for event in &events {
            debug!(?event, "lock change observed in shared storage");
            self.locks.publish(*event);
        }
        events
    }

    /// Poll until the task is aborted.
    pub async fn run(self: Arc<Self>, every: Duration) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.poll_once();
        }
    }

    fn last_seen(&self) -> std::sync::MutexGuard<'_, HashMap<String, Option<SessionLockRecord>>> {
        self.last_seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn diff(previous: Option<&SessionLockRecord>, current: Option<&SessionLockRecord>) -> Option<LockEvent> {
    match (previous, current) {
        (None, None) => None,
        (Some(old), None) => Some(LockEvent::Released {
            match_id: old.match_id,
            session_id: old.session_id,
        }),
        (Some(old), Some(new))
            if old.match_id == new.match_id && old.session_id == new.session_id =>
        {
            None
        }
        (_, Some(new)) => Some(LockEvent::Acquired {
            match_id: new.match_id,
            session_id: new.session_id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::{
        dao::local_store::{LocalStore, MemoryStore},
        services::session_lock::{DEFAULT_STALE_AFTER, LockScope},
        state::clock::ManualClock,
    };

    #[tokio::test]
    async fn writes_from_another_process_are_republished() {
        let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let ours = Arc::new(SessionLockManager::new(
            store.clone(),
            clock.clone(),
            LockScope::Global,
            DEFAULT_STALE_AFTER,
        ));
        // Second manager over the same storage stands in for another process.
        let theirs = SessionLockManager::new(store, clock, LockScope::Global, DEFAULT_STALE_AFTER);

        let watch = LockWatch::new(ours.clone());
        let match_id = Uuid::new_v4();
        watch.watch(match_id);
        let mut events = ours.subscribe();

        let other_session = Uuid::new_v4();
        theirs.acquire(match_id, other_session).unwrap();
        theirs.refresh(match_id, other_session).unwrap();
        assert_eq!(watch.poll_once().len(), 1);
        assert!(watch.poll_once().is_empty());

        theirs.release(match_id, other_session).unwrap();
        assert_eq!(
            watch.poll_once(),
            vec![LockEvent::Released {
                match_id,
                session_id: other_session
            }]
        );

        assert!(matches!(events.recv().await.unwrap(), LockEvent::Acquired { .. }));
        assert!(matches!(events.recv().await.unwrap(), LockEvent::Released { .. }));
    }

    #[test]
    fn unwatched_slots_are_ignored() {
        let clock = Arc::new(ManualClock::new(0));
        let locks = Arc::new(SessionLockManager::new(
            Arc::new(MemoryStore::new()),
            clock,
            LockScope::PerMatch,
            DEFAULT_STALE_AFTER,
        ));
        let watch = LockWatch::new(locks.clone());
        let match_id = Uuid::new_v4();
        watch.watch(match_id);
        watch.watch(match_id);
        watch.unwatch(match_id);

        locks.acquire(Uuid::new_v4(), Uuid::new_v4()).unwrap();
        assert!(watch.poll_once().is_empty());

        watch.unwatch(match_id);
        locks.acquire(match_id, Uuid::new_v4()).unwrap();
        assert!(watch.poll_once().is_empty());
    }
}
