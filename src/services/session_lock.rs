//! Cross-session mutual exclusion over the scoring of a match.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::{
        local_store::LocalStore,
        models::SessionLockRecord,
        storage::{StorageError, StorageResult},
    },
    state::{bus::EventBus, clock::Clock, scoring::MatchId},
};

/// Storage key of the lock record.
pub const LOCK_KEY: &str = "scoring_session_lock";
/// Age after which a lock counts as abandoned.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(120);

/// Identifier of an open scoring session.
pub type SessionId = Uuid;

/// How lock records are partitioned on the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LockScope {
    /// One slot for the whole device: locking a match frees any other match.
    #[default]
    Global,
    /// One slot per match.
    PerMatch,
}

/// Lock change broadcast to every open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockEvent {
    /// `session_id` now holds the slot guarding `match_id`.
    Acquired {
        /// Match the holder scores.
        match_id: MatchId,
        /// New holder.
        session_id: SessionId,
    },
    /// `session_id` gave the slot up.
    Released {
        /// Match the former holder scored.
        match_id: MatchId,
        /// Former holder.
        session_id: SessionId,
    },
}

impl LockEvent {
    /// Match named by the event.
    pub fn match_id(&self) -> MatchId {
        match self {
            LockEvent::Acquired { match_id, .. } | LockEvent::Released { match_id, .. } => {
                *match_id
            }
        }
    }

    /// Session that acquired or released the slot.
    pub fn session_id(&self) -> SessionId {
        match self {
            LockEvent::Acquired { session_id, .. } | LockEvent::Released { session_id, .. } => {
                *session_id
            }
        }
    }
}

/// Owner of the lock record in local storage and of its notification bus.
pub struct SessionLockManager {
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    bus: EventBus<LockEvent>,
    scope: LockScope,
    stale_after: Duration,
    guard: Mutex<()>,
}

impl SessionLockManager {
    /// Create a manager over `store`; records older than `stale_after` may be reclaimed.
    pub fn new(
        store: Arc<dyn LocalStore>,
        clock: Arc<dyn Clock>,
        scope: LockScope,
        stale_after: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            bus: EventBus::new(64),
            scope,
            stale_after,
            guard: Mutex::new(()),
        }
    }

    /// Partitioning of the lock records.
    pub fn scope(&self) -> LockScope {
        self.scope
    }

    /// Age after which a record may be reclaimed.
    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Storage key of the slot guarding `match_id`.
    pub fn key_for(&self, match_id: MatchId) -> String {
        match self.scope {
            LockScope::Global => LOCK_KEY.to_string(),
            LockScope::PerMatch => format!("{LOCK_KEY}:{match_id}"),
        }
    }

    /// Whether a change on `other` can affect the slot guarding `match_id`.
    pub fn shares_slot(&self, match_id: MatchId, other: MatchId) -> bool {
        match self.scope {
            LockScope::Global => true,
            LockScope::PerMatch => match_id == other,
        }
    }

    /// Subscribe to lock notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LockEvent> {
        self.bus.subscribe()
    }

    /// Broadcast a change, including ones detected in storage written by another process.
    pub fn publish(&self, event: LockEvent) {
        self.bus.publish(event);
    }

    /// Current record of the slot guarding `match_id`, stale or not.
    ///
    /// Under the global scope the record may concern another match.
    pub fn current(&self, match_id: MatchId) -> Option<SessionLockRecord> {
        self.read(&self.key_for(match_id))
    }

    /// Whether `session_id` holds an unexpired lock on `match_id`.
    pub fn is_held_by(&self, match_id: MatchId, session_id: SessionId) -> bool {
        self.current(match_id).is_some_and(|record| {
            record.match_id == match_id && record.session_id == session_id && !self.is_stale(&record)
        })
    }

    /// Whether `record` is older than the staleness window.
    pub fn is_stale(&self, record: &SessionLockRecord) -> bool {
        let age = self.clock.now_ms().saturating_sub(record.timestamp);
        age > i64::try_from(self.stale_after.as_millis()).unwrap_or(i64::MAX)
    }

    /// Take the lock when the slot is free, already ours, or abandoned.
    pub fn acquire(&self, match_id: MatchId, session_id: SessionId) -> StorageResult<bool> {
        let _lock = self.lock();
        let key = self.key_for(match_id);
        let current = self.read(&key);

        let (granted, changed) = match &current {
            None => (true, true),
            Some(record) if record.session_id == session_id => {
                (true, record.match_id != match_id)
            }
            Some(record) if self.is_stale(record) => {
                info!(
                    match_id = %record.match_id,
                    session_id = %record.session_id,
                    "reclaiming stale scoring lock"
                );
                (true, true)
            }
            Some(_) => (false, false),
        };

        if granted {
            self.write(&key, match_id, session_id)?;
        }
        if changed {
            info!(match_id = %match_id, session_id = %session_id, "scoring lock acquired");
            self.bus.publish(LockEvent::Acquired {
                match_id,
                session_id,
            });
        }
        Ok(granted)
    }

    /// Take the lock unconditionally, returning the record it replaced.
    pub fn force_acquire(
        &self,
        match_id: MatchId,
        session_id: SessionId,
    ) -> StorageResult<Option<SessionLockRecord>> {
        let _lock = self.lock();
        let key = self.key_for(match_id);
        let previous = self.read(&key);
        self.write(&key, match_id, session_id)?;

        if let Some(previous) = previous.as_ref().filter(|record| record.session_id != session_id) {
            warn!(
                match_id = %match_id,
                previous_session = %previous.session_id,
                session_id = %session_id,
                "scoring lock taken over"
            );
        }
        self.bus.publish(LockEvent::Acquired {
            match_id,
            session_id,
        });
        Ok(previous)
    }

    /// Heartbeat the lock. Returns `false` when `session_id` no longer holds it.
    pub fn refresh(&self, match_id: MatchId, session_id: SessionId) -> StorageResult<bool> {
        let _lock = self.lock();
        let key = self.key_for(match_id);
        match self.read(&key) {
            Some(record) if record.session_id == session_id && record.match_id == match_id => {
                self.write(&key, match_id, session_id)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Clear the lock if `session_id` owns it; no-op otherwise.
    pub fn release(&self, match_id: MatchId, session_id: SessionId) -> StorageResult<bool> {
        let _lock = self.lock();
        let key = self.key_for(match_id);
        match self.read(&key) {
            Some(record) if record.session_id == session_id => {
                self.store.remove(&key)?;
                info!(match_id = %record.match_id, session_id = %session_id, "scoring lock released");
                self.bus.publish(LockEvent::Released {
                    match_id: record.match_id,
                    session_id,
                });
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn read(&self, key: &str) -> Option<SessionLockRecord> {
        let raw = match self.store.get(key) {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(key, error = %err, "scoring lock unreadable, treating as free");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(key, error = %err, "scoring lock record corrupt, treating as free");
                None
            }
        }
    }

    fn write(&self, key: &str, match_id: MatchId, session_id: SessionId) -> StorageResult<()> {
        let record = SessionLockRecord {
            match_id,
            session_id,
            timestamp: self.clock.now_ms(),
        };
        let raw = serde_json::to_string(&record).map_err(|source| StorageError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.store.set(key, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dao::local_store::MemoryStore, state::clock::ManualClock};

    fn manager(scope: LockScope) -> (SessionLockManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let manager = SessionLockManager::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            scope,
            DEFAULT_STALE_AFTER,
        );
        (manager, clock)
    }

    #[test]
    fn second_session_is_refused_until_lock_goes_stale() {
        let (locks, clock) = manager(LockScope::Global);
        let (m, s1, s2) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        assert!(locks.acquire(m, s1).unwrap());
        assert!(locks.acquire(m, s1).unwrap());
        assert!(!locks.acquire(m, s2).unwrap());

        clock.advance(Duration::from_secs(120));
        assert!(!locks.acquire(m, s2).unwrap());
        clock.advance(Duration::from_millis(1));
        assert!(locks.acquire(m, s2).unwrap());
        assert_eq!(locks.current(m).unwrap().session_id, s2);
    }

    #[test]
    fn refresh_keeps_the_holder_alive() {
        let (locks, clock) = manager(LockScope::Global);
        let (m, s1, s2) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        locks.acquire(m, s1).unwrap();
        for _ in 0..10 {
            clock.advance(Duration::from_secs(30));
            assert!(locks.refresh(m, s1).unwrap());
        }
        assert!(!locks.acquire(m, s2).unwrap());
        assert!(!locks.refresh(m, s2).unwrap());
    }

    #[test]
    fn release_by_non_owner_is_a_no_op() {
        let (locks, _) = manager(LockScope::Global);
        let (m, s1, s2) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        locks.acquire(m, s1).unwrap();
        let before = locks.current(m);
        assert!(!locks.release(m, s2).unwrap());
        assert_eq!(locks.current(m), before);

        assert!(locks.release(m, s1).unwrap());
        assert!(locks.current(m).is_none());
    }

    #[test]
    fn global_slot_is_shared_across_matches() {
        let (global, _) = manager(LockScope::Global);
        let (m1, m2, s1, s2) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        assert!(global.acquire(m1, s1).unwrap());
        assert!(!global.acquire(m2, s2).unwrap());

        let (per_match, _) = manager(LockScope::PerMatch);
        assert!(per_match.acquire(m1, s1).unwrap());
        assert!(per_match.acquire(m2, s2).unwrap());
        assert!(!per_match.shares_slot(m1, m2));
    }

    #[test]
    fn force_acquire_replaces_the_holder() {
        let (locks, _) = manager(LockScope::Global);
        let (m, s1, s2) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        locks.acquire(m, s1).unwrap();

        let previous = locks.force_acquire(m, s2).unwrap();
        assert_eq!(previous.map(|record| record.session_id), Some(s1));
        assert!(locks.is_held_by(m, s2));
        assert!(!locks.is_held_by(m, s1));
    }

    #[tokio::test]
    async fn changes_are_broadcast() {
        let (locks, _) = manager(LockScope::Global);
        let mut events = locks.subscribe();
        let (m, s1) = (Uuid::new_v4(), Uuid::new_v4());

        locks.acquire(m, s1).unwrap();
        locks.refresh(m, s1).unwrap();
        locks.release(m, s1).unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            LockEvent::Acquired {
                match_id: m,
                session_id: s1
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            LockEvent::Released {
                match_id: m,
                session_id: s1
            }
        );
    }
}
