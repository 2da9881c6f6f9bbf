/// Broadcast bus wrapper.
pub mod bus;
pub mod clock;
pub mod scoring;
/// View state machine of a scoring session.
pub mod state_machine;
pub mod tasks;

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::{
    config::AppConfig,
    dao::{backend::ScoringBackend, local_store::LocalStore},
    error::ServiceError,
    services::{
        connectivity::Connectivity,
        leaderboard_service::LeaderboardFeed,
        lock_watch::LockWatch,
        offline_queue::OfflineQueue,
        scoring_session::ScoringSession,
        session_lock::{SessionId, SessionLockManager},
    },
    state::clock::Clock,
};

/// Application state shared with every handler.
pub type SharedState = Arc<AppState>;

/// Explicit context owning the process-wide scoring resources.
///
/// [`AppState::new`] is the init step; [`AppState::close_all_sessions`] the reset.
pub struct AppState {
    config: AppConfig,
    clock: Arc<dyn Clock>,
    backend: Arc<dyn ScoringBackend>,
    queue: Arc<OfflineQueue>,
    locks: Arc<SessionLockManager>,
    lock_watch: Arc<LockWatch>,
    connectivity: Connectivity,
    leaderboard: LeaderboardFeed,
    sessions: DashMap<SessionId, Arc<ScoringSession>>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(
        config: AppConfig,
        store: Arc<dyn LocalStore>,
        backend: Arc<dyn ScoringBackend>,
        clock: Arc<dyn Clock>,
    ) -> SharedState {
        let queue = Arc::new(OfflineQueue::new(store.clone(), clock.clone()));
        let locks = Arc::new(SessionLockManager::new(
            store,
            clock.clone(),
            config.lock_scope,
            config.lock_stale_after,
        ));
        let lock_watch = Arc::new(LockWatch::new(locks.clone()));
        let connectivity = Connectivity::new();
        let leaderboard =
            LeaderboardFeed::new(backend.clone(), connectivity.clone(), config.leaderboard_poll);

        Arc::new(Self {
            config,
            clock,
            backend,
            queue,
            locks,
            lock_watch,
            connectivity,
            leaderboard,
            sessions: DashMap::new(),
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Wall-clock source of persisted timestamps.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Scoring service client.
    pub fn backend(&self) -> &Arc<dyn ScoringBackend> {
        &self.backend
    }

    /// Offline queue shared by every session of the device.
    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    /// Lock manager of the device.
    pub fn locks(&self) -> &Arc<SessionLockManager> {
        &self.locks
    }

    /// Watch over lock records written by other processes.
    pub fn lock_watch(&self) -> &Arc<LockWatch> {
        &self.lock_watch
    }

    /// Effective connectivity.
    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Cached competition leaderboards.
    pub fn leaderboard(&self) -> &LeaderboardFeed {
        &self.leaderboard
    }

    /// Registry of open scoring sessions keyed by their identifier.
    pub fn sessions(&self) -> &DashMap<SessionId, Arc<ScoringSession>> {
        &self.sessions
    }

    /// Look up an open session.
    pub fn session(&self, session_id: SessionId) -> Result<Arc<ScoringSession>, ServiceError> {
        self.sessions
            .get(&session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}` not found")))
    }

    /// Tear down every open session, releasing their locks, and stop background feeds.
    pub async fn close_all_sessions(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, session)) = self.sessions.remove(&id) {
                session.close().await;
            }
        }
        self.leaderboard.shutdown();
        info!("all scoring sessions closed");
    }
}
