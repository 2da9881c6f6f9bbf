//! Cached competition leaderboards refreshed in the background.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::{
    dao::backend::ScoringBackend,
    error::ServiceError,
    services::connectivity::Connectivity,
    state::{
        scoring::{CompetitionId, Leaderboard},
        tasks::TaskScope,
    },
};

/// Polls `getLeaderboard` for every competition that was requested at least once.
pub struct LeaderboardFeed {
    backend: Arc<dyn ScoringBackend>,
    connectivity: Connectivity,
    poll_interval: Duration,
    cache: Arc<DashMap<CompetitionId, Leaderboard>>,
    tasks: TaskScope,
}

impl LeaderboardFeed {
    /// Feed refreshing every `poll_interval` while online.
    pub fn new(
        backend: Arc<dyn ScoringBackend>,
        connectivity: Connectivity,
        poll_interval: Duration,
    ) -> Self {
        Self {
            backend,
            connectivity,
            poll_interval,
            cache: Arc::new(DashMap::new()),
            tasks: TaskScope::new(),
        }
    }

    /// Latest leaderboard, fetching it and starting the poller on first request.
    pub async fn get(&self, competition_id: CompetitionId) -> Result<Leaderboard, ServiceError> {
        if let Some(cached) = self.latest(competition_id) {
            return Ok(cached);
        }

        let leaderboard = self.backend.get_leaderboard(competition_id).await?;
        let first = self
            .cache
            .insert(competition_id, leaderboard.clone())
            .is_none();
        if first {
            info!(competition_id = %competition_id, "starting leaderboard feed");
            self.tasks.spawn(
                "leaderboard",
                poll(
                    self.backend.clone(),
                    self.connectivity.clone(),
                    self.cache.clone(),
                    competition_id,
                    self.poll_interval,
                ),
            );
        }
        Ok(leaderboard)
    }

    /// Cached snapshot without touching the backend.
    pub fn latest(&self, competition_id: CompetitionId) -> Option<Leaderboard> {
        self.cache.get(&competition_id).map(|entry| entry.clone())
    }

    /// Stop every poller.
    pub fn shutdown(&self) {
        self.tasks.shutdown();
    }
}

async fn poll(
    backend: Arc<dyn ScoringBackend>,
    connectivity: Connectivity,
    cache: Arc<DashMap<CompetitionId, Leaderboard>>,
    competition_id: CompetitionId,
    every: Duration,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if !connectivity.is_online() {
            debug!(competition_id = %competition_id, "offline; skipping leaderboard poll");
            continue;
        }
        match backend.get_leaderboard(competition_id).await {
            Ok(leaderboard) => {
                cache.insert(competition_id, leaderboard);
            }
            Err(err) => {
                warn!(competition_id = %competition_id, error = %err, "leaderboard poll failed");
            }
        }
    }
}
