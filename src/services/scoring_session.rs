//! Scoring session: one open view of a match by one user.
//!
//! A session composes the scoring view state machine, hole submissions with the offline queue
//! as fallback, and the session lock. Its timers and listeners live in a [`TaskScope`] torn down
//! by [`ScoringSession::close`]; results landing after teardown are discarded.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime},
};

use futures::future::BoxFuture;
use tokio::{
    sync::{
        Mutex, RwLock,
        broadcast::{self, error::RecvError},
        watch,
    },
    time::{MissedTickBehavior, interval, timeout},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::backend::{BackendResult, ScoringBackend},
    dto::{
        format_system_time,
        phase::VisiblePhase,
        session::{SessionErrorPayload, SessionStateResponse, SubmitOutcome},
        sse::ServerEvent,
    },
    error::ServiceError,
    services::{
        connectivity::Connectivity,
        hole_scoring,
        lock_watch::LockWatch,
        offline_queue::{OfflineQueue, ReplayReport},
        session_events,
        session_lock::{LockEvent, SessionId, SessionLockManager},
    },
    state::{
        SharedState,
        bus::EventBus,
        scoring::{
            DecidedResult, MAX_HOLES, MatchId, MatchSummary, ScoreSubmission, ScoringView, UserId,
        },
        state_machine::{ScoringEvent, ScoringPhase, ScoringStateMachine},
        tasks::TaskScope,
    },
};

/// Timers of a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimings {
    /// Interval of the background view refresh.
    pub poll_interval: Duration,
    /// Interval of the lock heartbeat.
    pub lock_refresh: Duration,
    /// Upper bound for a single backend call.
    pub call_timeout: Duration,
}

impl From<&AppConfig> for SessionTimings {
    fn from(config: &AppConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            lock_refresh: config.lock_refresh,
            call_timeout: config.submit_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    /// Background poll: transient failures keep the last view without surfacing an error.
    Silent,
    Surface,
}

struct SessionInner {
    current_hole: u8,
    match_summary: Option<MatchSummary>,
    blocked: bool,
    decision_notice: Option<DecidedResult>,
    decision_announced: bool,
}

impl Default for SessionInner {
    fn default() -> Self {
        Self {
            current_hole: 1,
            match_summary: None,
            blocked: false,
            decision_notice: None,
            decision_announced: false,
        }
    }
}

/// Live scoring session of `user_id` on `match_id`.
pub struct ScoringSession {
    id: SessionId,
    match_id: MatchId,
    user_id: UserId,
    backend: Arc<dyn ScoringBackend>,
    queue: Arc<OfflineQueue>,
    locks: Arc<SessionLockManager>,
    lock_watch: Arc<LockWatch>,
    connectivity: Connectivity,
    timings: SessionTimings,
    machine: RwLock<ScoringStateMachine>,
    inner: RwLock<SessionInner>,
    events: EventBus<ServerEvent>,
    submit_gate: Mutex<()>,
    tasks: TaskScope,
    closed: AtomicBool,
}

impl ScoringSession {
    /// Open a session: take the lock (or enter the blocked state), start timers and listeners,
    /// then load the scoring view. A failed initial load is recorded on the session state.
    pub async fn open(
        state: &SharedState,
        match_id: MatchId,
        user_id: UserId,
    ) -> Result<Arc<Self>, ServiceError> {
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            match_id,
            user_id,
            backend: state.backend().clone(),
            queue: state.queue().clone(),
            locks: state.locks().clone(),
            lock_watch: state.lock_watch().clone(),
            connectivity: state.connectivity().clone(),
            timings: SessionTimings::from(state.config()),
            machine: RwLock::new(ScoringStateMachine::new()),
            inner: RwLock::new(SessionInner::default()),
            events: EventBus::new(64),
            submit_gate: Mutex::new(()),
            tasks: TaskScope::new(),
            closed: AtomicBool::new(false),
        });

        if !session.locks.acquire(match_id, session.id)? {
            session.block(session.lock_holder()).await;
        }
        session.lock_watch.watch(match_id);
        session.spawn_background();
        let blocked = session.is_blocked().await;
        info!(
            session_id = %session.id,
            match_id = %match_id,
            user_id = %user_id,
            blocked,
            "scoring session opened"
        );

        if let Err(err) = session.fetch(FetchMode::Surface).await {
            debug!(session_id = %session.id, error = %err, "initial scoring view load failed");
        }
        Ok(session)
    }

    /// Identifier of the session.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Match being scored.
    pub fn match_id(&self) -> MatchId {
        self.match_id
    }

    /// User acting through this session.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Whether [`ScoringSession::close`] ran.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether another session holds the lock, making this one read-only.
    pub async fn is_blocked(&self) -> bool {
        self.inner.read().await.blocked
    }

    /// Submissions this session's user queued for the match.
    pub fn pending_queue_size(&self) -> usize {
        self.queue.size_for_user(self.match_id, self.user_id)
    }

    /// Last confirmed scoring view.
    pub async fn current_view(&self) -> Option<Arc<ScoringView>> {
        self.machine.read().await.phase().view().cloned()
    }

    /// Current phase of the view state machine.
    pub async fn phase(&self) -> ScoringPhase {
        self.machine.read().await.phase().clone()
    }

    /// Subscribe to the session's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Read state exposed to the presentation layer.
    pub async fn snapshot(&self) -> SessionStateResponse {
        let (phase, view, failure) = {
            let machine = self.machine.read().await;
            let phase = machine.phase();
            (
                VisiblePhase::from(phase),
                phase.view().cloned(),
                phase.failure().cloned(),
            )
        };
        let inner = self.inner.read().await;

        SessionStateResponse {
            session_id: self.id,
            match_id: self.match_id,
            user_id: self.user_id,
            phase,
            derived: view.as_ref().map(|view| view.derived_for(self.user_id)),
            scoring_view: view.map(|view| ScoringView::clone(&view)),
            current_hole: inner.current_hole,
            is_loading: phase == VisiblePhase::Loading,
            is_submitting: phase == VisiblePhase::Submitting,
            error: failure.map(|failure| SessionErrorPayload {
                kind: failure.kind,
                message: failure.message,
            }),
            match_summary: inner.match_summary.clone(),
            is_offline: !self.connectivity.is_online(),
            is_session_blocked: inner.blocked,
            pending_queue_size: self.pending_queue_size(),
            decision_notice: inner.decision_notice.clone(),
            updated_at: format_system_time(SystemTime::now()),
        }
    }

    /// Reload the scoring view, surfacing any failure.
    pub async fn refetch(&self) -> Result<Arc<ScoringView>, ServiceError> {
        self.fetch(FetchMode::Surface).await
    }

    /// Move the hole cursor within the holes still in play.
    pub async fn set_current_hole(&self, hole_number: u8) -> Result<(), ServiceError> {
        self.ensure_open()?;
        let total = self
            .current_view()
            .await
            .map_or(MAX_HOLES, |view| view.total_holes());
        if hole_number == 0 || hole_number > total.max(1) {
            return Err(ServiceError::InvalidInput(format!(
                "hole {hole_number} is outside 1..={total}"
            )));
        }
        self.inner.write().await.current_hole = hole_number;
        self.publish_state().await;
        Ok(())
    }

    /// Submit the user's score for a hole.
    ///
    /// Offline submissions and transient failures are queued; rule violations fail right away
    /// and are never queued.
    pub async fn submit_score(
        &self,
        hole_number: u8,
        submission: ScoreSubmission,
    ) -> Result<SubmitOutcome, ServiceError> {
        self.ensure_open()?;
        self.ensure_writer().await?;
        let _gate = self.submit_gate.lock().await;

        let view = self.current_view().await;
        let checked = match view.as_deref() {
            Some(view) => {
                hole_scoring::check_submission(view, self.user_id, hole_number, &submission)
            }
            None => hole_scoring::check_ranges(hole_number, MAX_HOLES, &submission),
        };
        if let Err(err) = checked {
            return self.fail(err).await;
        }

        let had_view = view.is_some();
        if had_view {
            self.apply(ScoringEvent::SubmitStarted).await;
        }

        if !self.connectivity.is_online() {
            debug!(match_id = %self.match_id, hole_number, "offline; hole score goes to the queue");
            return self.defer(hole_number, submission, had_view).await;
        }

        let request = self.backend.submit_hole_score(
            self.match_id,
            self.user_id,
            hole_number,
            submission.clone(),
        );
        let result = self.call(request).await;
        if self.is_closed() {
            debug!(session_id = %self.id, "discarding submission result after teardown");
            return Err(ServiceError::SessionClosed);
        }

        match result {
            Ok(view) => {
                self.drop_superseded(hole_number);
                let view = Arc::new(view);
                self.apply_confirmed(view.clone()).await;
                self.after_view(&view).await;
                Ok(SubmitOutcome::Confirmed)
            }
            Err(err) if err.is_transient() => {
                warn!(
                    match_id = %self.match_id,
                    hole_number,
                    error = %err,
                    "hole submission failed; queueing for replay"
                );
                self.defer(hole_number, submission, had_view).await
            }
            Err(err) => self.fail(err).await,
        }
    }

    /// Finalize the user's scorecard. Requires connectivity and no queued entries of the user for
    /// the match.
    pub async fn submit_scorecard(&self) -> Result<MatchSummary, ServiceError> {
        self.ensure_open()?;
        self.ensure_writer().await?;
        let _gate = self.submit_gate.lock().await;

        let Some(view) = self.current_view().await else {
            return self
                .fail(ServiceError::InvalidState("scoring view not loaded".into()))
                .await;
        };
        if let Err(err) = self.check_scorecard(&view) {
            return self.fail(err).await;
        }

        self.apply(ScoringEvent::SubmitStarted).await;
        let result = self
            .call(self.backend.submit_scorecard(self.match_id, self.user_id))
            .await;
        if self.is_closed() {
            return Err(ServiceError::SessionClosed);
        }

        let summary = match result {
            Ok(summary) => summary,
            Err(err) => return self.fail(err).await,
        };
        info!(match_id = %self.match_id, user_id = %self.user_id, "scorecard submitted");
        self.inner.write().await.match_summary = Some(summary.clone());

        match self
            .call(self.backend.get_scoring_view(self.match_id, self.user_id))
            .await
        {
            Ok(view) if !self.is_closed() => {
                let view = Arc::new(view);
                self.apply_confirmed(view.clone()).await;
                self.after_view(&view).await;
            }
            _ => {
                self.apply(ScoringEvent::SubmitDeferred).await;
                self.publish_state().await;
            }
        }
        Ok(summary)
    }

    /// Concede the match on behalf of the user's team.
    pub async fn concede_match(
        &self,
        reason: Option<String>,
    ) -> Result<Arc<ScoringView>, ServiceError> {
        self.ensure_open()?;
        self.ensure_writer().await?;
        let _gate = self.submit_gate.lock().await;

        let Some(view) = self.current_view().await else {
            return self
                .fail(ServiceError::InvalidState("scoring view not loaded".into()))
                .await;
        };
        let Some(team) = view.match_info.team_of(self.user_id) else {
            return self
                .fail(ServiceError::Forbidden(
                    "only match participants can concede".into(),
                ))
                .await;
        };
        if view.match_info.status.is_terminal() {
            return self
                .fail(ServiceError::InvalidState("match is already finished".into()))
                .await;
        }
        if !self.connectivity.is_online() {
            return self
                .fail(ServiceError::Network("a concession needs connectivity".into()))
                .await;
        }

        self.apply(ScoringEvent::SubmitStarted).await;
        let result = self
            .call(
                self.backend
                    .concede_match(self.match_id, self.user_id, team, reason),
            )
            .await;
        if self.is_closed() {
            return Err(ServiceError::SessionClosed);
        }

        match result {
            Ok(view) => {
                info!(match_id = %self.match_id, team = ?team, "match conceded");
                let view = Arc::new(view);
                self.apply_confirmed(view.clone()).await;
                self.after_view(&view).await;
                Ok(view)
            }
            Err(err) => self.fail(err).await,
        }
    }

    /// Force the lock onto this session; the previous holder becomes blocked.
    pub async fn take_over(&self) -> Result<(), ServiceError> {
        self.ensure_open()?;
        let previous = self.locks.force_acquire(self.match_id, self.id)?;
        info!(
            session_id = %self.id,
            match_id = %self.match_id,
            previous = ?previous.map(|record| record.session_id),
            "scoring session took over the lock"
        );
        self.unblock().await;
        self.sync_after_reclaim().await;
        Ok(())
    }

    /// Dismiss the early-decision notice. Scoring stays closed beyond the decided boundary.
    pub async fn acknowledge_decision(&self) -> Option<DecidedResult> {
        let dismissed = self.inner.write().await.decision_notice.take();
        self.publish_state().await;
        dismissed
    }

    /// Send the submissions this user queued for the match, then reload the view.
    ///
    /// Entries queued by other users of the device wait for a session of their own submitter.
    pub async fn replay_queue(&self) -> Result<ReplayReport, ServiceError> {
        self.ensure_open()?;
        let report = {
            let _gate = self.submit_gate.lock().await;
            let backend = self.backend.clone();
            let limit = self.timings.call_timeout;
            self.queue
                .replay(self.match_id, self.user_id, move |entry| {
                    let request = backend.submit_hole_score(
                        entry.match_id,
                        entry.user_id,
                        entry.hole_number,
                        entry.score_data,
                    );
                    async move { bounded(limit, request).await.map(|_| ()) }
                })
                .await?
        };

        info!(
            match_id = %self.match_id,
            replayed = report.replayed,
            remaining = report.remaining,
            "offline queue replayed"
        );
        session_events::broadcast_replay(&self.events, self.match_id, &report);
        if let Some(err) = report.error.as_ref().filter(|err| !err.is_transient()) {
            warn!(
                match_id = %self.match_id,
                hole_number = ?report.halted_on,
                error = %err,
                "queued hole score rejected; it stays queued until resubmitted or discarded"
            );
            self.record_failure(err).await;
        }
        if let Err(err) = self.fetch(FetchMode::Silent).await {
            debug!(error = %err, "refetch after replay failed");
        }
        Ok(report)
    }

    /// Drop the user's queued intent for a hole, typically one the backend keeps rejecting.
    pub async fn discard_queued(&self, hole_number: u8) -> Result<(), ServiceError> {
        self.ensure_open()?;
        self.ensure_writer().await?;
        let _gate = self.submit_gate.lock().await;

        match self.queue.remove(self.match_id, self.user_id, hole_number) {
            Ok(true) => {}
            Ok(false) => {
                return Err(ServiceError::NotFound(format!(
                    "no queued score for hole {hole_number}"
                )));
            }
            Err(err) => return self.fail(err.into()).await,
        }
        info!(match_id = %self.match_id, hole_number, "queued hole score discarded");
        session_events::broadcast_queue_changed(
            &self.events,
            self.match_id,
            self.pending_queue_size(),
        );
        self.publish_state().await;
        Ok(())
    }

    /// Tear the session down: stop timers and listeners, release the lock, discard late results.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.tasks.shutdown();
        self.lock_watch.unwatch(self.match_id);
        if let Err(err) = self.locks.release(self.match_id, self.id) {
            warn!(session_id = %self.id, error = %err, "failed to release scoring lock; it will expire");
        }
        self.apply(ScoringEvent::TornDown).await;
        info!(session_id = %self.id, match_id = %self.match_id, "scoring session closed");
    }

    fn spawn_background(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.tasks
            .spawn("poll", poll_loop(weak.clone(), self.timings.poll_interval));
        self.tasks.spawn(
            "lock-refresh",
            refresh_loop(weak.clone(), self.timings.lock_refresh),
        );
        self.tasks
            .spawn("lock-events", lock_listener(weak.clone(), self.locks.subscribe()));
        self.tasks.spawn(
            "connectivity",
            connectivity_listener(weak, self.connectivity.subscribe()),
        );
    }

    fn ensure_open(&self) -> Result<(), ServiceError> {
        if self.is_closed() {
            Err(ServiceError::SessionClosed)
        } else {
            Ok(())
        }
    }

    /// Only the lock holder may write.
    async fn ensure_writer(&self) -> Result<(), ServiceError> {
        let conflict = ServiceError::SessionConflict {
            match_id: self.match_id,
        };
        if self.is_blocked().await {
            return self.fail(conflict).await;
        }
        if !self.locks.is_held_by(self.match_id, self.id)
            && !self.locks.acquire(self.match_id, self.id)?
        {
            self.block(self.lock_holder()).await;
            return self.fail(conflict).await;
        }
        Ok(())
    }

    fn check_scorecard(&self, view: &ScoringView) -> Result<(), ServiceError> {
        let flags = view.derived_for(self.user_id);
        if !flags.is_match_player {
            return Err(ServiceError::Forbidden(
                "only match participants can submit a scorecard".into(),
            ));
        }
        if flags.has_submitted {
            return Err(ServiceError::InvalidState(
                "scorecard already submitted for this match".into(),
            ));
        }
        if !view.match_info.status.is_terminal() && !flags.can_submit_scorecard {
            return Err(ServiceError::InvalidState(format!(
                "{} of {} holes validated",
                flags.validated_holes, flags.total_holes
            )));
        }
        if self.pending_queue_size() > 0 {
            return Err(ServiceError::InvalidState(
                "queued hole scores must sync before the scorecard".into(),
            ));
        }
        if !self.connectivity.is_online() {
            return Err(ServiceError::Network(
                "scorecards are submitted online only".into(),
            ));
        }
        Ok(())
    }

    async fn fetch(&self, mode: FetchMode) -> Result<Arc<ScoringView>, ServiceError> {
        self.ensure_open()?;
        self.apply(ScoringEvent::FetchStarted).await;
        let result = self
            .call(self.backend.get_scoring_view(self.match_id, self.user_id))
            .await;
        if self.is_closed() {
            debug!(session_id = %self.id, "discarding scoring view received after teardown");
            return Err(ServiceError::SessionClosed);
        }

        match result {
            Ok(view) => {
                let view = Arc::new(view);
                self.apply(ScoringEvent::Fetched(view.clone())).await;
                self.after_view(&view).await;
                Ok(view)
            }
            Err(err) => {
                let has_view = self.current_view().await.is_some();
                if mode == FetchMode::Silent && err.is_transient() && has_view {
                    debug!(match_id = %self.match_id, error = %err, "poll failed; keeping last view");
                } else {
                    self.record_failure(&err).await;
                }
                Err(err)
            }
        }
    }

    async fn defer(
        &self,
        hole_number: u8,
        submission: ScoreSubmission,
        had_view: bool,
    ) -> Result<SubmitOutcome, ServiceError> {
        if let Err(err) = self
            .queue
            .enqueue(self.match_id, self.user_id, hole_number, submission)
        {
            return self.fail(err.into()).await;
        }
        if had_view {
            self.apply(ScoringEvent::SubmitDeferred).await;
        }
        session_events::broadcast_queue_changed(
            &self.events,
            self.match_id,
            self.pending_queue_size(),
        );
        self.publish_state().await;
        Ok(SubmitOutcome::Queued)
    }

    /// A confirmed submission replaces any older queued intent for the same hole.
    fn drop_superseded(&self, hole_number: u8) {
        match self.queue.remove(self.match_id, self.user_id, hole_number) {
            Ok(true) => session_events::broadcast_queue_changed(
                &self.events,
                self.match_id,
                self.pending_queue_size(),
            ),
            Ok(false) => {}
            Err(err) => warn!(hole_number, error = %err, "failed to drop superseded queue entry"),
        }
    }

    async fn call<T>(
        &self,
        request: BoxFuture<'static, BackendResult<T>>,
    ) -> Result<T, ServiceError> {
        bounded(self.timings.call_timeout, request).await
    }

    async fn apply(&self, event: ScoringEvent) -> bool {
        let mut machine = self.machine.write().await;
        match machine.apply(event) {
            Ok(_) => true,
            Err(err) => {
                debug!(
                    session_id = %self.id,
                    from = ?VisiblePhase::from(&err.from),
                    "session transition rejected"
                );
                false
            }
        }
    }

    /// Apply a view confirmed by a write, even if a failure interleaved since it started.
    async fn apply_confirmed(&self, view: Arc<ScoringView>) {
        if !self.apply(ScoringEvent::Submitted(view.clone())).await {
            self.apply(ScoringEvent::Fetched(view)).await;
        }
    }

    async fn after_view(&self, view: &ScoringView) {
        let total = view.total_holes();
        let announce = {
            let mut inner = self.inner.write().await;
            if total > 0 && inner.current_hole > total {
                inner.current_hole = total;
            }
            match &view.match_info.decided_result {
                Some(result) if view.match_info.is_decided && !inner.decision_announced => {
                    inner.decision_announced = true;
                    inner.decision_notice = Some(result.clone());
                    Some(result.clone())
                }
                _ => None,
            }
        };

        if let Some(result) = announce {
            info!(match_id = %self.match_id, score = %result.score, "match decided");
            session_events::broadcast_match_decided(&self.events, self.match_id, result, total);
        }
        self.publish_state().await;
    }

    async fn record_failure(&self, err: &ServiceError) {
        let kind = err.kind();
        let message = err.to_string();
        self.apply(ScoringEvent::Failed {
            kind,
            message: message.clone(),
        })
        .await;
        session_events::broadcast_error(&self.events, kind, &message);
        self.publish_state().await;
    }

    async fn fail<T>(&self, err: ServiceError) -> Result<T, ServiceError> {
        self.record_failure(&err).await;
        Err(err)
    }

    async fn publish_state(&self) {
        if self.events.subscriber_count() == 0 {
            return;
        }
        let state = self.snapshot().await;
        session_events::broadcast_view_updated(&self.events, &state);
    }

    fn lock_holder(&self) -> Option<SessionId> {
        self.locks
            .current(self.match_id)
            .map(|record| record.session_id)
    }

    async fn block(&self, holder: Option<SessionId>) {
        let changed = {
            let mut inner = self.inner.write().await;
            !std::mem::replace(&mut inner.blocked, true)
        };
        if changed {
            warn!(
                session_id = %self.id,
                match_id = %self.match_id,
                holder = ?holder,
                "another session holds the scoring lock; session is read-only"
            );
            session_events::broadcast_session_blocked(&self.events, self.match_id, holder);
            self.publish_state().await;
        }
    }

    async fn unblock(&self) {
        let changed = {
            let mut inner = self.inner.write().await;
            std::mem::replace(&mut inner.blocked, false)
        };
        if changed {
            info!(session_id = %self.id, match_id = %self.match_id, "scoring lock regained");
            session_events::broadcast_session_unblocked(&self.events, self.match_id);
            self.publish_state().await;
        }
    }

    /// Try to take the lock back while blocked.
    async fn try_reclaim(&self) {
        if self.is_closed() {
            return;
        }
        match self.locks.acquire(self.match_id, self.id) {
            Ok(true) => {
                self.unblock().await;
                self.sync_after_reclaim().await;
            }
            Ok(false) => debug!(session_id = %self.id, "scoring lock still held elsewhere"),
            Err(err) => warn!(session_id = %self.id, error = %err, "failed to reclaim scoring lock"),
        }
    }

    async fn sync_after_reclaim(&self) {
        if self.connectivity.is_online() && self.pending_queue_size() > 0 {
            if let Err(err) = self.replay_queue().await {
                warn!(match_id = %self.match_id, error = %err, "queue replay failed");
            }
        } else if let Err(err) = self.fetch(FetchMode::Silent).await {
            debug!(error = %err, "refetch after lock change failed");
        }
    }

    async fn poll_tick(&self) {
        if self.is_closed() {
            return;
        }
        if self.is_blocked().await {
            self.try_reclaim().await;
        }
        if !self.connectivity.is_online() {
            debug!(match_id = %self.match_id, "offline; poll suspended");
            return;
        }
        if !self.is_blocked().await && self.pending_queue_size() > 0 {
            if let Err(err) = self.replay_queue().await {
                warn!(match_id = %self.match_id, error = %err, "queue replay failed");
            }
            return;
        }
        if let Err(err) = self.fetch(FetchMode::Silent).await {
            debug!(match_id = %self.match_id, error = %err, "poll failed");
        }
    }

    async fn heartbeat(&self) {
        if self.is_closed() || self.is_blocked().await {
            return;
        }
        match self.locks.refresh(self.match_id, self.id) {
            Ok(true) => {}
            Ok(false) => self.block(self.lock_holder()).await,
            Err(err) => warn!(session_id = %self.id, error = %err, "failed to refresh scoring lock"),
        }
    }

    async fn on_lock_event(&self, event: LockEvent) {
        if self.is_closed()
            || event.session_id() == self.id
            || !self.locks.shares_slot(self.match_id, event.match_id())
        {
            return;
        }

        if self.is_blocked().await {
            self.try_reclaim().await;
        } else if let LockEvent::Acquired { session_id, .. } = event {
            if !self.locks.is_held_by(self.match_id, self.id) {
                self.block(Some(session_id)).await;
            }
        }
    }

    /// Catch up after missed notifications.
    async fn reconcile_lock(&self) {
        if self.is_blocked().await {
            self.try_reclaim().await;
        } else if !self.locks.is_held_by(self.match_id, self.id) {
            self.block(self.lock_holder()).await;
        }
    }

    async fn on_connectivity(&self, online: bool) {
        if self.is_closed() {
            return;
        }
        session_events::broadcast_connectivity_changed(&self.events, online);
        if !online {
            self.publish_state().await;
            return;
        }

        if !self.is_blocked().await && self.pending_queue_size() > 0 {
            if let Err(err) = self.replay_queue().await {
                warn!(match_id = %self.match_id, error = %err, "queue replay failed");
            }
        } else if let Err(err) = self.fetch(FetchMode::Silent).await {
            debug!(error = %err, "refetch after reconnect failed");
        }
    }
}

impl Drop for ScoringSession {
    fn drop(&mut self) {
        if !self.is_closed() {
            if let Err(err) = self.locks.release(self.match_id, self.id) {
                warn!(session_id = %self.id, error = %err, "failed to release scoring lock on drop");
            }
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    request: BoxFuture<'static, BackendResult<T>>,
) -> Result<T, ServiceError> {
    match timeout(limit, request).await {
        Ok(result) => result.map_err(ServiceError::from),
        Err(_) => Err(ServiceError::Timeout),
    }
}

async fn poll_loop(session: Weak<ScoringSession>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(session) = session.upgrade() else {
            break;
        };
        session.poll_tick().await;
    }
}

async fn refresh_loop(session: Weak<ScoringSession>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(session) = session.upgrade() else {
            break;
        };
        session.heartbeat().await;
    }
}

async fn lock_listener(session: Weak<ScoringSession>, mut receiver: broadcast::Receiver<LockEvent>) {
    loop {
        let event = match receiver.recv().await {
            Ok(event) => Some(event),
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "lock notifications lagged; reconciling");
                None
            }
            Err(RecvError::Closed) => break,
        };
        let Some(session) = session.upgrade() else {
            break;
        };
        match event {
            Some(event) => session.on_lock_event(event).await,
            None => session.reconcile_lock().await,
        }
    }
}

async fn connectivity_listener(session: Weak<ScoringSession>, mut receiver: watch::Receiver<bool>) {
    while receiver.changed().await.is_ok() {
        let online = *receiver.borrow_and_update();
        let Some(session) = session.upgrade() else {
            break;
        };
        session.on_connectivity(online).await;
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        config::{AppConfig, BackendConfig},
        dao::{
            backend::{InMemoryBackend, MatchSetup},
            local_store::MemoryStore,
        },
        services::session_lock::LockScope,
        state::{
            AppState,
            clock::ManualClock,
            scoring::{GrossScore, MatchStatus, Participant, Team, ValidationStatus},
            state_machine::ErrorKind,
        },
    };

    struct Fixture {
        state: SharedState,
        backend: InMemoryBackend,
        clock: Arc<ManualClock>,
        match_id: MatchId,
        alice: UserId,
        bob: UserId,
    }

    fn fixture_with(scope: LockScope) -> Fixture {
        let participant = |team: Team| Participant {
            user_id: Uuid::new_v4(),
            name: format!("Player {team:?}"),
            team,
            handicap_allowance: 0,
        };
        let (a, b) = (participant(Team::A), participant(Team::B));
        let (alice, bob) = (a.user_id, b.user_id);

        let backend = InMemoryBackend::new();
        let match_id = backend.insert_match(MatchSetup::singles(a, b));
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let config = AppConfig {
            lock_scope: scope,
            backend: BackendConfig::Memory,
            ..AppConfig::default()
        };
        let state = AppState::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(backend.clone()),
            clock.clone(),
        );
        Fixture {
            state,
            backend,
            clock,
            match_id,
            alice,
            bob,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(LockScope::Global)
    }

    fn own(score: u8) -> ScoreSubmission {
        ScoreSubmission {
            own_score: Some(score),
            marked_player_id: None,
            marked_score: None,
        }
    }

    fn marking(score: u8, player: UserId, marked: u8) -> ScoreSubmission {
        ScoreSubmission {
            own_score: Some(score),
            marked_player_id: Some(player),
            marked_score: Some(marked),
        }
    }

    /// Another singles match between the same two players.
    fn second_match(fx: &Fixture) -> MatchId {
        let player = |user_id: UserId, team: Team| Participant {
            user_id,
            name: format!("Player {team:?}"),
            team,
            handicap_allowance: 0,
        };
        fx.backend.insert_match(MatchSetup::singles(
            player(fx.alice, Team::A),
            player(fx.bob, Team::B),
        ))
    }

    /// Both players report both sides of a hole directly on the backend.
    async fn play(fx: &Fixture, hole: u8, alice: u8, bob: u8) {
        fx.backend
            .submit_hole_score(fx.match_id, fx.alice, hole, marking(alice, fx.bob, bob))
            .await
            .unwrap();
        fx.backend
            .submit_hole_score(fx.match_id, fx.bob, hole, marking(bob, fx.alice, alice))
            .await
            .unwrap();
    }

    async fn eventually<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..200 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn open_loads_view_and_derives_flags() {
        let fx = fixture();
        let session = ScoringSession::open(&fx.state, fx.match_id, fx.alice)
            .await
            .unwrap();

        let state = session.snapshot().await;
        assert_eq!(state.phase, VisiblePhase::Loaded);
        assert!(!state.is_session_blocked);
        let derived = state.derived.unwrap();
        assert!(derived.is_match_player);
        assert_eq!(derived.total_holes, 18);
        assert_eq!(derived.validated_holes, 0);
        assert!(!derived.can_submit_scorecard);
    }

    #[tokio::test]
    async fn player_and_marker_entries_validate() {
        let fx = fixture();
        let session = ScoringSession::open(&fx.state, fx.match_id, fx.alice)
            .await
            .unwrap();

        let outcome = session.submit_score(3, own(4)).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Confirmed);
        let view = session.current_view().await.unwrap();
        assert_eq!(
            view.score(3, fx.alice).unwrap().validation_status(),
            ValidationStatus::Pending
        );

        fx.backend
            .submit_hole_score(fx.match_id, fx.bob, 3, marking(5, fx.alice, 4))
            .await
            .unwrap();
        let view = session.refetch().await.unwrap();
        assert_eq!(
            view.score(3, fx.alice).unwrap().validation_status(),
            ValidationStatus::Match
        );
        assert_eq!(session.snapshot().await.derived.unwrap().validated_holes, 1);
    }

    #[tokio::test]
    async fn offline_submission_is_queued_and_drained_on_reconnect() {
        let fx = fixture();
        let session = ScoringSession::open(&fx.state, fx.match_id, fx.alice)
            .await
            .unwrap();
        let submits = fx.backend.submit_calls();

        fx.state.connectivity().set_online(false);
        let outcome = session.submit_score(7, own(5)).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Queued);
        assert_eq!(fx.backend.submit_calls(), submits);
        assert_eq!(session.pending_queue_size(), 1);
        assert!(session.snapshot().await.is_offline);

        let views = fx.backend.view_calls();
        fx.state.connectivity().set_online(true);
        let (tab, backend) = (&session, &fx.backend);
        eventually(|| async move { tab.pending_queue_size() == 0 && backend.view_calls() > views })
            .await;

        assert_eq!(fx.backend.submit_calls(), submits + 1);
        let view = session.current_view().await.unwrap();
        assert!(view.score(7, fx.alice).is_some());
    }

    #[tokio::test]
    async fn replay_stops_at_the_first_failing_hole() {
        let fx = fixture();
        let session = ScoringSession::open(&fx.state, fx.match_id, fx.alice)
            .await
            .unwrap();

        fx.state.connectivity().set_online(false);
        for hole in 1..=3 {
            session.submit_score(hole, own(4)).await.unwrap();
        }
        assert_eq!(session.pending_queue_size(), 3);

        fx.backend.fail_hole(fx.match_id, 2);
        let submits = fx.backend.submit_calls();
        fx.state.connectivity().set_online(true);
        let (tab, backend) = (&session, &fx.backend);
        eventually(|| async move { backend.submit_calls() == submits + 2 }).await;
        eventually(|| async move { tab.pending_queue_size() == 2 }).await;

        let holes: Vec<u8> = fx
            .state
            .queue()
            .get_by_match(fx.match_id)
            .iter()
            .map(|entry| entry.hole_number)
            .collect();
        assert_eq!(holes, vec![2, 3]);
        assert_eq!(session.snapshot().await.pending_queue_size, 2);
    }

    #[tokio::test]
    async fn queued_scores_replay_as_their_submitter() {
        let fx = fixture();
        let alice_tab = ScoringSession::open(&fx.state, fx.match_id, fx.alice)
            .await
            .unwrap();
        fx.state.connectivity().set_online(false);
        let outcome = alice_tab.submit_score(1, own(7)).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Queued);
        alice_tab.close().await;
        fx.state.connectivity().set_online(true);

        let bob_tab = ScoringSession::open(&fx.state, fx.match_id, fx.bob)
            .await
            .unwrap();
        assert_eq!(bob_tab.pending_queue_size(), 0);
        let report = bob_tab.replay_queue().await.unwrap();
        assert_eq!(report.replayed, 0);
        let view = fx.backend.snapshot(fx.match_id).unwrap();
        assert!(view.score(1, fx.bob).is_none());
        assert_eq!(fx.state.queue().size_for_user(fx.match_id, fx.alice), 1);
        bob_tab.close().await;

        let alice_again = ScoringSession::open(&fx.state, fx.match_id, fx.alice)
            .await
            .unwrap();
        assert_eq!(alice_again.pending_queue_size(), 1);
        alice_again.replay_queue().await.unwrap();
        assert_eq!(alice_again.pending_queue_size(), 0);
        let view = fx.backend.snapshot(fx.match_id).unwrap();
        assert_eq!(
            view.score(1, fx.alice).and_then(|score| score.own_score),
            Some(GrossScore::Strokes(7))
        );
        assert!(view.score(1, fx.bob).is_none());
    }

    #[tokio::test]
    async fn rejected_queued_score_can_be_discarded_before_the_scorecard() {
        let fx = fixture();
        let session = ScoringSession::open(&fx.state, fx.match_id, fx.alice)
            .await
            .unwrap();
        fx.state.connectivity().set_online(false);
        let outcome = session.submit_score(15, own(4)).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Queued);

        for hole in 1..=5 {
            play(&fx, hole, 3, 5).await;
        }
        for hole in 6..=14 {
            play(&fx, hole, 4, 4).await;
        }
        fx.state.connectivity().set_online(true);

        let report = session.replay_queue().await.unwrap();
        assert_eq!(report.halted_on, Some(15));
        assert!(report.error.as_ref().is_some_and(|err| !err.is_transient()));
        assert_eq!(session.pending_queue_size(), 1);
        assert!(session.snapshot().await.derived.unwrap().can_submit_scorecard);
        assert!(matches!(
            session.submit_scorecard().await,
            Err(ServiceError::InvalidState(_))
        ));

        session.discard_queued(15).await.unwrap();
        assert_eq!(session.pending_queue_size(), 0);
        assert!(matches!(
            session.discard_queued(15).await,
            Err(ServiceError::NotFound(_))
        ));

        let summary = session.submit_scorecard().await.unwrap();
        assert_eq!(summary.result.unwrap().score, "5&4");
    }

    #[tokio::test]
    async fn transient_failure_queues_instead_of_dropping() {
        let fx = fixture();
        let session = ScoringSession::open(&fx.state, fx.match_id, fx.alice)
            .await
            .unwrap();

        fx.backend.fail_hole(fx.match_id, 4);
        let outcome = session.submit_score(4, own(6)).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Queued);
        assert_eq!(session.pending_queue_size(), 1);
        assert_eq!(session.snapshot().await.phase, VisiblePhase::Loaded);

        fx.backend.clear_failures();
        let report = session.replay_queue().await.unwrap();
        assert_eq!(report.replayed, 1);
        assert_eq!(session.pending_queue_size(), 0);
    }

    #[tokio::test]
    async fn rule_violations_surface_and_clear_on_next_success() {
        let fx = fixture();
        let session = ScoringSession::open(&fx.state, fx.match_id, fx.alice)
            .await
            .unwrap();

        let err = session.submit_score(19, own(4)).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
        assert_eq!(session.pending_queue_size(), 0);
        let state = session.snapshot().await;
        assert_eq!(state.phase, VisiblePhase::Error);
        assert_eq!(state.error.unwrap().kind, ErrorKind::Validation);
        assert!(state.scoring_view.is_some());

        session.submit_score(1, own(4)).await.unwrap();
        assert!(session.snapshot().await.error.is_none());
    }

    #[tokio::test]
    async fn non_participant_gets_a_read_only_view() {
        let fx = fixture();
        let spectator = Uuid::new_v4();
        let session = ScoringSession::open(&fx.state, fx.match_id, spectator)
            .await
            .unwrap();

        assert!(!session.snapshot().await.derived.unwrap().is_match_player);
        let err = session.submit_score(1, own(4)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
        assert_eq!(fx.backend.submit_calls(), 0);
    }

    #[tokio::test]
    async fn early_decision_is_announced_once_and_closes_later_holes() {
        let fx = fixture();
        for hole in 1..=5 {
            play(&fx, hole, 3, 5).await;
        }
        for hole in 6..=14 {
            play(&fx, hole, 4, 4).await;
        }

        let session = ScoringSession::open(&fx.state, fx.match_id, fx.alice)
            .await
            .unwrap();
        let state = session.snapshot().await;
        let notice = state.decision_notice.unwrap();
        assert_eq!((notice.winner, notice.score.as_str()), (Team::A, "5&4"));
        let derived = state.derived.unwrap();
        assert_eq!(derived.total_holes, 14);
        assert_eq!(derived.validated_holes, 14);
        assert!(derived.can_submit_scorecard);

        assert!(session.acknowledge_decision().await.is_some());
        session.refetch().await.unwrap();
        assert!(session.snapshot().await.decision_notice.is_none());

        let err = session.submit_score(15, own(4)).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
        assert!(session.set_current_hole(15).await.is_err());
    }

    #[tokio::test]
    async fn scorecard_is_terminal_per_user() {
        let fx = fixture();
        for hole in 1..=5 {
            play(&fx, hole, 3, 5).await;
        }
        for hole in 6..=14 {
            play(&fx, hole, 4, 4).await;
        }
        let session = ScoringSession::open(&fx.state, fx.match_id, fx.alice)
            .await
            .unwrap();

        let summary = session.submit_scorecard().await.unwrap();
        assert_eq!(summary.holes_won, 5);
        assert_eq!(summary.holes_halved, 9);
        assert_eq!(summary.gross_total, 15 + 36);
        assert_eq!(summary.result.unwrap().score, "5&4");

        let state = session.snapshot().await;
        assert!(state.derived.unwrap().has_submitted);
        assert_eq!(state.match_summary.map(|s| s.holes_won), Some(5));

        let err = session.submit_score(3, own(4)).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
        assert!(session.submit_scorecard().await.is_err());
    }

    #[tokio::test]
    async fn concession_forces_terminal_status() {
        let fx = fixture();
        let session = ScoringSession::open(&fx.state, fx.match_id, fx.bob)
            .await
            .unwrap();

        let view = session
            .concede_match(Some("rain".into()))
            .await
            .unwrap();
        assert_eq!(view.match_info.status, MatchStatus::Conceded);

        let notice = session.snapshot().await.decision_notice.unwrap();
        assert_eq!((notice.winner, notice.score.as_str()), (Team::A, "CONCEDED"));
        assert!(session.submit_score(1, own(4)).await.is_err());
    }

    #[tokio::test]
    async fn second_tab_blocks_until_first_releases() {
        let fx = fixture();
        let tab_a = ScoringSession::open(&fx.state, fx.match_id, fx.alice)
            .await
            .unwrap();
        let tab_b = ScoringSession::open(&fx.state, fx.match_id, fx.alice)
            .await
            .unwrap();

        assert!(!tab_a.is_blocked().await);
        assert!(tab_b.is_blocked().await);
        let err = tab_b.submit_score(1, own(4)).await.unwrap_err();
        assert!(matches!(err, ServiceError::SessionConflict { .. }));
        assert_eq!(tab_b.snapshot().await.error.unwrap().kind, ErrorKind::SessionConflict);

        tab_a.close().await;
        let tab = &tab_b;
        eventually(|| async move { !tab.is_blocked().await }).await;
        assert!(fx.state.locks().is_held_by(fx.match_id, tab_b.id()));
        assert!(tab_b.submit_score(1, own(4)).await.is_ok());
    }

    #[tokio::test]
    async fn take_over_blocks_the_previous_holder() {
        let fx = fixture();
        let tab_a = ScoringSession::open(&fx.state, fx.match_id, fx.alice)
            .await
            .unwrap();
        let tab_b = ScoringSession::open(&fx.state, fx.match_id, fx.alice)
            .await
            .unwrap();

        tab_b.take_over().await.unwrap();
        assert!(!tab_b.is_blocked().await);
        let tab = &tab_a;
        eventually(|| async move { tab.is_blocked().await }).await;
        assert!(matches!(
            tab_a.submit_score(2, own(4)).await,
            Err(ServiceError::SessionConflict { .. })
        ));
    }

    #[tokio::test]
    async fn stale_lock_is_reclaimed_by_a_blocked_session() {
        let fx = fixture();
        let tab_a = ScoringSession::open(&fx.state, fx.match_id, fx.alice)
            .await
            .unwrap();
        let tab_b = ScoringSession::open(&fx.state, fx.match_id, fx.alice)
            .await
            .unwrap();
        assert!(tab_b.is_blocked().await);

        // Tab A crashed: no release, no heartbeat.
        tab_a.tasks.shutdown();
        fx.clock.advance(Duration::from_secs(121));
        tab_b.poll_tick().await;

        assert!(!tab_b.is_blocked().await);
        assert!(fx.state.locks().is_held_by(fx.match_id, tab_b.id()));
    }

    #[tokio::test]
    async fn global_slot_blocks_other_matches_until_released() {
        let fx = fixture();
        let other_match = second_match(&fx);

        let first = ScoringSession::open(&fx.state, fx.match_id, fx.alice)
            .await
            .unwrap();
        let second = ScoringSession::open(&fx.state, other_match, fx.bob)
            .await
            .unwrap();
        assert!(!first.is_blocked().await);
        assert!(second.is_blocked().await);
        assert!(matches!(
            second.submit_score(1, own(4)).await,
            Err(ServiceError::SessionConflict { .. })
        ));

        first.close().await;
        let tab = &second;
        eventually(|| async move { !tab.is_blocked().await }).await;
        assert!(fx.state.locks().is_held_by(other_match, second.id()));
        assert_eq!(
            second.submit_score(1, own(4)).await.unwrap(),
            SubmitOutcome::Confirmed
        );
    }

    #[tokio::test]
    async fn per_match_scope_keeps_other_matches_writable() {
        let fx = fixture_with(LockScope::PerMatch);
        let other_match = second_match(&fx);

        let first = ScoringSession::open(&fx.state, fx.match_id, fx.alice)
            .await
            .unwrap();
        let second = ScoringSession::open(&fx.state, other_match, fx.alice)
            .await
            .unwrap();
        assert!(!first.is_blocked().await);
        assert!(!second.is_blocked().await);
    }

    #[tokio::test]
    async fn results_after_teardown_are_discarded() {
        let fx = fixture();
        let session = ScoringSession::open(&fx.state, fx.match_id, fx.alice)
            .await
            .unwrap();
        fx.backend.set_latency(Duration::from_millis(100));

        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.submit_score(1, own(4)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.close().await;

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(ServiceError::SessionClosed)));
        assert_eq!(session.phase().await, ScoringPhase::Closed);
        assert!(fx.state.locks().current(fx.match_id).is_none());
        assert!(matches!(
            session.refetch().await,
            Err(ServiceError::SessionClosed)
        ));
    }
}
