/// Online/offline tracking and the backend health supervisor.
pub mod connectivity;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Hole submission rules shared by sessions and the in-memory backend.
pub mod hole_scoring;
/// Cached competition leaderboards.
pub mod leaderboard_service;
/// Cross-process lock change detection over shared storage.
pub mod lock_watch;
/// Persistent FIFO of hole scores waiting for connectivity.
pub mod offline_queue;
/// Scoring session orchestration.
pub mod scoring_session;
/// Server-Sent Events payloads emitted by sessions.
pub mod session_events;
/// Single-writer lock across sessions sharing local storage.
pub mod session_lock;
/// Use cases behind the session routes.
pub mod session_service;
/// Server-Sent Events streaming service.
pub mod sse_service;
/// Match standing, early decisions and summaries.
pub mod standing;
