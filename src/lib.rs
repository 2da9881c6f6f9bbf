//! Library crate for matchplay-sync, exposing modules for binaries and integration tests.

pub mod config;
/// Local storage, persisted records and scoring backend clients.
pub mod dao;
/// Request, response and event payloads.
pub mod dto;
/// Service and HTTP error types.
pub mod error;
/// HTTP routes.
pub mod routes;
/// Scoring use cases and background services.
pub mod services;
/// Shared application state and the scoring domain model.
pub mod state;
