use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{services::documentation::ApiDoc, state::SharedState};

/// Health and connectivity routes.
pub mod health;
/// Competition standings.
pub mod leaderboard;
/// Scoring session use cases.
pub mod sessions;
/// Session event streams.
pub mod sse;

/// Compose all route trees, wiring in shared state and the Swagger UI.
pub fn router(state: SharedState) -> Router<()> {
    let swagger: Router<SharedState> = SwaggerUi::new("/docs")
        .url("/api-doc/openapi.json", ApiDoc::openapi())
        .into();

    health::router()
        .merge(sse::router())
        .merge(sessions::router())
        .merge(leaderboard::router())
        .merge(swagger)
        .with_state(state)
}
