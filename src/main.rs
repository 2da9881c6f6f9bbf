//! matchplay-sync binary entrypoint wiring REST, SSE, local storage and the scoring backend.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use matchplay_sync::{
    config::{AppConfig, BackendConfig},
    dao::{
        backend::{InMemoryBackend, MatchSetup, ScoringBackend},
        local_store::FileStore,
    },
    routes,
    services::connectivity,
    state::{AppState, SharedState, clock::SystemClock},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let store = FileStore::open(&config.data_dir).with_context(|| {
        format!("opening local storage in `{}`", config.data_dir.display())
    })?;
    let backend = build_backend(&config)?;

    let app_state = AppState::new(
        config,
        Arc::new(store),
        backend,
        Arc::new(SystemClock),
    );

    tokio::spawn(connectivity::supervise(
        app_state.connectivity().clone(),
        app_state.backend().clone(),
        app_state.config().connectivity_probe,
    ));
    tokio::spawn(
        app_state
            .lock_watch()
            .clone()
            .run(app_state.config().lock_watch_interval),
    );

    let app = build_router(app_state.clone());

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    app_state.close_all_sessions().await;
    Ok(())
}

fn build_backend(config: &AppConfig) -> anyhow::Result<Arc<dyn ScoringBackend>> {
    match &config.backend {
        #[cfg(feature = "http-backend")]
        BackendConfig::Http { base_url } => {
            let backend =
                matchplay_sync::dao::backend::HttpScoringBackend::new(base_url, config.submit_timeout)
                    .with_context(|| format!("configuring scoring backend `{base_url}`"))?;
            info!(%base_url, "using HTTP scoring backend");
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "http-backend"))]
        BackendConfig::Http { base_url } => {
            anyhow::bail!("HTTP backend `{base_url}` requested but the `http-backend` feature is off")
        }
        BackendConfig::Memory => {
            let backend = InMemoryBackend::new();
            let match_id = backend.insert_match(MatchSetup::demo());
            info!(%match_id, "using in-memory scoring backend with a demo match");
            Ok(Arc::new(backend))
        }
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
