//! HTTP Ingress and process wiring (spec.md §4.8, §6).
//!
//! `AppState` bundles the registries the route handlers and the control
//! loop both need; `build_router` lays out the surface from §6's table;
//! `run` starts the listener alongside a background scheduling tick,
//! mirroring the teacher's `dashboard::run` which drives its HTTP server and
//! its background fleet/job loops from the same `tokio::main`.

mod routes_chores;
mod routes_crew;
mod routes_sailor;
mod routes_users;

use crate::chore::ChoreRegistry;
use crate::config::Config;
use crate::control_loop::ControlLoop;
use crate::crew::CrewRegistry;
use crate::sailor_client::SailorClient;
use crate::store::Document;
use crate::user::UserRegistry;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const MAX_BODY_BYTES: usize = 1024 * 1024;

pub struct AppState {
    pub crew: Arc<CrewRegistry>,
    pub chores: Arc<ChoreRegistry>,
    pub users: Arc<UserRegistry>,
    pub sailor_client: Arc<SailorClient>,
    pub heartbeat_deadline_secs: i64,
}

impl AppState {
    pub async fn with_data_dir(config: &Config) -> Self {
        let crew = Arc::new(CrewRegistry::new(Document::open(config.crew_path()).await));
        let chores = Arc::new(ChoreRegistry::new(Document::open(config.chores_path()).await));
        let users = Arc::new(UserRegistry::new(Document::open(config.users_path()).await));
        let sailor_client = Arc::new(SailorClient::new(Duration::from_secs(config.sailor_rpc_timeout_secs)));

        let sailor_count = crew.snapshot_ordered().await.len();
        let all_chores = chores.get_all().await;
        let active_chores = all_chores.iter().filter(|c| c.status.is_active()).count();
        let user_count = users.get_all().await.len();
        info!(
            sailor_count,
            active_chores, user_count, "recovered state from disk"
        );

        AppState {
            crew,
            chores,
            users,
            sailor_client,
            heartbeat_deadline_secs: config.heartbeat_deadline_secs,
        }
    }

    fn control_loop(&self) -> ControlLoop {
        ControlLoop {
            crew: self.crew.clone(),
            chores: self.chores.clone(),
            users: self.users.clone(),
            sailor_client: self.sailor_client.clone(),
            heartbeat_deadline_secs: self.heartbeat_deadline_secs,
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/crew/", get(routes_crew::list_crew))
        .route("/crew", get(routes_crew::list_crew))
        .route("/api/crew/summary", get(routes_crew::crew_summary))
        .route("/api/chores/", get(routes_chores::list_chores))
        .route("/me/chores", get(routes_chores::list_chores))
        .route("/chore", post(routes_chores::submit_chore))
        .route("/cancel", post(routes_chores::cancel_chore))
        .route("/prereg", post(routes_sailor::preregister))
        .route("/heartbeat", post(routes_sailor::heartbeat))
        .route("/users", get(routes_users::list_users))
        .route("/user-set", post(routes_users::set_user))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(CatchPanicLayer::new())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}

/// Writes the discovery file described in SPEC_FULL.md §12, atomically via
/// the same write-to-temp-and-rename primitive the document store uses.
async fn write_discovery_file(config: &Config) -> anyhow::Result<()> {
    let host = "0.0.0.0";
    let body = serde_json::json!({
        "host": host,
        "port": config.port,
        "url": format!("http://{host}:{}", config.port),
    });
    if let Some(parent) = config.discovery_path().parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = config.discovery_path().with_extension("json.tmp");
    tokio::fs::write(&tmp, serde_json::to_vec_pretty(&body)?).await?;
    tokio::fs::rename(&tmp, config.discovery_path()).await?;
    Ok(())
}

/// Starts the HTTP listener plus the background scheduling tick, and blocks
/// until a shutdown signal arrives.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let state = Arc::new(AppState::with_data_dir(&config).await);
    write_discovery_file(&config).await?;

    let tick_interval = Duration::from_secs(config.tick_interval_secs);
    let control_loop_state = state.clone();
    tokio::spawn(async move {
        let control_loop = control_loop_state.control_loop();
        let mut interval = tokio::time::interval(tick_interval);
        loop {
            interval.tick().await;
            let now = chrono::Utc::now().timestamp();
            control_loop.tick(now).await;
        }
    });

    let report_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            let sailor_count = report_state.crew.snapshot_ordered().await.len();
            let all_chores = report_state.chores.get_all().await;
            let active_count = all_chores.iter().filter(|c| c.status.is_active()).count();
            info!(sailor_count, active_count, "fleet status tick");
        }
    });

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "captain listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    warn!("shutdown signal received, draining connections");
}
