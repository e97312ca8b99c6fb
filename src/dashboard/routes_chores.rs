//! `GET /api/chores/` + `/me/chores`, `POST /chore`, `POST /cancel` (spec.md §6).

use super::AppState;
use crate::types::{reasons, Chore, ChoreConfiguration, ChoreStatus};
use crate::user;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

/// Query filters for the listing endpoint (SPEC_FULL.md §14).
#[derive(Debug, Deserialize, Default)]
pub struct ChoreFilter {
    owner: Option<String>,
    status: Option<String>,
    sailor: Option<String>,
}

pub async fn list_chores(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ChoreFilter>,
) -> impl IntoResponse {
    let status_filter: Option<ChoreStatus> = filter
        .status
        .as_deref()
        .and_then(|s| serde_json::from_value(json!(s.to_uppercase())).ok());

    let chores: Vec<Chore> = state
        .chores
        .get_all()
        .await
        .into_iter()
        .filter(|c| filter.owner.as_deref().map_or(true, |owner| c.owner == owner))
        .filter(|c| filter.sailor.as_deref().map_or(true, |name| c.sailor.as_deref() == Some(name)))
        .filter(|c| status_filter.map_or(true, |status| c.status == status))
        .collect();

    Json(chores)
}

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    owner: String,
    script: String,
    configuration: ChoreConfiguration,
}

pub async fn submit_chore(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitBody>,
) -> impl IntoResponse {
    if body.script.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "script must not be empty"}))).into_response();
    }

    let active = state.chores.active_for_owner(&body.owner).await;
    let limit = state.users.chores_limit(&body.owner).await;
    if user::over_chores_limit(limit, active.len()) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "chores_limit exceeded"})),
        )
            .into_response();
    }

    let now = chrono::Utc::now().timestamp();
    match state
        .chores
        .submit(body.owner, body.script, body.configuration, now)
        .await
    {
        Ok(chore) => (StatusCode::OK, Json(json!({"chore_id": chore.chore_id}))).into_response(),
        Err(e) => {
            warn!(error = %e, "failed to persist chore submission");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    chore_id: i64,
    #[serde(default)]
    reason: Option<String>,
}

pub async fn cancel_chore(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CancelBody>,
) -> impl IntoResponse {
    let Some(chore) = state.chores.get(body.chore_id).await else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "unknown chore"}))).into_response();
    };
    if chore.status.is_terminal() {
        return (
            StatusCode::CONFLICT,
            Json(json!({"error": "chore is already terminal"})),
        )
            .into_response();
    }

    let reason = body.reason.unwrap_or_else(|| reasons::CANCELED_BY_USER.to_string());
    let now = chrono::Utc::now().timestamp();

    if let Some(sailor_name) = &chore.sailor {
        if let Some(sailor) = state.crew.get(sailor_name).await {
            state.sailor_client.cancel(&sailor.ip, sailor.port, chore.chore_id).await;
            state.crew.queue_cancel(sailor_name, chore.chore_id).await;
        }
    }

    match state.chores.cancel(chore.chore_id, reason, now).await {
        Ok(_) => {
            if let Some(sailor_name) = &chore.sailor {
                let _ = state
                    .crew
                    .release(sailor_name, chore.configuration.cpus, chore.configuration.gpus)
                    .await;
            }
            (StatusCode::OK, Json(json!({"ok": true}))).into_response()
        }
        Err(e) => {
            warn!(chore_id = chore.chore_id, error = %e, "failed to cancel chore");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}
