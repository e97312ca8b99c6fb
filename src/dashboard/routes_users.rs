//! `GET /users` and `POST /user-set` (spec.md §6).

use super::AppState;
use crate::duration;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

pub async fn list_users(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.users.get_all().await)
}

#[derive(Debug, Deserialize)]
pub struct UserSetBody {
    uid: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    chores_limit: Option<u32>,
    #[serde(default)]
    time_limit: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

pub async fn set_user(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UserSetBody>,
) -> impl IntoResponse {
    let existing = state.users.get(&body.uid).await;

    let time_limit = match body.time_limit.as_deref() {
        Some(s) => match duration::parse(s) {
            Ok(v) => v,
            Err(e) => {
                return (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))).into_response();
            }
        },
        None => existing.as_ref().and_then(|u| u.time_limit),
    };

    let name = body.name.unwrap_or_else(|| existing.as_ref().map(|u| u.name.clone()).unwrap_or_default());
    let chores_limit = body
        .chores_limit
        .unwrap_or_else(|| existing.as_ref().map(|u| u.chores_limit).unwrap_or(0));
    let notes = body.notes.unwrap_or_else(|| existing.as_ref().map(|u| u.notes.clone()).unwrap_or_default());

    match state.users.set(body.uid, name, chores_limit, time_limit, notes).await {
        Ok(_) => (StatusCode::OK, Json(json!({"ok": true}))).into_response(),
        Err(e) => {
            warn!(error = %e, "failed to persist user-set");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}
