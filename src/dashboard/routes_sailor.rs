//! `POST /prereg` and `POST /heartbeat` (spec.md §6).
//!
//! Heartbeat is the Sailor-initiated half of the protocol: it both updates
//! the sailor's capacity and reports each running chore's latest state, and
//! its reply carries any assign/cancel work queued for that sailor
//! (spec.md §9's "inbound RPC carrying outbound work").

use super::AppState;
use crate::duration;
use crate::types::Chore;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct PreregBody {
    name: String,
    ip: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    services: BTreeSet<String>,
    #[serde(default)]
    max_time: Option<String>,
}

fn default_port() -> u16 {
    7200
}

pub async fn preregister(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PreregBody>,
) -> impl IntoResponse {
    let max_time = match body.max_time.as_deref().unwrap_or("") {
        "" => None,
        s => match duration::parse(s) {
            Ok(v) => v,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": e.to_string()})),
                )
                    .into_response()
            }
        },
    };

    match state
        .crew
        .preregister(body.name, body.ip, body.port, body.services, max_time)
        .await
    {
        Ok(()) => (StatusCode::OK, Json(json!({"ok": true}))).into_response(),
        Err(e) => {
            warn!(error = %e, "failed to persist sailor preregistration");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RunningReport {
    chore_id: i64,
    #[serde(default)]
    pid: Option<u32>,
    #[serde(default)]
    infos: String,
    #[serde(default)]
    exit: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatBody {
    name: String,
    #[serde(default)]
    cpus: u32,
    /// Either a plain count or a list of GPU indices (spec.md §3).
    #[serde(default, deserialize_with = "crate::types::deserialize_gpu_count")]
    gpus: u32,
    #[serde(default)]
    ram: u64,
    #[serde(default)]
    used_cpus: u32,
    #[serde(default, deserialize_with = "crate::types::deserialize_gpu_count")]
    used_gpus: u32,
    #[serde(default)]
    running: Vec<RunningReport>,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    assign: Vec<Chore>,
    cancel: Vec<i64>,
}

pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<HeartbeatBody>,
) -> impl IntoResponse {
    let now = chrono::Utc::now().timestamp();
    let known = match state
        .crew
        .heartbeat(
            &body.name,
            now,
            body.cpus,
            body.gpus,
            body.used_cpus,
            body.used_gpus,
            body.ram,
        )
        .await
    {
        Ok(known) => known,
        Err(e) => {
            warn!(error = %e, "failed to persist heartbeat");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response();
        }
    };
    if !known {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "unknown sailor"}))).into_response();
    }

    for report in &body.running {
        apply_running_report(&state, report, now).await;
    }

    let assign = state
        .chores
        .get_all()
        .await
        .into_iter()
        .filter(|c| c.sailor.as_deref() == Some(body.name.as_str()) && c.status == crate::types::ChoreStatus::Assigned)
        .collect();
    let cancel = state.crew.drain_cancels(&body.name).await;

    (StatusCode::OK, Json(HeartbeatResponse { assign, cancel })).into_response()
}

async fn apply_running_report(state: &AppState, report: &RunningReport, now: i64) {
    let Some(chore) = state.chores.get(report.chore_id).await else {
        warn!(chore_id = report.chore_id, "heartbeat referenced unknown chore");
        return;
    };
    // Exit-code arms must be checked before the ASSIGNED-with-pid start arm:
    // a short chore can start and finish within one heartbeat interval, so a
    // single report can carry both a pid and a terminal exit code. Matching
    // the start arm first would drop the exit and leave the chore stuck
    // RUNNING once the sailor stops re-reporting it.
    let result = match (chore.status, report.exit, report.pid) {
        (_, Some(0), _) => {
            let outcome = state.chores.complete(chore.chore_id, report.infos.clone(), now).await;
            release_sailor_usage(state, &chore, outcome.is_ok()).await;
            outcome.map(|_| ())
        }
        (_, Some(code), _) if code != 0 => {
            let outcome = state
                .chores
                .fail(chore.chore_id, format!("exit code {code}"), report.infos.clone(), now)
                .await;
            release_sailor_usage(state, &chore, outcome.is_ok()).await;
            outcome.map(|_| ())
        }
        (crate::types::ChoreStatus::Assigned, _, Some(pid)) if chore.pid.is_none() => {
            state.chores.start_running(chore.chore_id, pid, now).await.map(|_| ())
        }
        _ => Ok(()),
    };
    if let Err(e) = result {
        warn!(chore_id = report.chore_id, error = %e, "failed to apply heartbeat running report");
    }
}

async fn release_sailor_usage(state: &AppState, chore: &Chore, should_release: bool) {
    if !should_release {
        return;
    }
    if let Some(sailor) = &chore.sailor {
        let _ = state
            .crew
            .release(sailor, chore.configuration.cpus, chore.configuration.gpus)
            .await;
    }
}
