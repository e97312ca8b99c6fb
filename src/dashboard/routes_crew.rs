//! `GET /api/crew/` and its `/crew` alias (spec.md §6), plus the
//! `/api/crew/summary` supplement (SPEC_FULL.md §14).

use super::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Aggregate fleet capacity, grounded in the teacher's `FleetSummary`.
/// Kept on its own endpoint rather than folded into `GET /api/crew/` so that
/// endpoint's response stays the bare "array of Sailor" spec.md §6 documents.
#[derive(Debug, Serialize)]
struct FleetSummary {
    total_sailors: usize,
    total_cpus: u32,
    total_gpus: u32,
    active_services: Vec<String>,
}

pub async fn list_crew(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let now = chrono::Utc::now().timestamp();
    let sailors = state.crew.get_all(now, state.heartbeat_deadline_secs).await;
    Json(sailors)
}

pub async fn crew_summary(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let now = chrono::Utc::now().timestamp();
    let sailors = state.crew.get_all(now, state.heartbeat_deadline_secs).await;

    let mut services = BTreeSet::new();
    let mut total_cpus = 0u32;
    let mut total_gpus = 0u32;
    for view in &sailors {
        total_cpus = total_cpus.saturating_add(view.sailor.cpus);
        total_gpus = total_gpus.saturating_add(view.sailor.gpus);
        if view.derived_status != crate::types::DerivedStatus::Down {
            services.extend(view.sailor.services.iter().cloned());
        }
    }

    Json(FleetSummary {
        total_sailors: sailors.len(),
        total_cpus,
        total_gpus,
        active_services: services.into_iter().collect(),
    })
}
