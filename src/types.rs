//! Shared data model: Sailor, Chore, User and the values exchanged with them
//! over HTTP. Kept separate from the registries so both `dashboard` handlers
//! and `control_loop` can depend on plain data without pulling in the
//! registries' locking machinery.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

/// A worker host in the fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sailor {
    pub name: String,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub services: BTreeSet<String>,
    #[serde(default)]
    pub cpus: u32,
    #[serde(default)]
    pub gpus: u32,
    #[serde(default)]
    pub used_cpus: u32,
    #[serde(default)]
    pub used_gpus: u32,
    #[serde(default)]
    pub ram: u64,
    #[serde(default)]
    pub last_seen: i64,
    /// `DD-hh:mm:ss` on the wire and on disk (spec.md §3, §6); `None` means
    /// no per-sailor time limit.
    #[serde(
        default,
        serialize_with = "crate::duration::serialize_opt",
        deserialize_with = "crate::duration::deserialize_opt"
    )]
    pub max_time: Option<u64>,
}

/// A sailor's liveness/load state, recomputed on every read — never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DerivedStatus {
    Ready,
    Working,
    Full,
    Down,
}

/// `Sailor` plus its derived status, as returned by the crew listing endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SailorView {
    #[serde(flatten)]
    pub sailor: Sailor,
    pub derived_status: DerivedStatus,
}

/// The resource/placement request attached to a chore submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoreConfiguration {
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub sailor: Option<String>,
    #[serde(default)]
    pub cpus: u32,
    #[serde(default)]
    pub gpus: u32,
    #[serde(default)]
    pub out: Option<String>,
    #[serde(default)]
    pub wd: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChoreStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl ChoreStatus {
    /// `status ∈ {PENDING, ASSIGNED, RUNNING}` per spec.md §3.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ChoreStatus::Pending | ChoreStatus::Assigned | ChoreStatus::Running
        )
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chore {
    pub chore_id: i64,
    pub owner: String,
    pub script: String,
    pub configuration: ChoreConfiguration,
    pub status: ChoreStatus,
    #[serde(default)]
    pub sailor: Option<String>,
    #[serde(default)]
    pub pid: Option<u32>,
    pub reason: String,
    #[serde(default)]
    pub submit_time: Option<i64>,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub end_time: Option<i64>,
    #[serde(default)]
    pub infos: String,
}

impl Chore {
    /// `now − (start_time ?? submit_time)`, used by sailor/user time-limit
    /// sweeps. Falls back to 0 if neither timestamp is set yet.
    pub fn running_age(&self, now: i64) -> i64 {
        let anchor = self.start_time.or(self.submit_time).unwrap_or(now);
        (now - anchor).max(0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub chores_limit: u32,
    /// `DD-hh:mm:ss` on the wire and on disk (spec.md §3, §6); `None` means
    /// no time limit.
    #[serde(
        default,
        serialize_with = "crate::duration::serialize_opt",
        deserialize_with = "crate::duration::deserialize_opt"
    )]
    pub time_limit: Option<u64>,
    #[serde(default)]
    pub notes: String,
}

/// A sailor's `gpus`/`used_gpus` may arrive over the wire either as a plain
/// count or as a list of GPU indices (spec.md §3: "gpus may also be carried
/// as a list of GPU indices"); either shape reduces to a count here, which is
/// all the Crew Registry's capacity bookkeeping needs.
pub fn deserialize_gpu_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum GpuField {
        Count(u32),
        Indices(Vec<serde_json::Value>),
    }
    match GpuField::deserialize(deserializer)? {
        GpuField::Count(n) => Ok(n),
        GpuField::Indices(list) => Ok(list.len() as u32),
    }
}

pub mod reasons {
    pub const NO_AVAILABLE_SAILOR: &str = "no available sailor";
    pub const CANCELED_BY_USER: &str = "canceled by user";
    pub const EXCEEDED_TIME_LIMIT: &str = "exceeded time limit";
    pub const EXCEEDED_USER_TIME_LIMIT: &str = "exceeded user time limit";
    pub const SAILOR_LOST: &str = "sailor lost";
}
