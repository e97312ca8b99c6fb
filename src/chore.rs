//! Chore Registry — in-memory view over the `chores` document.
//!
//! Assigns monotonically unique IDs, tracks status transitions and the
//! `reason` string on each chore (spec.md §4.4). Invalid transitions are
//! rejected rather than silently applied, since terminal states must never
//! move again (spec.md §8 invariant 3).

use crate::store::Document;
use crate::types::{reasons, Chore, ChoreConfiguration, ChoreStatus};
use anyhow::{bail, Result};
use std::collections::HashMap;

/// Floor for chore IDs, giving a nine-digit display per spec.md §4.4.
pub const FIRST_CHORE_ID: i64 = 100_000_000;

pub struct ChoreRegistry {
    doc: Document<HashMap<i64, Chore>>,
}

impl ChoreRegistry {
    pub fn new(doc: Document<HashMap<i64, Chore>>) -> Self {
        ChoreRegistry { doc }
    }

    /// Submit a new chore. Starts PENDING with `reason = "no available sailor"`.
    pub async fn submit(
        &self,
        owner: String,
        script: String,
        configuration: ChoreConfiguration,
        now: i64,
    ) -> Result<Chore> {
        self.doc
            .with_lock(|chores| {
                let next_id = chores.keys().copied().max().map_or(FIRST_CHORE_ID, |m| m + 1).max(FIRST_CHORE_ID);
                let chore = Chore {
                    chore_id: next_id,
                    owner,
                    script,
                    configuration,
                    status: ChoreStatus::Pending,
                    sailor: None,
                    pid: None,
                    reason: reasons::NO_AVAILABLE_SAILOR.to_string(),
                    submit_time: Some(now),
                    start_time: None,
                    end_time: None,
                    infos: String::new(),
                };
                chores.insert(next_id, chore.clone());
                chore
            })
            .await
    }

    pub async fn get(&self, chore_id: i64) -> Option<Chore> {
        self.doc.read(|chores| chores.get(&chore_id).cloned()).await
    }

    pub async fn get_all(&self) -> Vec<Chore> {
        self.doc
            .read(|chores| {
                let mut all: Vec<Chore> = chores.values().cloned().collect();
                all.sort_by_key(|c| c.chore_id);
                all
            })
            .await
    }

    /// PENDING chores in ascending `chore_id` (FIFO) order — the order the
    /// matcher processes them in (spec.md §4.7 step 4).
    pub async fn pending_fifo(&self) -> Vec<Chore> {
        self.doc
            .read(|chores| {
                let mut pending: Vec<Chore> = chores
                    .values()
                    .filter(|c| c.status == ChoreStatus::Pending)
                    .cloned()
                    .collect();
                pending.sort_by_key(|c| c.chore_id);
                pending
            })
            .await
    }

    pub async fn active_for_owner(&self, owner: &str) -> Vec<Chore> {
        self.doc
            .read(|chores| {
                chores
                    .values()
                    .filter(|c| c.owner == owner && c.status.is_active())
                    .cloned()
                    .collect()
            })
            .await
    }

    /// PENDING → ASSIGNED. Clears `reason`, records the sailor.
    pub async fn assign(&self, chore_id: i64, sailor: &str) -> Result<Chore> {
        self.transition(chore_id, |c| {
            if c.status != ChoreStatus::Pending {
                bail!("chore {chore_id} is not PENDING (is {:?})", c.status);
            }
            c.status = ChoreStatus::Assigned;
            c.sailor = Some(sailor.to_string());
            c.reason.clear();
            Ok(())
        })
        .await
    }

    /// ASSIGNED → RUNNING when the sailor's heartbeat reports a pid.
    pub async fn start_running(&self, chore_id: i64, pid: u32, now: i64) -> Result<Chore> {
        self.transition(chore_id, |c| {
            if c.status != ChoreStatus::Assigned {
                bail!("chore {chore_id} is not ASSIGNED (is {:?})", c.status);
            }
            c.status = ChoreStatus::Running;
            c.pid = Some(pid);
            c.start_time = Some(now);
            Ok(())
        })
        .await
    }

    /// ASSIGNED/RUNNING → COMPLETED, heartbeat reported exit 0.
    pub async fn complete(&self, chore_id: i64, infos: String, now: i64) -> Result<Chore> {
        self.transition(chore_id, |c| {
            if !matches!(c.status, ChoreStatus::Assigned | ChoreStatus::Running) {
                bail!("chore {chore_id} cannot complete from {:?}", c.status);
            }
            c.status = ChoreStatus::Completed;
            c.end_time = Some(now);
            c.infos = infos;
            Ok(())
        })
        .await
    }

    /// ASSIGNED/RUNNING → FAILED, heartbeat reported a nonzero exit or a
    /// Sailor-side error.
    pub async fn fail(&self, chore_id: i64, reason: String, infos: String, now: i64) -> Result<Chore> {
        self.transition(chore_id, |c| {
            if !matches!(c.status, ChoreStatus::Assigned | ChoreStatus::Running) {
                bail!("chore {chore_id} cannot fail from {:?}", c.status);
            }
            c.status = ChoreStatus::Failed;
            c.end_time = Some(now);
            c.reason = reason;
            c.infos = infos;
            Ok(())
        })
        .await
    }

    /// Any active status → CANCELED, with a caller-supplied reason.
    pub async fn cancel(&self, chore_id: i64, reason: String, now: i64) -> Result<Chore> {
        self.transition(chore_id, |c| {
            if c.status.is_terminal() {
                bail!("chore {chore_id} is already terminal ({:?})", c.status);
            }
            c.status = ChoreStatus::Canceled;
            c.reason = reason;
            c.end_time = Some(now);
            Ok(())
        })
        .await
    }

    async fn transition(
        &self,
        chore_id: i64,
        f: impl FnOnce(&mut Chore) -> Result<()>,
    ) -> Result<Chore> {
        self.doc
            .with_lock(|chores| {
                let Some(chore) = chores.get_mut(&chore_id) else {
                    bail!("unknown chore {chore_id}");
                };
                f(chore)?;
                Ok(chore.clone())
            })
            .await?
    }
}
