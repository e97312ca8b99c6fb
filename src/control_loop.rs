//! Control Loop — the periodic scheduling tick (spec.md §4.7).
//!
//! Each tick runs liveness, sailor-time-limit, and user-time-limit sweeps,
//! then a FIFO×deterministic-order match pass. A failure touching one
//! sailor or one chore is logged and skipped rather than aborting the tick
//! (spec.md §7: "a failure in one chore, one sailor, or one RPC must never
//! propagate to abort the control loop").

use crate::chore::ChoreRegistry;
use crate::crew::{self, CrewRegistry};
use crate::sailor_client::{AssignOutcome, SailorClient};
use crate::types::reasons;
use crate::user::{self, UserRegistry};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shares its registries with the HTTP layer via `Arc` — the same
/// `CrewRegistry`/`ChoreRegistry`/`UserRegistry` instances back both the
/// tick and the dashboard handlers, so a submit seen by one is visible to
/// the other on the very next lock acquisition.
pub struct ControlLoop {
    pub crew: Arc<CrewRegistry>,
    pub chores: Arc<ChoreRegistry>,
    pub users: Arc<UserRegistry>,
    pub sailor_client: Arc<SailorClient>,
    pub heartbeat_deadline_secs: i64,
}

impl ControlLoop {
    /// Run one full tick. `now` is injected so tests can drive the clock.
    pub async fn tick(&self, now: i64) {
        self.liveness_sweep(now).await;
        self.sailor_time_limit_sweep(now).await;
        self.user_time_limit_sweep(now).await;
        self.match_pass(now).await;
    }

    /// Step 1: any sailor newly DOWN fails all of its active chores.
    async fn liveness_sweep(&self, now: i64) {
        for sailor in self.crew.snapshot_ordered().await {
            if crew::derive_status(&sailor, now, self.heartbeat_deadline_secs) != crate::types::DerivedStatus::Down {
                continue;
            }
            let active = self
                .chores
                .get_all()
                .await
                .into_iter()
                .filter(|c| c.sailor.as_deref() == Some(sailor.name.as_str()) && c.status.is_active());
            for chore in active {
                warn!(sailor = %sailor.name, chore_id = chore.chore_id, "sailor down, failing chore");
                if let Err(e) = self
                    .chores
                    .fail(chore.chore_id, reasons::SAILOR_LOST.to_string(), String::new(), now)
                    .await
                {
                    warn!(chore_id = chore.chore_id, error = %e, "failed to mark chore FAILED after sailor loss");
                }
            }
        }
    }

    /// Step 2: chores that have overrun their sailor's `max_time`.
    async fn sailor_time_limit_sweep(&self, now: i64) {
        let sailors = self.crew.snapshot_ordered().await;
        for sailor in &sailors {
            let Some(max_time) = sailor.max_time else {
                continue;
            };
            let overrun = self
                .chores
                .get_all()
                .await
                .into_iter()
                .filter(|c| c.sailor.as_deref() == Some(sailor.name.as_str()) && c.status.is_active())
                .filter(|c| c.running_age(now) as u64 > max_time);
            for chore in overrun {
                self.request_cancel(&chore, sailor, reasons::EXCEEDED_TIME_LIMIT, now).await;
            }
        }
    }

    /// Step 3: per-user cumulative active duration over `time_limit`.
    async fn user_time_limit_sweep(&self, now: i64) {
        let all_chores = self.chores.get_all().await;
        let mut owners: Vec<String> = all_chores
            .iter()
            .filter(|c| c.status.is_active())
            .map(|c| c.owner.clone())
            .collect();
        owners.sort();
        owners.dedup();

        for owner in owners {
            let Some(time_limit) = self.users.time_limit(&owner).await else {
                continue;
            };
            let active = self.chores.active_for_owner(&owner).await;
            for chore in user::excess_by_time(&active, Some(time_limit), now) {
                let sailor_name = chore.sailor.clone();
                let sailor = match &sailor_name {
                    Some(name) => self.crew.get(name).await,
                    None => None,
                };
                match sailor {
                    Some(sailor) => {
                        self.request_cancel(chore, &sailor, reasons::EXCEEDED_USER_TIME_LIMIT, now)
                            .await;
                    }
                    None => {
                        if let Err(e) = self
                            .chores
                            .cancel(chore.chore_id, reasons::EXCEEDED_USER_TIME_LIMIT.to_string(), now)
                            .await
                        {
                            warn!(chore_id = chore.chore_id, error = %e, "failed to cancel chore over user time limit");
                        }
                    }
                }
            }
        }
    }

    /// Issue a best-effort direct cancel RPC, queue a redelivery for the
    /// sailor's next heartbeat, and commit the local CANCELED transition
    /// regardless of RPC outcome (spec.md §5 "a cancellation request from a
    /// user returns success as soon as the chore state is transitioned").
    async fn request_cancel(
        &self,
        chore: &crate::types::Chore,
        sailor: &crate::types::Sailor,
        reason: &str,
        now: i64,
    ) {
        self.sailor_client.cancel(&sailor.ip, sailor.port, chore.chore_id).await;
        self.crew.queue_cancel(&sailor.name, chore.chore_id).await;
        match self.chores.cancel(chore.chore_id, reason.to_string(), now).await {
            Ok(_) => {
                let _ = self
                    .crew
                    .release(&sailor.name, chore.configuration.cpus, chore.configuration.gpus)
                    .await;
            }
            Err(e) => warn!(chore_id = chore.chore_id, error = %e, "failed to cancel chore"),
        }
    }

    /// Step 4: FIFO pending chores matched against sailors in ascending
    /// name order, skipping a sailor once it can no longer fit the smallest
    /// remaining pending request.
    async fn match_pass(&self, now: i64) {
        let pending = self.chores.pending_fifo().await;
        if pending.is_empty() {
            debug!("match pass: no pending chores");
            return;
        }
        let mut sailors = self.crew.snapshot_ordered().await;
        let min_request = pending
            .iter()
            .map(|c| c.configuration.cpus.max(c.configuration.gpus))
            .min()
            .unwrap_or(0);

        let mut assigned_count = 0usize;
        for chore in &pending {
            let Some(idx) = sailors
                .iter()
                .position(|s| crew::fit(s, &chore.configuration, now, self.heartbeat_deadline_secs))
            else {
                continue;
            };

            let outcome = {
                let sailor = &sailors[idx];
                self.sailor_client
                    .assign(&sailor.ip, sailor.port, chore.chore_id, &chore.script, &chore.configuration)
                    .await
            };

            match outcome {
                AssignOutcome::Started { .. } | AssignOutcome::Rejected { .. } => {
                    // Either the sailor accepted the chore, or rejected it outright
                    // (bad script path, etc.) — both are committed as ASSIGNED here;
                    // a Rejected outcome surfaces as a subsequent heartbeat failure
                    // per spec.md §4.6, not as an immediate FAILED transition, since
                    // the Sailor contract does not distinguish "rejected" from
                    // "accepted but will fail fast" at the HTTP layer.
                    let sailor_name = sailors[idx].name.clone();
                    if let Err(e) = self.chores.assign(chore.chore_id, &sailor_name).await {
                        warn!(chore_id = chore.chore_id, error = %e, "failed to commit chore assignment");
                        continue;
                    }
                    if let Err(e) = self
                        .crew
                        .deduct(&sailor_name, chore.configuration.cpus, chore.configuration.gpus)
                        .await
                    {
                        warn!(sailor = %sailor_name, error = %e, "failed to deduct sailor capacity");
                    }
                    assigned_count += 1;
                    info!(chore_id = chore.chore_id, sailor = %sailor_name, "chore assigned");

                    let sailor = &mut sailors[idx];
                    sailor.used_cpus = sailor.used_cpus.saturating_add(chore.configuration.cpus);
                    sailor.used_gpus = sailor.used_gpus.saturating_add(chore.configuration.gpus);
                    let remaining_cpus = sailor.cpus.saturating_sub(sailor.used_cpus);
                    let remaining_gpus = sailor.gpus.saturating_sub(sailor.used_gpus);
                    if remaining_cpus < min_request && remaining_gpus < min_request {
                        sailors.remove(idx);
                    }
                }
                AssignOutcome::Unreachable { reason } => {
                    debug!(chore_id = chore.chore_id, %reason, "sailor unreachable, chore stays PENDING");
                }
            }
        }
        if assigned_count > 0 {
            info!(assigned_count, "match pass complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Document;
    use crate::types::ChoreConfiguration;
    use std::collections::BTreeSet;
    use std::time::Duration;

    async fn new_loop() -> (tempfile::TempDir, ControlLoop) {
        let dir = tempfile::tempdir().unwrap();
        let crew = Arc::new(CrewRegistry::new(Document::open(dir.path().join("crew.json")).await));
        let chores = Arc::new(ChoreRegistry::new(Document::open(dir.path().join("chores.json")).await));
        let users = Arc::new(UserRegistry::new(Document::open(dir.path().join("users.json")).await));
        // an unroutable TEST-NET-1 address: every RPC in these tests resolves
        // to AssignOutcome::Unreachable quickly instead of timing out for real.
        let sailor_client = Arc::new(SailorClient::new(Duration::from_millis(200)));
        (
            dir,
            ControlLoop {
                crew,
                chores,
                users,
                sailor_client,
                heartbeat_deadline_secs: crate::crew::HEARTBEAT_DEADLINE_SECS,
            },
        )
    }

    fn config(cpus: u32) -> ChoreConfiguration {
        ChoreConfiguration {
            service: None,
            sailor: None,
            cpus,
            gpus: 0,
            out: None,
            wd: None,
        }
    }

    #[tokio::test]
    async fn liveness_sweep_fails_chores_of_a_down_sailor() {
        let (_dir, cl) = new_loop().await;
        cl.crew
            .preregister("bob".into(), "203.0.113.1".into(), 1, BTreeSet::new(), None)
            .await
            .unwrap();
        cl.crew.heartbeat("bob", 0, 4, 0, 0, 0, 0).await.unwrap();
        let chore = cl.chores.submit("1000".into(), "/a.sh".into(), config(1), 0).await.unwrap();
        cl.chores.assign(chore.chore_id, "bob").await.unwrap();

        // now = 1000, last_seen = 0 => far past HEARTBEAT_DEADLINE_SECS
        cl.liveness_sweep(1000).await;

        let updated = cl.chores.get(chore.chore_id).await.unwrap();
        assert_eq!(updated.status, crate::types::ChoreStatus::Failed);
        assert_eq!(updated.reason, "sailor lost");
    }

    #[tokio::test]
    async fn sailor_time_limit_sweep_cancels_overrun_chore() {
        let (_dir, cl) = new_loop().await;
        cl.crew
            .preregister(
                "bob".into(),
                "203.0.113.1".into(),
                1,
                BTreeSet::new(),
                Some(30),
            )
            .await
            .unwrap();
        cl.crew.heartbeat("bob", 100, 4, 0, 1, 0, 0).await.unwrap();
        let chore = cl.chores.submit("1000".into(), "/a.sh".into(), config(1), 0).await.unwrap();
        cl.chores.assign(chore.chore_id, "bob").await.unwrap();
        cl.chores.start_running(chore.chore_id, 1, 0).await.unwrap();

        cl.sailor_time_limit_sweep(100).await;

        let updated = cl.chores.get(chore.chore_id).await.unwrap();
        assert_eq!(updated.status, crate::types::ChoreStatus::Canceled);
        assert_eq!(updated.reason, "exceeded time limit");
        assert_eq!(cl.crew.drain_cancels("bob").await, vec![chore.chore_id]);
    }

    #[tokio::test]
    async fn user_time_limit_sweep_cancels_only_as_many_as_needed() {
        let (_dir, cl) = new_loop().await;
        cl.users
            .set("1000".into(), "alice".into(), 0, Some(60), String::new())
            .await
            .unwrap();
        // submitted later but has been running the longest (age 100s)
        let newest_submission = cl.chores.submit("1000".into(), "/a.sh".into(), config(1), 100).await.unwrap();
        cl.chores.start_running(newest_submission.chore_id, 1, 0).await.unwrap();
        // submitted first but only just started running (age 10s)
        let oldest_submission = cl.chores.submit("1000".into(), "/b.sh".into(), config(1), 0).await.unwrap();
        cl.chores.start_running(oldest_submission.chore_id, 2, 90).await.unwrap();

        // total age 110s > 60s limit; canceling the newest submission alone
        // (age 100s) brings the remaining total (10s) back under budget.
        cl.user_time_limit_sweep(100).await;

        let newest_after = cl.chores.get(newest_submission.chore_id).await.unwrap();
        let oldest_after = cl.chores.get(oldest_submission.chore_id).await.unwrap();
        assert_eq!(newest_after.status, crate::types::ChoreStatus::Canceled);
        assert_eq!(newest_after.reason, "exceeded user time limit");
        assert!(oldest_after.status.is_active());
    }

    #[tokio::test]
    async fn match_pass_leaves_chore_pending_when_sailor_unreachable() {
        let (_dir, cl) = new_loop().await;
        cl.crew
            .preregister("bob".into(), "203.0.113.1".into(), 1, BTreeSet::new(), None)
            .await
            .unwrap();
        cl.crew.heartbeat("bob", 100, 4, 0, 0, 0, 0).await.unwrap();
        let chore = cl.chores.submit("1000".into(), "/a.sh".into(), config(1), 0).await.unwrap();

        cl.match_pass(100).await;

        let updated = cl.chores.get(chore.chore_id).await.unwrap();
        assert_eq!(updated.status, crate::types::ChoreStatus::Pending);
    }

    #[tokio::test]
    async fn match_pass_skips_pending_chore_with_no_fitting_sailor() {
        let (_dir, cl) = new_loop().await;
        let chore = cl.chores.submit("1000".into(), "/a.sh".into(), config(1), 0).await.unwrap();
        cl.tick(100).await;
        let updated = cl.chores.get(chore.chore_id).await.unwrap();
        assert_eq!(updated.status, crate::types::ChoreStatus::Pending);
        assert_eq!(updated.reason, "no available sailor");
    }
}
