//! Sailor Client — outbound RPCs to worker hosts (spec.md §4.6).
//!
//! The teacher's `worker_client.rs` drives its workers with a blocking
//! `ureq` client and a background heartbeat thread; the Captain instead
//! drives Sailors on demand from the async control loop, so this is a thin
//! `reqwest::Client` wrapper with a per-call timeout rather than a
//! long-lived connection.

use crate::types::ChoreConfiguration;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct AssignPayload<'a> {
    pub chore_id: i64,
    pub script: &'a str,
    pub configuration: &'a ChoreConfiguration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignResponse {
    pub pid: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelPayload {
    pub chore_id: i64,
}

/// Outcome of an `assign` RPC. Distinguishes a network-level failure (the
/// chore stays PENDING for a later retry) from a Sailor-reported rejection
/// (the chore moves straight to FAILED) per spec.md §4.6.
pub enum AssignOutcome {
    Started { pid: u32 },
    Rejected { reason: String },
    Unreachable { reason: String },
}

pub struct SailorClient {
    http: reqwest::Client,
}

impl SailorClient {
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client configuration is always valid");
        SailorClient { http }
    }

    fn base_url(ip: &str, port: u16) -> String {
        format!("http://{ip}:{port}")
    }

    pub async fn assign(
        &self,
        ip: &str,
        port: u16,
        chore_id: i64,
        script: &str,
        configuration: &ChoreConfiguration,
    ) -> AssignOutcome {
        let url = format!("{}/chore", Self::base_url(ip, port));
        let payload = AssignPayload {
            chore_id,
            script,
            configuration,
        };
        let response = match self.http.post(&url).json(&payload).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(sailor_ip = ip, chore_id, error = %e, "assign RPC unreachable");
                return AssignOutcome::Unreachable {
                    reason: e.to_string(),
                };
            }
        };
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(sailor_ip = ip, chore_id, %status, "sailor rejected chore assignment");
            return AssignOutcome::Rejected {
                reason: format!("sailor returned {status}: {body}"),
            };
        }
        match response.json::<AssignResponse>().await {
            Ok(body) => AssignOutcome::Started { pid: body.pid },
            Err(e) => AssignOutcome::Rejected {
                reason: format!("malformed assign response: {e}"),
            },
        }
    }

    /// Best-effort cancellation. A failure here is logged, not propagated —
    /// the chore still moves to CANCELED locally per spec.md §4.6; the
    /// Sailor is expected to notice the loss on its own next heartbeat.
    pub async fn cancel(&self, ip: &str, port: u16, chore_id: i64) {
        let url = format!("{}/cancel", Self::base_url(ip, port));
        let payload = CancelPayload { chore_id };
        if let Err(e) = self.http.post(&url).json(&payload).send().await {
            warn!(sailor_ip = ip, chore_id, error = %e, "cancel RPC failed, sailor will reconcile on its own");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configuration() -> ChoreConfiguration {
        ChoreConfiguration {
            service: None,
            sailor: None,
            cpus: 1,
            gpus: 0,
            out: None,
            wd: None,
        }
    }

    #[tokio::test]
    async fn assign_against_unreachable_host_is_unreachable_not_panic() {
        let client = SailorClient::new(Duration::from_millis(200));
        let outcome = client
            .assign("203.0.113.1", 1, 100_000_000, "/a.sh", &configuration())
            .await;
        assert!(matches!(outcome, AssignOutcome::Unreachable { .. }));
    }

    #[test]
    fn base_url_formats_host_and_port() {
        assert_eq!(SailorClient::base_url("10.0.0.5", 9100), "http://10.0.0.5:9100");
    }
}
