//! Crew Registry — in-memory view over the `crew` document.
//!
//! Owns sailor records and derives each sailor's current status from
//! heartbeat age and usage (spec.md §4.3). Mirrors the shape of the
//! teacher's `fleet::Fleet`, but backed by the durable [`Document`] store
//! instead of a plain `HashMap` behind a std `Mutex`.

use crate::store::Document;
use crate::types::{ChoreConfiguration, DerivedStatus, Sailor, SailorView};
use anyhow::Result;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::Mutex as AsyncMutex;

/// Default liveness window, overridable via [`crate::config::Config`]
/// (SPEC_FULL.md §12's `--heartbeat-deadline-secs`).
pub const HEARTBEAT_DEADLINE_SECS: i64 = 60;

pub struct CrewRegistry {
    doc: Document<HashMap<String, Sailor>>,
    /// Cancel instructions queued for redelivery on a sailor's next
    /// heartbeat reply (spec.md §6, §9 "inbound RPC carrying outbound
    /// work"). Not persisted: a direct `cancel` RPC already fires
    /// best-effort from the control loop; this is the fallback channel for
    /// when that RPC never reached the sailor, so losing it across a
    /// Captain restart only costs one extra tick before the queue rebuilds.
    pending_cancels: AsyncMutex<HashMap<String, Vec<i64>>>,
}

impl CrewRegistry {
    pub fn new(doc: Document<HashMap<String, Sailor>>) -> Self {
        CrewRegistry {
            doc,
            pending_cancels: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Queue `chore_id` for cancel-delivery on `sailor`'s next heartbeat.
    pub async fn queue_cancel(&self, sailor: &str, chore_id: i64) {
        let mut pending = self.pending_cancels.lock().await;
        pending.entry(sailor.to_string()).or_default().push(chore_id);
    }

    /// Drain and return the chore IDs queued for cancellation on `sailor`.
    pub async fn drain_cancels(&self, sailor: &str) -> Vec<i64> {
        let mut pending = self.pending_cancels.lock().await;
        pending.remove(sailor).unwrap_or_default()
    }

    /// Create or replace a sailor's static fields. `cpus`/`gpus`/`ram`
    /// default to 0 until the Sailor's own heartbeat reports them.
    pub async fn preregister(
        &self,
        name: String,
        ip: String,
        port: u16,
        services: BTreeSet<String>,
        max_time: Option<u64>,
    ) -> Result<()> {
        self.doc
            .with_lock(|crew| {
                let existing = crew.get(&name);
                let (cpus, gpus, used_cpus, used_gpus, ram, last_seen) = existing
                    .map(|s| (s.cpus, s.gpus, s.used_cpus, s.used_gpus, s.ram, s.last_seen))
                    .unwrap_or((0, 0, 0, 0, 0, 0));
                crew.insert(
                    name.clone(),
                    Sailor {
                        name,
                        ip,
                        port,
                        services,
                        cpus,
                        gpus,
                        used_cpus,
                        used_gpus,
                        ram,
                        last_seen,
                        max_time,
                    },
                );
            })
            .await
    }

    /// Apply a heartbeat's reported capacity/usage. Returns `false` if the
    /// sailor is unknown (no prior `preregister`).
    pub async fn heartbeat(
        &self,
        name: &str,
        now: i64,
        cpus: u32,
        gpus: u32,
        used_cpus: u32,
        used_gpus: u32,
        ram: u64,
    ) -> Result<bool> {
        self.doc
            .with_lock(|crew| {
                let Some(sailor) = crew.get_mut(name) else {
                    return false;
                };
                sailor.cpus = cpus;
                sailor.gpus = gpus;
                sailor.used_cpus = used_cpus;
                sailor.used_gpus = used_gpus;
                sailor.ram = ram;
                sailor.last_seen = now;
                true
            })
            .await
    }

    pub async fn get(&self, name: &str) -> Option<Sailor> {
        self.doc.read(|crew| crew.get(name).cloned()).await
    }

    pub async fn remove(&self, name: &str) -> Result<bool> {
        self.doc
            .with_lock(|crew| crew.remove(name).is_some())
            .await
    }

    pub async fn get_all(&self, now: i64, deadline_secs: i64) -> Vec<SailorView> {
        self.doc
            .read(|crew| {
                let mut views: Vec<SailorView> = crew
                    .values()
                    .map(|s| SailorView {
                        sailor: s.clone(),
                        derived_status: derive_status(s, now, deadline_secs),
                    })
                    .collect();
                views.sort_by(|a, b| a.sailor.name.cmp(&b.sailor.name));
                views
            })
            .await
    }

    /// Snapshot of all sailors in ascending `name` order — the deterministic
    /// iteration order the matcher requires (spec.md §4.7 step 4).
    pub async fn snapshot_ordered(&self) -> Vec<Sailor> {
        self.doc
            .read(|crew| {
                let mut sailors: Vec<Sailor> = crew.values().cloned().collect();
                sailors.sort_by(|a, b| a.name.cmp(&b.name));
                sailors
            })
            .await
    }

    /// Deduct resources from the in-memory usage counters after a successful
    /// assignment. Authoritative counters are refreshed by the next
    /// heartbeat; this only keeps the current tick's view accurate.
    pub async fn deduct(&self, name: &str, cpus: u32, gpus: u32) -> Result<()> {
        self.doc
            .with_lock(|crew| {
                if let Some(s) = crew.get_mut(name) {
                    s.used_cpus = s.used_cpus.saturating_add(cpus);
                    s.used_gpus = s.used_gpus.saturating_add(gpus);
                }
            })
            .await
    }

    /// Return to the in-memory usage counters the resources held by a chore
    /// that just left the sailor (completed, failed, canceled).
    pub async fn release(&self, name: &str, cpus: u32, gpus: u32) -> Result<()> {
        self.doc
            .with_lock(|crew| {
                if let Some(s) = crew.get_mut(name) {
                    s.used_cpus = s.used_cpus.saturating_sub(cpus);
                    s.used_gpus = s.used_gpus.saturating_sub(gpus);
                }
            })
            .await
    }
}

/// Pure function: a sailor's current status from heartbeat age and usage.
/// Never persisted — recomputed on every read (spec.md §4.3).
pub fn derive_status(sailor: &Sailor, now: i64, deadline_secs: i64) -> DerivedStatus {
    if now - sailor.last_seen > deadline_secs {
        return DerivedStatus::Down;
    }
    if sailor.used_cpus >= sailor.cpus && sailor.used_gpus >= sailor.gpus {
        return DerivedStatus::Full;
    }
    if sailor.used_cpus > 0 || sailor.used_gpus > 0 {
        return DerivedStatus::Working;
    }
    DerivedStatus::Ready
}

/// True iff `sailor` is eligible for `request`: not DOWN, matching service
/// and explicit-name constraints (if any), and enough spare cpus/gpus
/// (spec.md §4.3).
pub fn fit(sailor: &Sailor, request: &ChoreConfiguration, now: i64, deadline_secs: i64) -> bool {
    if derive_status(sailor, now, deadline_secs) == DerivedStatus::Down {
        return false;
    }
    if let Some(service) = &request.service {
        if !sailor.services.contains(service) {
            return false;
        }
    }
    if let Some(name) = &request.sailor {
        if name != &sailor.name {
            return false;
        }
    }
    sailor.cpus.saturating_sub(sailor.used_cpus) >= request.cpus
        && sailor.gpus.saturating_sub(sailor.used_gpus) >= request.gpus
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    async fn new_registry() -> (tempfile::TempDir, CrewRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let path: PathBuf = dir.path().join("crew.json");
        let reg = CrewRegistry::new(Document::open(path).await);
        (dir, reg)
    }

    fn sailor(name: &str, cpus: u32, used_cpus: u32, last_seen: i64) -> Sailor {
        Sailor {
            name: name.to_string(),
            ip: "10.0.0.1".to_string(),
            port: 9000,
            services: BTreeSet::new(),
            cpus,
            gpus: 0,
            used_cpus,
            used_gpus: 0,
            ram: 0,
            last_seen,
            max_time: None,
        }
    }

    #[tokio::test]
    async fn preregister_then_heartbeat_updates_capacity() {
        let (_dir, reg) = new_registry().await;
        reg.preregister("bob".into(), "10.0.0.2".into(), 9000, BTreeSet::new(), None)
            .await
            .unwrap();
        assert_eq!(reg.get("bob").await.unwrap().cpus, 0);

        let ok = reg.heartbeat("bob", 100, 8, 2, 0, 0, 1024).await.unwrap();
        assert!(ok);
        let s = reg.get("bob").await.unwrap();
        assert_eq!(s.cpus, 8);
        assert_eq!(s.last_seen, 100);
    }

    #[tokio::test]
    async fn heartbeat_unknown_sailor_returns_false() {
        let (_dir, reg) = new_registry().await;
        assert!(!reg.heartbeat("ghost", 0, 1, 1, 0, 0, 0).await.unwrap());
    }

    #[test]
    fn derive_status_down_when_stale() {
        let s = sailor("bob", 8, 0, 0);
        assert_eq!(derive_status(&s, 1000, HEARTBEAT_DEADLINE_SECS), DerivedStatus::Down);
    }

    #[test]
    fn derive_status_full_when_at_capacity() {
        let s = sailor("bob", 4, 4, 100);
        assert_eq!(derive_status(&s, 100, HEARTBEAT_DEADLINE_SECS), DerivedStatus::Full);
    }

    #[test]
    fn derive_status_working_when_partially_used() {
        let s = sailor("bob", 4, 1, 100);
        assert_eq!(derive_status(&s, 100, HEARTBEAT_DEADLINE_SECS), DerivedStatus::Working);
    }

    #[test]
    fn derive_status_ready_when_idle() {
        let s = sailor("bob", 4, 0, 100);
        assert_eq!(derive_status(&s, 100, HEARTBEAT_DEADLINE_SECS), DerivedStatus::Ready);
    }

    #[test]
    fn fit_checks_service_and_capacity() {
        let mut s = sailor("bob", 4, 0, 100);
        s.services.insert("GPU".to_string());
        let req = ChoreConfiguration {
            service: Some("GPU".to_string()),
            sailor: None,
            cpus: 2,
            gpus: 0,
            out: None,
            wd: None,
        };
        assert!(fit(&s, &req, 100, HEARTBEAT_DEADLINE_SECS));

        let req_too_big = ChoreConfiguration { cpus: 10, ..req.clone() };
        assert!(!fit(&s, &req_too_big, 100, HEARTBEAT_DEADLINE_SECS));

        let req_wrong_service = ChoreConfiguration {
            service: Some("CPU".to_string()),
            ..req
        };
        assert!(!fit(&s, &req_wrong_service, 100, HEARTBEAT_DEADLINE_SECS));
    }

    #[test]
    fn fit_rejects_down_sailor() {
        let s = sailor("bob", 4, 0, 0);
        let req = ChoreConfiguration {
            service: None,
            sailor: None,
            cpus: 1,
            gpus: 0,
            out: None,
            wd: None,
        };
        assert!(!fit(&s, &req, 1000, HEARTBEAT_DEADLINE_SECS));
    }

    #[tokio::test]
    async fn queued_cancels_drain_once() {
        let (_dir, reg) = new_registry().await;
        reg.queue_cancel("bob", 100_000_000).await;
        reg.queue_cancel("bob", 100_000_001).await;
        assert_eq!(reg.drain_cancels("bob").await, vec![100_000_000, 100_000_001]);
        assert!(reg.drain_cancels("bob").await.is_empty());
    }

    #[test]
    fn fit_honors_explicit_sailor_name() {
        let s = sailor("bob", 4, 0, 100);
        let req = ChoreConfiguration {
            service: None,
            sailor: Some("alice".to_string()),
            cpus: 1,
            gpus: 0,
            out: None,
            wd: None,
        };
        assert!(!fit(&s, &req, 100, HEARTBEAT_DEADLINE_SECS));
    }
}
