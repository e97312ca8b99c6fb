//! User Registry — per-owner quota records (spec.md §4.5).
//!
//! Users are created lazily: a chore can be submitted by an owner with no
//! prior `User` record, in which case quota checks treat missing limits as
//! "unlimited". `set()` is the only way to attach explicit limits.

use crate::store::Document;
use crate::types::{Chore, User};
use anyhow::Result;
use std::collections::HashMap;

pub struct UserRegistry {
    doc: Document<HashMap<String, User>>,
}

impl UserRegistry {
    pub fn new(doc: Document<HashMap<String, User>>) -> Self {
        UserRegistry { doc }
    }

    pub async fn get(&self, uid: &str) -> Option<User> {
        self.doc.read(|users| users.get(uid).cloned()).await
    }

    pub async fn get_all(&self) -> Vec<User> {
        self.doc
            .read(|users| {
                let mut all: Vec<User> = users.values().cloned().collect();
                all.sort_by(|a, b| a.uid.cmp(&b.uid));
                all
            })
            .await
    }

    /// Create or update a user's quota fields, leaving `uid` as the key.
    pub async fn set(
        &self,
        uid: String,
        name: String,
        chores_limit: u32,
        time_limit: Option<u64>,
        notes: String,
    ) -> Result<User> {
        self.doc
            .with_lock(|users| {
                let user = User {
                    uid: uid.clone(),
                    name,
                    chores_limit,
                    time_limit,
                    notes,
                };
                users.insert(uid, user.clone());
                user
            })
            .await
    }

    /// Look up `uid`'s `chores_limit`, defaulting to unlimited (`None`) for
    /// an owner with no registered `User`.
    pub async fn chores_limit(&self, uid: &str) -> Option<u32> {
        self.doc
            .read(|users| users.get(uid).map(|u| u.chores_limit).filter(|&l| l > 0))
            .await
    }

    pub async fn time_limit(&self, uid: &str) -> Option<u64> {
        self.doc.read(|users| users.get(uid).and_then(|u| u.time_limit)).await
    }
}

/// True if `owner` is already at or over their `chores_limit`, counting only
/// their currently-active chores (spec.md §4.5 "chores_limit").
pub fn over_chores_limit(chores_limit: Option<u32>, active_chore_count: usize) -> bool {
    match chores_limit {
        None => false,
        Some(limit) => active_chore_count as u32 >= limit,
    }
}

/// Sums `active`'s running ages; while the total exceeds `time_limit`, picks
/// the newest-submitted active chore as a cancellation candidate and
/// subtracts its age, repeating until the remaining total falls at or below
/// the limit (spec.md §4.5). Returns the candidates in the order they should
/// be canceled (newest first).
pub fn excess_by_time<'a>(active: &'a [Chore], time_limit: Option<u64>, now: i64) -> Vec<&'a Chore> {
    let Some(limit) = time_limit else {
        return Vec::new();
    };
    let mut by_age: Vec<(&Chore, i64)> = active.iter().map(|c| (c, c.running_age(now))).collect();
    let mut total: i64 = by_age.iter().map(|(_, age)| age).sum();
    if total as u64 <= limit {
        return Vec::new();
    }
    by_age.sort_by(|a, b| b.0.submit_time.cmp(&a.0.submit_time));

    let mut candidates = Vec::new();
    for (chore, age) in by_age {
        if total as u64 <= limit {
            break;
        }
        candidates.push(chore);
        total -= age;
    }
    candidates
}
