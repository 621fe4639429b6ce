//! Sliding-Window Spam Tracking
//!
//! Per-user message timestamps inside a short window, plus an infraction
//! counter that feeds the auto-blacklist escalation. Timestamps are handed
//! in explicitly, so the tracker is deterministic under test and never reads
//! a clock of its own.

use crate::model::UserId;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, SystemTime};

/// Spam window policy.
///
/// The reference policy: more than `max_messages` messages inside `window`
/// is one infraction; `infraction_limit` infractions escalate to an
/// auto-blacklist.
#[derive(Debug, Clone)]
pub struct SpamConfig {
    pub window: Duration,
    pub max_messages: usize,
    pub infraction_limit: u32,
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(5),
            max_messages: 3,
            infraction_limit: 3,
        }
    }
}

/// A window violation, reported with the sender's running infraction count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpamViolation {
    pub infractions: u32,
}

#[derive(Debug, Default)]
struct UserWindow {
    timestamps: VecDeque<SystemTime>,
    infractions: u32,
}

/// Per-user sliding-window tracker. One instance per pipeline; the pipeline
/// owns the spam-window state.
#[derive(Debug)]
pub struct SpamTracker {
    config: SpamConfig,
    users: HashMap<UserId, UserWindow>,
}

impl SpamTracker {
    pub fn new(config: SpamConfig) -> Self {
        Self {
            config,
            users: HashMap::new(),
        }
    }

    /// Record one message at `at`. Returns a violation when the window
    /// overflows; the caller decides what the infraction count escalates to.
    pub fn record(&mut self, user: &UserId, at: SystemTime) -> Option<SpamViolation> {
        let window = self.config.window;
        let entry = self.users.entry(user.clone()).or_default();

        while let Some(&front) = entry.timestamps.front() {
            let stale = at
                .duration_since(front)
                .map(|elapsed| elapsed > window)
                .unwrap_or(false);
            if !stale {
                break;
            }
            entry.timestamps.pop_front();
        }

        entry.timestamps.push_back(at);
        if entry.timestamps.len() > self.config.max_messages {
            entry.infractions += 1;
            return Some(SpamViolation {
                infractions: entry.infractions,
            });
        }
        None
    }

    /// Whether this violation count has reached the escalation threshold.
    pub fn over_limit(&self, violation: SpamViolation) -> bool {
        violation.infractions >= self.config.infraction_limit
    }

    /// Forget a user entirely (called once they get auto-blacklisted, so a
    /// returning user starts clean).
    pub fn reset(&mut self, user: &UserId) {
        self.users.remove(user);
    }

    /// Drop users whose newest timestamp is older than the window. The
    /// tracker otherwise grows with every sender ever seen.
    pub fn evict_idle(&mut self, now: SystemTime) -> usize {
        let window = self.config.window;
        let before = self.users.len();
        self.users.retain(|_, w| {
            w.timestamps.back().is_some_and(|&last| {
                now.duration_since(last)
                    .map(|elapsed| elapsed <= window)
                    .unwrap_or(true)
            })
        });
        before - self.users.len()
    }

    pub fn tracked_users(&self) -> usize {
        self.users.len()
    }
}
