//! Blacklist Scheduling
//!
//! Timed suspensions of users or servers from a hub. The persisted
//! `expires_at` is authoritative: an entry past its expiry reads as inactive
//! even if the in-memory expiry task was lost, and `reconcile` sweeps such
//! entries on startup. Timers are an optimization, never the source of
//! truth.

use crate::model::{BlacklistEntry, HubId, Subject};
use crate::store::{Repository, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Result type for blacklist operations
pub type BlacklistResult<T> = Result<T, BlacklistError>;

/// Blacklist errors
#[derive(Debug, thiserror::Error)]
pub enum BlacklistError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

type TimerKey = (HubId, Subject);

/// Scheduler over the persistent blacklist collection plus a map of pending
/// expiry tasks. Cheaply cloneable; clones share state.
pub struct BlacklistScheduler<S: Repository> {
    store: Arc<S>,
    timers: Arc<Mutex<HashMap<TimerKey, JoinHandle<()>>>>,
}

impl<S: Repository> Clone for BlacklistScheduler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            timers: Arc::clone(&self.timers),
        }
    }
}

impl<S: Repository> BlacklistScheduler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Suspend `subject` from `hub`. A new entry replaces any existing one
    /// for the same subject, cancelling its pending expiry. With a duration,
    /// an expiry task is armed; without one the entry is permanent.
    pub async fn blacklist(
        &self,
        hub: HubId,
        subject: Subject,
        reason: &str,
        duration: Option<Duration>,
    ) -> BlacklistResult<BlacklistEntry> {
        let issued_at = SystemTime::now();
        let entry = BlacklistEntry {
            hub_id: hub,
            subject: subject.clone(),
            reason: reason.to_string(),
            issued_at,
            expires_at: duration.map(|d| issued_at + d),
            notified: false,
        };

        self.cancel_timer(&hub, &subject);
        self.store.upsert_blacklist_entry(entry.clone()).await?;

        match duration {
            Some(d) => {
                info!(
                    hub = %hub, subject = %subject,
                    duration = %humantime::format_duration(d),
                    reason, "blacklisted"
                );
                self.arm_timer(hub, subject, d);
            }
            None => info!(hub = %hub, subject = %subject, reason, "blacklisted permanently"),
        }

        Ok(entry)
    }

    /// Lift the suspension. A no-op (returns false) when no entry exists;
    /// always cancels any pending expiry task so a manual removal cannot be
    /// followed by a stale double-removal.
    pub async fn unblacklist(&self, hub: &HubId, subject: &Subject) -> BlacklistResult<bool> {
        self.cancel_timer(hub, subject);
        let removed = self.store.delete_blacklist_entry(hub, subject).await?;
        if removed {
            info!(hub = %hub, subject = %subject, "unblacklisted");
        }
        Ok(removed)
    }

    /// Whether `subject` is currently suspended from `hub`.
    pub async fn is_active(&self, hub: &HubId, subject: &Subject) -> BlacklistResult<bool> {
        let now = SystemTime::now();
        Ok(self
            .store
            .blacklist_entry(hub, subject)
            .await?
            .map(|e| e.is_active_at(now))
            .unwrap_or(false))
    }

    /// The stored entry, if any — expired entries included (callers that
    /// only care about suspension should use `is_active`).
    pub async fn entry(
        &self,
        hub: &HubId,
        subject: &Subject,
    ) -> BlacklistResult<Option<BlacklistEntry>> {
        Ok(self.store.blacklist_entry(hub, subject).await?)
    }

    /// Record that the one-time suspension notice went out.
    pub async fn mark_notified(&self, hub: &HubId, subject: &Subject) -> BlacklistResult<()> {
        self.store.set_blacklist_notified(hub, subject).await?;
        Ok(())
    }

    /// Startup reconciliation: remove entries whose expiry already passed
    /// (timers lost to a restart), then arm fresh timers for the remaining
    /// timed entries. Returns how many stale entries were expired.
    pub async fn reconcile(&self) -> BlacklistResult<usize> {
        let now = SystemTime::now();
        let mut expired = 0;

        for entry in self.store.all_blacklist_entries().await? {
            let Some(expires_at) = entry.expires_at else {
                continue;
            };
            match expires_at.duration_since(now) {
                Err(_) => {
                    // already past due
                    self.store
                        .delete_blacklist_entry(&entry.hub_id, &entry.subject)
                        .await?;
                    info!(hub = %entry.hub_id, subject = %entry.subject, "expired stale blacklist entry");
                    expired += 1;
                }
                Ok(remaining) => {
                    self.arm_timer(entry.hub_id, entry.subject, remaining);
                }
            }
        }

        Ok(expired)
    }

    /// Pending expiry tasks (for assertions).
    pub fn pending_timers(&self) -> usize {
        self.timers.lock().unwrap().len()
    }

    fn arm_timer(&self, hub: HubId, subject: Subject, after: Duration) {
        let scheduler = self.clone();
        let key = (hub, subject.clone());
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            scheduler.timers.lock().unwrap().remove(&(hub, subject.clone()));
            match scheduler.store.delete_blacklist_entry(&hub, &subject).await {
                Ok(true) => info!(hub = %hub, subject = %subject, "blacklist expired"),
                Ok(false) => {}
                Err(e) => warn!(hub = %hub, subject = %subject, error = %e, "blacklist expiry failed"),
            }
        });

        let mut timers = self.timers.lock().unwrap();
        if let Some(old) = timers.insert(key, handle) {
            old.abort();
        }
    }

    fn cancel_timer(&self, hub: &HubId, subject: &Subject) {
        let mut timers = self.timers.lock().unwrap();
        if let Some(handle) = timers.remove(&(*hub, subject.clone())) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UserId;
    use crate::store::MemoryStore;

    fn scheduler() -> BlacklistScheduler<MemoryStore> {
        BlacklistScheduler::new(Arc::new(MemoryStore::new()))
    }

    fn user(name: &str) -> Subject {
        Subject::User(UserId(name.to_string()))
    }

    #[tokio::test]
    async fn test_blacklist_then_active() {
        let scheduler = scheduler();
        let hub = HubId::new();
        let subject = user("u1");

        scheduler
            .blacklist(hub, subject.clone(), "spamming", None)
            .await
            .unwrap();
        assert!(scheduler.is_active(&hub, &subject).await.unwrap());

        // scoped to the hub
        assert!(!scheduler.is_active(&HubId::new(), &subject).await.unwrap());
    }

    #[tokio::test]
    async fn test_unblacklist_is_idempotent() {
        let scheduler = scheduler();
        let hub = HubId::new();
        let subject = user("u1");

        // no entry: no-op, not an error
        assert!(!scheduler.unblacklist(&hub, &subject).await.unwrap());

        scheduler
            .blacklist(hub, subject.clone(), "reason", None)
            .await
            .unwrap();
        assert!(scheduler.unblacklist(&hub, &subject).await.unwrap());
        assert!(!scheduler.unblacklist(&hub, &subject).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_entry_expires() {
        let scheduler = scheduler();
        let hub = HubId::new();
        let subject = user("u1");

        scheduler
            .blacklist(hub, subject.clone(), "spam", Some(Duration::from_secs(300)))
            .await
            .unwrap();
        assert!(scheduler.is_active(&hub, &subject).await.unwrap());
        assert_eq!(scheduler.pending_timers(), 1);

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(!scheduler.is_active(&hub, &subject).await.unwrap());
        assert!(scheduler.entry(&hub, &subject).await.unwrap().is_none());
        assert_eq!(scheduler.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_unblacklist_cancels_timer() {
        let scheduler = scheduler();
        let hub = HubId::new();
        let subject = user("u1");

        scheduler
            .blacklist(hub, subject.clone(), "spam", Some(Duration::from_secs(300)))
            .await
            .unwrap();
        scheduler.unblacklist(&hub, &subject).await.unwrap();
        assert_eq!(scheduler.pending_timers(), 0);

        // re-blacklist permanently, then let the old deadline pass: the
        // aborted timer must not remove the new entry
        scheduler
            .blacklist(hub, subject.clone(), "again", None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(400)).await;
        assert!(scheduler.is_active(&hub, &subject).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacing_entry_rearms_timer() {
        let scheduler = scheduler();
        let hub = HubId::new();
        let subject = user("u1");

        scheduler
            .blacklist(hub, subject.clone(), "first", Some(Duration::from_secs(100)))
            .await
            .unwrap();
        scheduler
            .blacklist(hub, subject.clone(), "second", Some(Duration::from_secs(600)))
            .await
            .unwrap();
        assert_eq!(scheduler.pending_timers(), 1);

        tokio::time::sleep(Duration::from_secs(150)).await;
        // the first deadline has passed, but the replacing entry survives
        let entry = scheduler.entry(&hub, &subject).await.unwrap().unwrap();
        assert_eq!(entry.reason, "second");

        tokio::time::sleep(Duration::from_secs(500)).await;
        assert!(!scheduler.is_active(&hub, &subject).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_entry_reads_inactive_without_timer() {
        // simulate an entry whose timer was lost to a restart
        let store = Arc::new(MemoryStore::new());
        let hub = HubId::new();
        let subject = user("u1");
        store
            .upsert_blacklist_entry(BlacklistEntry {
                hub_id: hub,
                subject: subject.clone(),
                reason: "stale".into(),
                issued_at: SystemTime::now() - Duration::from_secs(600),
                expires_at: Some(SystemTime::now() - Duration::from_secs(300)),
                notified: false,
            })
            .await
            .unwrap();

        let scheduler = BlacklistScheduler::new(store);
        assert!(!scheduler.is_active(&hub, &subject).await.unwrap());
    }

    #[tokio::test]
    async fn test_reconcile_expires_stale_and_rearms_rest() {
        let store = Arc::new(MemoryStore::new());
        let hub = HubId::new();
        let now = SystemTime::now();

        for (name, offset) in [("past", -300i64), ("future", 300)] {
            store
                .upsert_blacklist_entry(BlacklistEntry {
                    hub_id: hub,
                    subject: user(name),
                    reason: "test".into(),
                    issued_at: now - Duration::from_secs(600),
                    expires_at: Some(if offset < 0 {
                        now - Duration::from_secs((-offset) as u64)
                    } else {
                        now + Duration::from_secs(offset as u64)
                    }),
                    notified: false,
                })
                .await
                .unwrap();
        }
        store
            .upsert_blacklist_entry(BlacklistEntry {
                hub_id: hub,
                subject: user("permanent"),
                reason: "test".into(),
                issued_at: now,
                expires_at: None,
                notified: false,
            })
            .await
            .unwrap();

        let scheduler = BlacklistScheduler::new(store);
        let expired = scheduler.reconcile().await.unwrap();
        assert_eq!(expired, 1);
        assert!(scheduler.entry(&hub, &user("past")).await.unwrap().is_none());
        assert!(scheduler.is_active(&hub, &user("future")).await.unwrap());
        assert!(scheduler.is_active(&hub, &user("permanent")).await.unwrap());
        assert_eq!(scheduler.pending_timers(), 1);
    }

    #[tokio::test]
    async fn test_mark_notified_flips_flag() {
        let scheduler = scheduler();
        let hub = HubId::new();
        let subject = user("u1");

        scheduler
            .blacklist(hub, subject.clone(), "reason", None)
            .await
            .unwrap();
        assert!(!scheduler.entry(&hub, &subject).await.unwrap().unwrap().notified);

        scheduler.mark_notified(&hub, &subject).await.unwrap();
        assert!(scheduler.entry(&hub, &subject).await.unwrap().unwrap().notified);
    }
}
