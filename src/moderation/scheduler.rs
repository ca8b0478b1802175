//! Temporary-ban bookkeeping and expiry reconciliation
//!
//! The scheduler owns no ban state. Every decision is made against the store:
//! - `apply_ban` writes or replaces the record, then restricts on the platform
//! - `tick` lifts every record whose expiry has passed and retries any
//!   restriction the platform has not confirmed yet
//! - `is_banned` is a plain read
//!
//! Because the record is the source of truth (not an in-process timer), bans
//! survive restarts and a lift that fails is simply retried on the next tick.

use super::keyed_lock::KeyedLocks;
use super::types::{BanError, TickReport, MAX_TEMPORARY_BAN_SECS, MIN_RESTRICT_SECS};
use crate::clock::Clock;
use crate::platform::PlatformClient;
use crate::store::{BanRecord, StateStore};
use crate::types::{ChatId, UserId};
use chrono::Duration;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tokio::time::interval;

pub struct BanScheduler {
    store: Arc<dyn StateStore>,
    platform: Arc<dyn PlatformClient>,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks<(ChatId, UserId)>,
}

impl BanScheduler {
    pub fn new(
        store: Arc<dyn StateStore>,
        platform: Arc<dyn PlatformClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            platform,
            clock,
            locks: KeyedLocks::new(),
        }
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    /// Serialize a check-then-act sequence on one `(chat_id, user_id)` pair.
    ///
    /// The `*_locked` methods assume the caller holds this guard.
    pub async fn lock_pair(&self, chat_id: ChatId, user_id: UserId) -> OwnedMutexGuard<()> {
        self.locks.lock((chat_id, user_id)).await
    }

    /// Ban `user_id` in `chat_id` for `duration`, replacing any existing ban
    pub async fn apply_ban(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        duration: Duration,
        reason: &str,
    ) -> Result<BanRecord, BanError> {
        let _guard = self.lock_pair(chat_id, user_id).await;
        self.apply_ban_locked(chat_id, user_id, duration, reason).await
    }

    pub(crate) async fn apply_ban_locked(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        duration: Duration,
        reason: &str,
    ) -> Result<BanRecord, BanError> {
        let secs = duration.num_seconds();
        if secs <= 0 || secs > MAX_TEMPORARY_BAN_SECS {
            return Err(BanError::InvalidDuration(duration));
        }

        let now = self.clock.now();
        // An expired record is replaced by a fresh ban, not counted as a repeat
        let existing = self
            .store
            .get_ban(chat_id, user_id)
            .await?
            .filter(|ban| !ban.is_expired(now));
        let mut record = match existing {
            Some(prev) => BanRecord {
                reason: reason.to_string(),
                expires_at: now + secs,
                strikes: prev.strikes.saturating_add(1),
                restricted: false,
                ..prev
            },
            None => BanRecord {
                chat_id,
                user_id,
                reason: reason.to_string(),
                created_at: now,
                expires_at: now + secs,
                strikes: 1,
                restricted: false,
            },
        };
        // Written before the platform call so a crash in between still leaves
        // a record for the tick to restrict and later lift
        self.store.put_ban(&record).await?;

        match self.restrict(&record, now).await {
            Ok(()) => {
                record.restricted = true;
                self.store.put_ban(&record).await?;
                log::info!(
                    "🔒 Banned user {} in chat {} until {} ({}, strike {})",
                    user_id,
                    chat_id,
                    record.expires_at,
                    record.reason,
                    record.strikes
                );
            }
            Err(e) => {
                log::error!(
                    "❌ Restrict failed for user {} in chat {}, retrying next tick: {}",
                    user_id,
                    chat_id,
                    e
                );
            }
        }

        Ok(record)
    }

    async fn restrict(&self, ban: &BanRecord, now: i64) -> Result<(), BanError> {
        // An `until` too close to now would be read as a permanent ban
        let until = ban.expires_at.max(now + MIN_RESTRICT_SECS);
        self.platform
            .restrict_user(ban.chat_id, ban.user_id, until)
            .await?;
        Ok(())
    }

    pub async fn is_banned(&self, chat_id: ChatId, user_id: UserId) -> Result<bool, BanError> {
        Ok(self.store.get_ban(chat_id, user_id).await?.is_some())
    }

    pub async fn current_ban(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<Option<BanRecord>, BanError> {
        Ok(self.store.get_ban(chat_id, user_id).await?)
    }

    /// Manual unban. Unlike `tick`, a platform failure is returned to the caller
    /// and the record is kept.
    pub async fn lift_ban(&self, chat_id: ChatId, user_id: UserId) -> Result<bool, BanError> {
        let _guard = self.lock_pair(chat_id, user_id).await;
        self.platform.unrestrict_user(chat_id, user_id).await?;
        let removed = self.store.delete_ban(chat_id, user_id).await?;
        log::info!("🔓 Manually lifted ban for user {} in chat {}", user_id, chat_id);
        Ok(removed)
    }

    /// Lift every ban with `expires_at <= now` and retry unconfirmed
    /// restrictions on the rest.
    ///
    /// Reads one snapshot of the store, then re-checks each candidate under its
    /// pair lock so a ban re-applied since the snapshot is left alone. Running
    /// twice with the same `now` issues no second unrestrict.
    pub async fn tick(&self, now: i64) -> Result<TickReport, BanError> {
        let snapshot = self.store.list_active_bans().await?;
        let mut report = TickReport {
            examined: snapshot.len(),
            ..TickReport::default()
        };

        for candidate in snapshot {
            if !candidate.is_expired(now) {
                if !candidate.restricted {
                    self.retry_restrict(candidate, now, &mut report).await;
                }
                continue;
            }

            let _guard = self.lock_pair(candidate.chat_id, candidate.user_id).await;

            let current = match self.store.get_ban(candidate.chat_id, candidate.user_id).await {
                Ok(Some(ban)) if ban.is_expired(now) => ban,
                Ok(_) => continue,
                Err(e) => {
                    log::warn!(
                        "⚠️  Could not re-read ban for user {} in chat {}: {}",
                        candidate.user_id,
                        candidate.chat_id,
                        e
                    );
                    report.retry += 1;
                    continue;
                }
            };

            if let Err(e) = self
                .platform
                .unrestrict_user(current.chat_id, current.user_id)
                .await
            {
                log::warn!(
                    "⚠️  Unrestrict failed for user {} in chat {}, retrying next tick: {}",
                    current.user_id,
                    current.chat_id,
                    e
                );
                report.retry += 1;
                continue;
            }

            match self.store.delete_ban(current.chat_id, current.user_id).await {
                Ok(_) => {
                    report.lifted += 1;
                    log::info!(
                        "🔓 Ban expired for user {} in chat {} ({})",
                        current.user_id,
                        current.chat_id,
                        current.reason
                    );
                }
                Err(e) => {
                    // Unrestrict is idempotent, so a retry next tick is harmless
                    log::warn!(
                        "⚠️  Lifted user {} in chat {} but could not delete record: {}",
                        current.user_id,
                        current.chat_id,
                        e
                    );
                    report.retry += 1;
                }
            }
        }

        Ok(report)
    }

    async fn retry_restrict(&self, candidate: BanRecord, now: i64, report: &mut TickReport) {
        let _guard = self.lock_pair(candidate.chat_id, candidate.user_id).await;

        let mut current = match self.store.get_ban(candidate.chat_id, candidate.user_id).await {
            Ok(Some(ban)) if !ban.restricted && !ban.is_expired(now) => ban,
            Ok(_) => return,
            Err(e) => {
                log::warn!(
                    "⚠️  Could not re-read ban for user {} in chat {}: {}",
                    candidate.user_id,
                    candidate.chat_id,
                    e
                );
                report.retry += 1;
                return;
            }
        };

        if let Err(e) = self.restrict(&current, now).await {
            log::warn!(
                "⚠️  Restrict still failing for user {} in chat {}: {}",
                current.user_id,
                current.chat_id,
                e
            );
            report.retry += 1;
            return;
        }

        current.restricted = true;
        match self.store.put_ban(&current).await {
            Ok(()) => {
                report.restricted += 1;
                log::info!(
                    "🔒 Restriction confirmed for user {} in chat {} until {}",
                    current.user_id,
                    current.chat_id,
                    current.expires_at
                );
            }
            Err(e) => {
                // Restricting again next tick is harmless
                log::warn!(
                    "⚠️  Restricted user {} in chat {} but could not update record: {}",
                    current.user_id,
                    current.chat_id,
                    e
                );
                report.retry += 1;
            }
        }
    }
}

/// Reconcile expired bans forever at `tick_interval`.
///
/// Errors are logged and the loop continues; ban state converges eventually.
pub async fn run_scheduler_task(scheduler: Arc<BanScheduler>, tick_interval: std::time::Duration) {
    log::info!("⏰ Starting ban scheduler (interval: {}s)", tick_interval.as_secs());

    let mut timer = interval(tick_interval);
    loop {
        timer.tick().await;

        let now = scheduler.now();
        match scheduler.tick(now).await {
            Ok(report) if report.lifted > 0 || report.restricted > 0 || report.retry > 0 => {
                log::info!(
                    "✅ Ban tick: {} active, {} lifted, {} restricted, {} pending retry",
                    report.examined,
                    report.lifted,
                    report.restricted,
                    report.retry
                );
            }
            Ok(report) => {
                log::debug!("Ban tick: {} active, nothing expired", report.examined);
            }
            Err(e) => {
                log::error!("❌ Ban tick failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStateStore;
    use crate::testing::{FixedClock, PlatformCall, RecordingPlatform};

    fn setup(now: i64) -> (Arc<BanScheduler>, Arc<RecordingPlatform>, Arc<FixedClock>) {
        let store = Arc::new(InMemoryStateStore::new());
        let platform = Arc::new(RecordingPlatform::new());
        let clock = Arc::new(FixedClock::new(now));
        let scheduler = Arc::new(BanScheduler::new(store, platform.clone(), clock.clone()));
        (scheduler, platform, clock)
    }

    #[tokio::test]
    async fn test_non_positive_duration_is_rejected_without_record() {
        let (scheduler, platform, _) = setup(1_000);

        for secs in [0, -1, -3600] {
            let result = scheduler
                .apply_ban(-100, 7, Duration::seconds(secs), "link-violation")
                .await;
            assert!(matches!(result, Err(BanError::InvalidDuration(_))));
        }

        assert!(!scheduler.is_banned(-100, 7).await.unwrap());
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_duration_beyond_horizon_is_rejected() {
        let (scheduler, _, _) = setup(1_000);
        let result = scheduler
            .apply_ban(-100, 7, Duration::days(400), "manual")
            .await;
        assert!(matches!(result, Err(BanError::InvalidDuration(_))));
    }

    #[tokio::test]
    async fn test_banned_until_tick_passes_expiry() {
        let (scheduler, platform, _) = setup(1_000);
        let ban = scheduler
            .apply_ban(-100, 7, Duration::hours(1), "link-violation")
            .await
            .unwrap();
        assert_eq!(ban.expires_at, 4_600);
        assert!(platform
            .calls()
            .contains(&PlatformCall::Restrict { chat_id: -100, user_id: 7, until: 4_600 }));

        scheduler.tick(4_599).await.unwrap();
        assert!(scheduler.is_banned(-100, 7).await.unwrap());

        let report = scheduler.tick(4_600).await.unwrap();
        assert_eq!(report.lifted, 1);
        assert!(!scheduler.is_banned(-100, 7).await.unwrap());
    }

    #[tokio::test]
    async fn test_tick_is_idempotent() {
        let (scheduler, platform, _) = setup(0);
        scheduler
            .apply_ban(-1, 2, Duration::seconds(60), "manual")
            .await
            .unwrap();

        scheduler.tick(100).await.unwrap();
        let second = scheduler.tick(100).await.unwrap();

        assert_eq!(second.lifted, 0);
        assert_eq!(platform.unrestrict_count(-1, 2), 1);
    }

    #[tokio::test]
    async fn test_failed_unrestrict_is_retried_next_tick() {
        let (scheduler, platform, _) = setup(0);
        scheduler
            .apply_ban(-1, 2, Duration::seconds(60), "manual")
            .await
            .unwrap();

        platform.fail_unrestrict(true);
        let report = scheduler.tick(60).await.unwrap();
        assert_eq!(report.retry, 1);
        assert!(scheduler.is_banned(-1, 2).await.unwrap());

        platform.fail_unrestrict(false);
        let report = scheduler.tick(61).await.unwrap();
        assert_eq!(report.lifted, 1);
        assert!(!scheduler.is_banned(-1, 2).await.unwrap());
    }

    #[tokio::test]
    async fn test_reapply_replaces_expiry_and_counts_strike() {
        let (scheduler, _, clock) = setup(0);
        scheduler
            .apply_ban(-1, 2, Duration::seconds(60), "manual")
            .await
            .unwrap();
        clock.advance(30);
        let again = scheduler
            .apply_ban(-1, 2, Duration::seconds(60), "manual")
            .await
            .unwrap();

        assert_eq!(again.expires_at, 90);
        assert_eq!(again.strikes, 2);
        assert_eq!(again.created_at, 0);
    }

    #[tokio::test]
    async fn test_short_ban_never_sends_permanent_until() {
        let (scheduler, platform, _) = setup(1_000);
        scheduler
            .apply_ban(-1, 2, Duration::seconds(5), "manual")
            .await
            .unwrap();

        assert!(platform
            .calls()
            .contains(&PlatformCall::Restrict { chat_id: -1, user_id: 2, until: 1_030 }));
    }

    #[tokio::test]
    async fn test_restrict_failure_keeps_record() {
        let (scheduler, platform, _) = setup(0);
        platform.fail_restrict(true);

        let ban = scheduler
            .apply_ban(-1, 2, Duration::seconds(60), "manual")
            .await
            .unwrap();
        assert_eq!(ban.expires_at, 60);
        assert!(!ban.restricted);
        assert!(scheduler.is_banned(-1, 2).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_restrict_is_retried_next_tick() {
        let (scheduler, platform, _) = setup(0);
        platform.fail_restrict(true);
        scheduler
            .apply_ban(-1, 2, Duration::seconds(600), "manual")
            .await
            .unwrap();

        let report = scheduler.tick(10).await.unwrap();
        assert_eq!(report.retry, 1);
        assert_eq!(report.restricted, 0);

        platform.fail_restrict(false);
        let report = scheduler.tick(20).await.unwrap();
        assert_eq!(report.restricted, 1);
        assert!(platform
            .calls()
            .contains(&PlatformCall::Restrict { chat_id: -1, user_id: 2, until: 600 }));
        assert!(scheduler.current_ban(-1, 2).await.unwrap().unwrap().restricted);

        // Confirmed: later ticks leave it alone until expiry
        scheduler.tick(30).await.unwrap();
        assert_eq!(platform.restrict_count(-1, 2), 1);
    }

    #[tokio::test]
    async fn test_lift_ban_removes_record() {
        let (scheduler, platform, _) = setup(0);
        scheduler
            .apply_ban(-1, 2, Duration::seconds(600), "manual")
            .await
            .unwrap();

        assert!(scheduler.lift_ban(-1, 2).await.unwrap());
        assert!(!scheduler.is_banned(-1, 2).await.unwrap());
        assert_eq!(platform.unrestrict_count(-1, 2), 1);

        // Nothing left for the scheduler to do
        scheduler.tick(10_000).await.unwrap();
        assert_eq!(platform.unrestrict_count(-1, 2), 1);
    }
}
