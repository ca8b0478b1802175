//! Event loop wiring
//!
//! `Bot::run` must:
//! - dispatch events received on the channel
//! - lift expired bans from its own scheduler task
//! - return once every sender is dropped
//!
//! `Bot::start` must load from the environment and hold the instance lock.

#[cfg(test)]
mod runtime_tests {
    use menfess_bot::instance_lock::LockError;
    use menfess_bot::moderation::LINK_VIOLATION_REASON;
    use menfess_bot::store::{SqliteStateStore, StateStore};
    use menfess_bot::testing::{group_message, FakeTranscoder, FixedClock, RecordingPlatform, StaticFetcher};
    use menfess_bot::{init_logging, Bot, BotConfig, Collaborators, InboundEvent, StartupError};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout, Instant};

    const GROUP: i64 = -100500;
    const START: i64 = 1_700_000_000;

    async fn wait_for<F, Fut>(mut condition: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_run_dispatches_events_and_lifts_expired_bans() {
        init_logging("debug");

        let dir = tempdir().unwrap();
        let vars: HashMap<&str, String> = [
            ("CHANNEL_ID", "-100900".to_string()),
            ("OWNER_ID", "1".to_string()),
            ("DATA_DIR", dir.path().display().to_string()),
            ("LINK_BAN_SECS", "3600".to_string()),
        ]
        .into_iter()
        .collect();
        let mut config = BotConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();
        config.ban_tick_interval = Duration::from_millis(20);

        let store = SqliteStateStore::open(&config.db_path).unwrap();
        let platform = Arc::new(RecordingPlatform::new());
        let clock = Arc::new(FixedClock::new(START));
        let bot = Bot::assemble(
            &config,
            Collaborators {
                store: Arc::new(store.clone()),
                platform: platform.clone(),
                clock: clock.clone(),
                fetcher: Arc::new(StaticFetcher::new(Vec::new())),
                transcoder: Arc::new(FakeTranscoder::succeed(0)),
            },
        );

        // Already expired when the loop starts
        bot.scheduler()
            .apply_ban(GROUP, 3, chrono::Duration::seconds(60), "manual")
            .await
            .unwrap();
        clock.advance(60);

        let (tx, rx) = mpsc::channel(8);
        let running = tokio::spawn(bot.run(rx));

        tx.send(InboundEvent::GroupMessage(group_message(
            GROUP,
            10,
            7,
            "https://spam.example/deal",
        )))
        .await
        .unwrap();

        let banned = wait_for(|| {
            let store = store.clone();
            async move { store.get_ban(GROUP, 7).await.unwrap().is_some() }
        })
        .await;
        assert!(banned, "link event was not dispatched");
        let ban = store.get_ban(GROUP, 7).await.unwrap().unwrap();
        assert_eq!(ban.reason, LINK_VIOLATION_REASON);
        assert_eq!(ban.expires_at, START + 60 + 3600);

        let lifted = wait_for(|| {
            let store = store.clone();
            async move { store.get_ban(GROUP, 3).await.unwrap().is_none() }
        })
        .await;
        assert!(lifted, "scheduler task did not lift the expired ban");
        assert_eq!(platform.unrestrict_count(GROUP, 3), 1);

        drop(tx);
        timeout(Duration::from_secs(5), running)
            .await
            .expect("run did not return after the channel closed")
            .unwrap();

        // The unexpired link ban is untouched
        assert!(store.get_ban(GROUP, 7).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_start_from_env_holds_instance_lock() {
        let dir = tempdir().unwrap();
        std::env::set_var("CHANNEL_ID", "-100900");
        std::env::set_var("DATA_DIR", dir.path());
        std::env::remove_var("DB_PATH");

        let config = BotConfig::from_env().unwrap();
        assert_eq!(config.db_path, dir.path().join("users.db"));

        let platform = Arc::new(RecordingPlatform::new());
        let bot = match Bot::start(&config, platform.clone()) {
            Ok(bot) => bot,
            Err(e) => panic!("start failed: {}", e),
        };
        assert!(config.lock_path().exists());

        let second = Bot::start(&config, platform.clone());
        assert!(matches!(
            second,
            Err(StartupError::Lock(LockError::AlreadyRunning { .. }))
        ));

        // Closed channel: run drains nothing and returns, releasing the lock
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        timeout(Duration::from_secs(5), bot.run(rx))
            .await
            .expect("run did not return");
        assert!(!config.lock_path().exists());
    }
}
