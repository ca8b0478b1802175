//! Process wiring
//!
//! `Bot::assemble` builds every component from explicit collaborators;
//! `Bot::start` does the same with the production ones (SQLite store, HTTP
//! fetcher, ffmpeg, instance lock). `Bot::run` drives the ban scheduler and
//! one task per inbound event until the event channel closes.

use crate::clock::{Clock, SystemClock};
use crate::config::BotConfig;
use crate::dispatcher::{Dispatcher, InboundEvent};
use crate::instance_lock::{InstanceLock, LockError};
use crate::media::{FfmpegTranscoder, Fetcher, HttpFetcher, MediaError, MediaPipeline, Transcoder};
use crate::moderation::{
    run_scheduler_task, AdminCommands, BanScheduler, Greeter, LinkAllowList, LinkDetector,
    LinkGuard, LinkGuardConfig,
};
use crate::platform::PlatformClient;
use crate::relay::{QuotaTracker, Relay, RelayConfig};
use crate::store::{SqliteStateStore, StateStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Initialize `env_logger` on stderr, defaulting to `info`
pub fn init_logging(rust_log: &str) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(rust_log));
    // reqwest/hyper connection chatter is rarely useful
    if !rust_log.contains("hyper") {
        builder.filter_module("hyper", log::LevelFilter::Warn);
    }
    let _ = builder.target(env_logger::Target::Stderr).try_init();
}

#[derive(Debug)]
pub enum StartupError {
    Lock(LockError),
    Store(StoreError),
    Media(MediaError),
}

impl From<LockError> for StartupError {
    fn from(err: LockError) -> Self {
        StartupError::Lock(err)
    }
}

impl From<StoreError> for StartupError {
    fn from(err: StoreError) -> Self {
        StartupError::Store(err)
    }
}

impl From<MediaError> for StartupError {
    fn from(err: MediaError) -> Self {
        StartupError::Media(err)
    }
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartupError::Lock(e) => write!(f, "{}", e),
            StartupError::Store(e) => write!(f, "Failed to open state store: {}", e),
            StartupError::Media(e) => write!(f, "Failed to set up media pipeline: {}", e),
        }
    }
}

impl std::error::Error for StartupError {}

/// Collaborators that differ between deployments and tests
pub struct Collaborators {
    pub store: Arc<dyn StateStore>,
    pub platform: Arc<dyn PlatformClient>,
    pub clock: Arc<dyn Clock>,
    pub fetcher: Arc<dyn Fetcher>,
    pub transcoder: Arc<dyn Transcoder>,
}

pub struct Bot {
    scheduler: Arc<BanScheduler>,
    dispatcher: Arc<Dispatcher>,
    tick_interval: Duration,
    _lock: Option<InstanceLock>,
}

impl Bot {
    pub fn assemble(config: &BotConfig, parts: Collaborators) -> Self {
        let Collaborators {
            store,
            platform,
            clock,
            fetcher,
            transcoder,
        } = parts;

        let scheduler = Arc::new(BanScheduler::new(store.clone(), platform.clone(), clock.clone()));
        let quotas = Arc::new(QuotaTracker::new(config.quotas, config.owner_id));

        let link_guard = Arc::new(LinkGuard::new(
            scheduler.clone(),
            platform.clone(),
            LinkDetector::new(LinkAllowList::new(config.link_allowlist.iter())),
            LinkGuardConfig {
                punitive_duration: config.link_ban_duration,
                repeat_policy: config.repeat_policy,
                announce: true,
            },
        ));
        let greeter = Arc::new(Greeter::new(store.clone(), platform.clone()));
        let relay = Arc::new(Relay::new(
            store,
            platform.clone(),
            quotas.clone(),
            clock.clone(),
            RelayConfig {
                broadcast_chat: config.channel_id,
                log_chat: config.log_channel_id,
                owner_id: config.owner_id,
            },
        ));
        let media = Arc::new(MediaPipeline::new(
            fetcher,
            transcoder,
            platform.clone(),
            quotas,
            clock,
            config.media,
        ));
        let admin = Arc::new(AdminCommands::new(
            scheduler.clone(),
            platform.clone(),
            config.owner_id,
            config.link_ban_duration,
        ));

        let dispatcher = Arc::new(Dispatcher::new(link_guard, greeter, relay, media, admin, platform));

        Self {
            scheduler,
            dispatcher,
            tick_interval: config.ban_tick_interval,
            _lock: None,
        }
    }

    /// Take the instance lock, open the database and build the bot
    pub fn start(config: &BotConfig, platform: Arc<dyn PlatformClient>) -> Result<Self, StartupError> {
        let lock = InstanceLock::acquire(&config.lock_path())?;
        let store = SqliteStateStore::open(&config.db_path)?;

        log::info!("📊 Configuration:");
        log::info!("   CHANNEL_ID: {}", config.channel_id);
        log::info!("   LOG_CHANNEL_ID: {:?}", config.log_channel_id);
        log::info!("   LINK_BAN: {}s ({:?})", config.link_ban_duration.num_seconds(), config.repeat_policy);
        log::info!("   LINK_ALLOWLIST: {:?}", config.link_allowlist);
        log::info!("   MEDIA_SIZE_LIMIT: {} bytes", config.media.size_limit_bytes);

        let fetcher = HttpFetcher::new(Duration::from_secs(10))?;
        let mut bot = Self::assemble(
            config,
            Collaborators {
                store: Arc::new(store),
                platform,
                clock: Arc::new(SystemClock),
                fetcher: Arc::new(fetcher),
                transcoder: Arc::new(FfmpegTranscoder::new()),
            },
        );
        bot._lock = Some(lock);
        Ok(bot)
    }

    pub fn scheduler(&self) -> &Arc<BanScheduler> {
        &self.scheduler
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Process events until every sender of `events` is dropped
    pub async fn run(self, mut events: mpsc::Receiver<InboundEvent>) {
        let scheduler_task = tokio::spawn(run_scheduler_task(
            self.scheduler.clone(),
            self.tick_interval,
        ));
        log::info!("🚀 Bot running");

        let mut in_flight = tokio::task::JoinSet::new();
        while let Some(event) = events.recv().await {
            let dispatcher = self.dispatcher.clone();
            in_flight.spawn(async move {
                dispatcher.dispatch(event).await;
            });
            // reap finished handlers so the set does not grow unbounded
            while let Some(done) = in_flight.try_join_next() {
                if let Err(e) = done {
                    log::error!("❌ Event handler panicked: {}", e);
                }
            }
        }

        log::info!("🛑 Event channel closed, draining {} handlers", in_flight.len());
        while let Some(done) = in_flight.join_next().await {
            if let Err(e) = done {
                log::error!("❌ Event handler panicked: {}", e);
            }
        }
        scheduler_task.abort();
    }
}
