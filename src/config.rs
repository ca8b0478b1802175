use crate::media::MediaLimits;
use crate::moderation::types::MAX_TEMPORARY_BAN_SECS;
use crate::moderation::RepeatOffensePolicy;
use crate::relay::QuotaLimits;
use crate::types::{ChatId, UserId};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Bot configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    /// Exempt from quotas and always allowed to run admin commands
    pub owner_id: UserId,
    /// Broadcast channel for relayed posts
    pub channel_id: ChatId,
    pub log_channel_id: Option<ChatId>,
    pub link_ban_duration: chrono::Duration,
    pub repeat_policy: RepeatOffensePolicy,
    pub ban_tick_interval: Duration,
    pub link_allowlist: Vec<String>,
    pub media: MediaLimits,
    pub quotas: QuotaLimits,
    pub rust_log: String,
}

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(format!("{}='{}'", key, raw))),
        _ => Ok(default),
    }
}

impl BotConfig {
    /// Load configuration from the process environment
    ///
    /// Call `dotenv::dotenv().ok()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env` with an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = PathBuf::from(lookup("DATA_DIR").unwrap_or_else(|| "/app/data".to_string()));
        let db_path = lookup("DB_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("users.db"));

        let owner_id = parse_or::<UserId, _>(&lookup, "OWNER_ID", 0)?;

        let channel_id = lookup("CHANNEL_ID")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVariable("CHANNEL_ID".to_string()))?;
        let channel_id = channel_id
            .trim()
            .parse::<ChatId>()
            .map_err(|_| ConfigError::InvalidValue(format!("CHANNEL_ID='{}'", channel_id)))?;

        // 0 disables the log channel
        let log_channel_id = match parse_or::<ChatId, _>(&lookup, "LOG_CHANNEL_ID", 0)? {
            0 => None,
            id => Some(id),
        };

        let link_ban_secs = parse_or::<i64, _>(&lookup, "LINK_BAN_SECS", 3600)?;
        if link_ban_secs <= 0 || link_ban_secs > MAX_TEMPORARY_BAN_SECS {
            return Err(ConfigError::InvalidValue(format!(
                "LINK_BAN_SECS must be between 1 and {}, got {}",
                MAX_TEMPORARY_BAN_SECS, link_ban_secs
            )));
        }

        let escalation_factor = parse_or::<u32, _>(&lookup, "BAN_ESCALATION_FACTOR", 2)?;
        let policy = lookup("REPEAT_OFFENSE_POLICY").unwrap_or_else(|| "no-stack".to_string());
        let repeat_policy = match policy.trim().to_lowercase().as_str() {
            "" | "no-stack" | "nostack" => RepeatOffensePolicy::NoStack,
            "extend" => RepeatOffensePolicy::Extend,
            "escalate" => RepeatOffensePolicy::Escalate {
                factor: escalation_factor.max(1),
                max: chrono::Duration::seconds(MAX_TEMPORARY_BAN_SECS),
            },
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "REPEAT_OFFENSE_POLICY must be no-stack, extend or escalate, got '{}'",
                    other
                )))
            }
        };

        let tick_secs = parse_or::<u64, _>(&lookup, "BAN_TICK_INTERVAL_SECS", 30)?;
        if tick_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "BAN_TICK_INTERVAL_SECS must be positive".to_string(),
            ));
        }

        let link_allowlist = lookup("LINK_ALLOWLIST")
            .map(|s| {
                s.split(',')
                    .map(|host| host.trim().to_string())
                    .filter(|host| !host.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let defaults = MediaLimits::default();
        let media = MediaLimits {
            size_limit_bytes: parse_or(&lookup, "MEDIA_SIZE_LIMIT_BYTES", defaults.size_limit_bytes)?,
            fetch_timeout: Duration::from_secs(parse_or(
                &lookup,
                "MEDIA_FETCH_TIMEOUT_SECS",
                defaults.fetch_timeout.as_secs(),
            )?),
            convert_timeout: Duration::from_secs(parse_or(
                &lookup,
                "MEDIA_CONVERT_TIMEOUT_SECS",
                defaults.convert_timeout.as_secs(),
            )?),
            max_concurrent_jobs: parse_or(
                &lookup,
                "MEDIA_MAX_CONCURRENT_JOBS",
                defaults.max_concurrent_jobs,
            )?,
        };
        if media.max_concurrent_jobs == 0 {
            return Err(ConfigError::InvalidValue(
                "MEDIA_MAX_CONCURRENT_JOBS must be at least 1".to_string(),
            ));
        }

        let quota_defaults = QuotaLimits::default();
        let quotas = QuotaLimits {
            text: parse_or(&lookup, "LIMIT_MENFESS_TEXT", quota_defaults.text)?,
            media: parse_or(&lookup, "LIMIT_MENFESS_MEDIA", quota_defaults.media)?,
            download: parse_or(&lookup, "LIMIT_DOWNLOAD", quota_defaults.download)?,
        };

        let rust_log = lookup("RUST_LOG").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            data_dir,
            db_path,
            owner_id,
            channel_id,
            log_channel_id,
            link_ban_duration: chrono::Duration::seconds(link_ban_secs),
            repeat_policy,
            ban_tick_interval: Duration::from_secs(tick_secs),
            link_allowlist,
            media,
            quotas,
            rust_log,
        })
    }

    /// Single-instance lock file
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("bot.lock")
    }
}
