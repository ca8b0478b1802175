//! Ban Admin - inspect and repair the ban table
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin ban_admin -- list
//! cargo run --bin ban_admin -- expired
//! cargo run --bin ban_admin -- delete <chat_id> <user_id>
//! ```
//!
//! `list` and `expired` print JSON to stdout. `delete` removes the record
//! only; the platform restriction is left to expire on its own.
//!
//! ## Environment Variables
//!
//! - DB_PATH - SQLite database path (default: $DATA_DIR/users.db)
//! - DATA_DIR - Data directory (default: /app/data)
//! - RUST_LOG - Logging level (optional, default: warn)

use menfess_bot::store::{SqliteStateStore, StateStore};
use menfess_bot::text::human_duration;
use menfess_bot::types::{ChatId, UserId};
use serde::Serialize;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Serialize)]
struct BanView {
    chat_id: ChatId,
    user_id: UserId,
    reason: String,
    strikes: u32,
    restricted: bool,
    created_at: String,
    expires_at: String,
    remaining: String,
}

fn db_path() -> PathBuf {
    match env::var("DB_PATH") {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "/app/data".to_string()))
            .join("users.db"),
    }
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

fn usage() -> ! {
    eprintln!("usage: ban_admin <list | expired | delete <chat_id> <user_id>>");
    std::process::exit(2);
}

fn parse_id(value: Option<&String>, name: &str) -> Result<i64, Box<dyn std::error::Error>> {
    let raw = value.ok_or_else(|| format!("missing {}", name))?;
    raw.parse::<i64>()
        .map_err(|_| format!("invalid {}: {}", name, raw).into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let command = args.first().map(|s| s.as_str()).unwrap_or_else(|| usage());

    let path = db_path();
    let store = SqliteStateStore::open(&path)?;
    let now = chrono::Utc::now().timestamp();

    let to_view = |ban: menfess_bot::store::BanRecord| BanView {
        chat_id: ban.chat_id,
        user_id: ban.user_id,
        remaining: human_duration(ban.remaining_secs(now)),
        reason: ban.reason,
        strikes: ban.strikes,
        restricted: ban.restricted,
        created_at: format_ts(ban.created_at),
        expires_at: format_ts(ban.expires_at),
    };

    match command {
        "list" => {
            let bans: Vec<BanView> = store
                .list_active_bans()
                .await?
                .into_iter()
                .map(to_view)
                .collect();
            println!("{}", serde_json::to_string_pretty(&bans)?);
        }
        "expired" => {
            let bans: Vec<BanView> = store
                .list_expired_bans(now)?
                .into_iter()
                .map(to_view)
                .collect();
            log::info!("{} expired bans awaiting the scheduler", bans.len());
            println!("{}", serde_json::to_string_pretty(&bans)?);
        }
        "delete" => {
            let chat_id = parse_id(args.get(1), "chat_id")?;
            let user_id = parse_id(args.get(2), "user_id")?;
            if store.delete_ban(chat_id, user_id).await? {
                println!("✅ Deleted ban for user {} in chat {}", user_id, chat_id);
            } else {
                println!("⚠️  No ban recorded for user {} in chat {}", user_id, chat_id);
            }
        }
        _ => usage(),
    }

    Ok(())
}
