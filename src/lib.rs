//! Moderation and anonymous-post relay bot for group chats
//!
//! - `moderation` - temporary bans, link enforcement, greetings, admin commands
//! - `relay` - anonymous tagged posts and daily quotas
//! - `media` - bounded fetch / convert / upload pipeline
//! - `dispatcher` / `runtime` - event routing and process wiring
//!
//! The messaging platform is reached only through `platform::PlatformClient`.

pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod instance_lock;
pub mod media;
pub mod moderation;
pub mod platform;
pub mod relay;
pub mod runtime;
pub mod sqlite_pragma;
pub mod store;
pub mod testing;
pub mod text;
pub mod types;

pub use config::{BotConfig, ConfigError};
pub use dispatcher::{DispatchOutcome, Dispatcher, InboundEvent};
pub use runtime::{init_logging, Bot, Collaborators, StartupError};
