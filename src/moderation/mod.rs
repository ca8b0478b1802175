//! Moderation enforcement
//!
//! - `scheduler` - temporary bans and their expiry
//! - `link_detector` / `link_guard` - no-links policy for group chats
//! - `welcome` - one-time greetings for new members
//! - `admin` - ban / unban / kick issued by chat administrators
//!
//! All ban state lives in the `StateStore`; see `scheduler` for how expiry
//! is reconciled.

pub mod admin;
pub mod keyed_lock;
pub mod link_detector;
pub mod link_guard;
pub mod scheduler;
pub mod types;
pub mod welcome;

pub use admin::{AdminCommand, AdminCommands, AdminOutcome};
pub use link_detector::{DetectedLink, LinkAllowList, LinkDetector};
pub use link_guard::{LinkGuard, LinkGuardConfig};
pub use scheduler::{run_scheduler_task, BanScheduler};
pub use types::{
    BanError, EnforcementAction, LinkVerdict, RepeatOffensePolicy, TickReport,
    LINK_VIOLATION_REASON,
};
pub use welcome::Greeter;
