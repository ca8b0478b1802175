use crate::platform::PlatformError;
use crate::store::StoreError;
use chrono::Duration;

/// Reason recorded for bans issued by the link guard
pub const LINK_VIOLATION_REASON: &str = "link-violation";

/// Reason recorded for bans issued through admin commands
pub const MANUAL_BAN_REASON: &str = "manual";

/// Platforms treat restrictions shorter than this as permanent
pub const MIN_RESTRICT_SECS: i64 = 30;

/// Platforms treat restrictions longer than this as permanent
pub const MAX_TEMPORARY_BAN_SECS: i64 = 366 * 24 * 3600;

#[derive(Debug)]
pub enum BanError {
    /// Duration was zero, negative, or beyond the temporary-ban horizon
    InvalidDuration(Duration),
    Store(StoreError),
    Platform(PlatformError),
}

impl From<StoreError> for BanError {
    fn from(err: StoreError) -> Self {
        BanError::Store(err)
    }
}

impl From<PlatformError> for BanError {
    fn from(err: PlatformError) -> Self {
        BanError::Platform(err)
    }
}

impl std::fmt::Display for BanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BanError::InvalidDuration(d) => {
                write!(f, "Invalid ban duration: {}s", d.num_seconds())
            }
            BanError::Store(e) => write!(f, "Ban store error: {}", e),
            BanError::Platform(e) => write!(f, "Ban platform error: {}", e),
        }
    }
}

impl std::error::Error for BanError {}

/// What the link guard does when an already-banned user violates again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatOffensePolicy {
    /// Leave the existing ban untouched
    NoStack,
    /// Re-apply the base duration, counted from now
    Extend,
    /// Base duration multiplied by `factor` per prior strike, capped at `max`
    Escalate { factor: u32, max: Duration },
}

impl Default for RepeatOffensePolicy {
    fn default() -> Self {
        RepeatOffensePolicy::NoStack
    }
}

impl RepeatOffensePolicy {
    /// Duration to apply for a repeat offense, `None` to leave the ban as is
    pub fn repeat_duration(&self, base: Duration, strikes: u32) -> Option<Duration> {
        match self {
            RepeatOffensePolicy::NoStack => None,
            RepeatOffensePolicy::Extend => Some(base),
            RepeatOffensePolicy::Escalate { factor, max } => {
                let multiplier = (*factor as i64).saturating_pow(strikes.min(32));
                let secs = base.num_seconds().saturating_mul(multiplier);
                Some(Duration::seconds(secs.min(max.num_seconds())))
            }
        }
    }
}

/// Outcome of scanning one group message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkVerdict {
    /// Sender is a bot or chat administrator
    Exempt,
    Clean,
    Violation {
        link: String,
        action: EnforcementAction,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnforcementAction {
    Banned { expires_at: i64 },
    /// Already banned and the repeat policy left the ban untouched
    AlreadyBanned { expires_at: i64 },
    Extended { expires_at: i64, strikes: u32 },
    /// Ban could not be recorded; the message was still removed
    BanFailed,
}

/// Summary of one scheduler pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub examined: usize,
    pub lifted: usize,
    /// Unconfirmed restrictions that the platform accepted on this pass
    pub restricted: usize,
    /// Lifts or restrictions that failed and will be retried next tick
    pub retry: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_stack_never_extends() {
        let policy = RepeatOffensePolicy::NoStack;
        assert_eq!(policy.repeat_duration(Duration::hours(1), 3), None);
    }

    #[test]
    fn test_escalation_is_capped() {
        let policy = RepeatOffensePolicy::Escalate {
            factor: 2,
            max: Duration::hours(6),
        };
        assert_eq!(
            policy.repeat_duration(Duration::hours(1), 1),
            Some(Duration::hours(2))
        );
        assert_eq!(
            policy.repeat_duration(Duration::hours(1), 2),
            Some(Duration::hours(4))
        );
        assert_eq!(
            policy.repeat_duration(Duration::hours(1), 5),
            Some(Duration::hours(6))
        );
    }
}
