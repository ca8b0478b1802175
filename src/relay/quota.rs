//! Rolling 24 h usage quotas
//!
//! A window opens on a user's first counted action and resets once it is a
//! day old. Counters are in memory only; a restart gives everyone a fresh
//! window. The bot owner is never limited.

use crate::types::UserId;
use std::collections::HashMap;
use std::sync::Mutex;

pub const QUOTA_WINDOW_SECS: i64 = 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaKind {
    /// Text-only menfess posts
    Text,
    /// Photo / video menfess posts
    Media,
    /// Media pipeline downloads
    Download,
}

impl QuotaKind {
    pub fn label(&self) -> &'static str {
        match self {
            QuotaKind::Text => "text posts",
            QuotaKind::Media => "photo/video posts",
            QuotaKind::Download => "downloads",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    pub text: u32,
    pub media: u32,
    pub download: u32,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            text: 5,
            media: 10,
            download: 2,
        }
    }
}

impl QuotaLimits {
    pub fn limit_for(&self, kind: QuotaKind) -> u32 {
        match kind {
            QuotaKind::Text => self.text,
            QuotaKind::Media => self.media,
            QuotaKind::Download => self.download,
        }
    }
}

/// Current usage. `limit` and `resets_in` are `None` for unlimited users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaUsage {
    pub used: u32,
    pub limit: Option<u32>,
    pub resets_in: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaExceeded {
    pub kind: QuotaKind,
    pub limit: u32,
    pub resets_in: i64,
}

impl std::fmt::Display for QuotaExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Daily limit of {} {} reached, resets in {}s",
            self.limit,
            self.kind.label(),
            self.resets_in
        )
    }
}

impl std::error::Error for QuotaExceeded {}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: i64,
    used: u32,
}

impl Window {
    fn current(window: Option<Window>, now: i64) -> Option<Window> {
        window.filter(|w| now - w.started_at < QUOTA_WINDOW_SECS)
    }

    fn resets_in(&self, now: i64) -> i64 {
        (QUOTA_WINDOW_SECS - (now - self.started_at)).max(0)
    }
}

#[derive(Debug)]
pub struct QuotaTracker {
    limits: QuotaLimits,
    unlimited: UserId,
    windows: Mutex<HashMap<(UserId, QuotaKind), Window>>,
}

impl QuotaTracker {
    /// `unlimited` is the owner id, exempt from every quota
    pub fn new(limits: QuotaLimits, unlimited: UserId) -> Self {
        Self {
            limits,
            unlimited,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> QuotaLimits {
        self.limits
    }

    fn is_unlimited(&self, user: UserId) -> bool {
        user == self.unlimited
    }

    fn unlimited_usage() -> QuotaUsage {
        QuotaUsage {
            used: 0,
            limit: None,
            resets_in: None,
        }
    }

    fn windows(&self) -> std::sync::MutexGuard<'_, HashMap<(UserId, QuotaKind), Window>> {
        self.windows.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Usage without counting anything
    pub fn usage(&self, user: UserId, kind: QuotaKind, now: i64) -> QuotaUsage {
        if self.is_unlimited(user) {
            return Self::unlimited_usage();
        }
        let limit = self.limits.limit_for(kind);
        match Window::current(self.windows().get(&(user, kind)).copied(), now) {
            Some(w) => QuotaUsage {
                used: w.used,
                limit: Some(limit),
                resets_in: Some(w.resets_in(now)),
            },
            None => QuotaUsage {
                used: 0,
                limit: Some(limit),
                resets_in: Some(QUOTA_WINDOW_SECS),
            },
        }
    }

    /// Check and count in one step
    pub fn try_consume(
        &self,
        user: UserId,
        kind: QuotaKind,
        now: i64,
    ) -> Result<QuotaUsage, QuotaExceeded> {
        if self.is_unlimited(user) {
            return Ok(Self::unlimited_usage());
        }
        let limit = self.limits.limit_for(kind);
        let mut windows = self.windows();
        let window = Window::current(windows.get(&(user, kind)).copied(), now).unwrap_or(Window {
            started_at: now,
            used: 0,
        });
        if window.used >= limit {
            return Err(QuotaExceeded {
                kind,
                limit,
                resets_in: window.resets_in(now),
            });
        }
        let window = Window {
            used: window.used + 1,
            ..window
        };
        windows.insert((user, kind), window);
        Ok(QuotaUsage {
            used: window.used,
            limit: Some(limit),
            resets_in: Some(window.resets_in(now)),
        })
    }

    /// Give back one action, used when a consumed download fails
    pub fn refund(&self, user: UserId, kind: QuotaKind) {
        if let Some(window) = self.windows().get_mut(&(user, kind)) {
            window.used = window.used.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: UserId = 1;

    fn tracker() -> QuotaTracker {
        QuotaTracker::new(
            QuotaLimits {
                text: 2,
                media: 1,
                download: 1,
            },
            OWNER,
        )
    }

    #[test]
    fn test_limit_enforced_until_window_resets() {
        let q = tracker();
        q.try_consume(5, QuotaKind::Text, 0).unwrap();
        let second = q.try_consume(5, QuotaKind::Text, 100).unwrap();
        assert_eq!(second.used, 2);

        let err = q.try_consume(5, QuotaKind::Text, 200).unwrap_err();
        assert_eq!(err.limit, 2);
        assert_eq!(err.resets_in, QUOTA_WINDOW_SECS - 200);
        assert_eq!(q.usage(5, QuotaKind::Text, 200).used, 2);

        assert_eq!(q.usage(5, QuotaKind::Text, QUOTA_WINDOW_SECS).used, 0);
        assert!(q.try_consume(5, QuotaKind::Text, QUOTA_WINDOW_SECS).is_ok());
    }

    #[test]
    fn test_kinds_are_independent() {
        let q = tracker();
        q.try_consume(5, QuotaKind::Media, 0).unwrap();
        assert!(q.try_consume(5, QuotaKind::Media, 1).is_err());
        assert!(q.try_consume(5, QuotaKind::Text, 1).is_ok());
    }

    #[test]
    fn test_owner_is_unlimited() {
        let q = tracker();
        for t in 0..10 {
            assert!(q.try_consume(OWNER, QuotaKind::Download, t).is_ok());
        }
        assert_eq!(q.usage(OWNER, QuotaKind::Download, 10).limit, None);
    }

    #[test]
    fn test_refund_restores_capacity() {
        let q = tracker();
        assert!(q.try_consume(5, QuotaKind::Download, 0).is_ok());
        assert!(q.try_consume(5, QuotaKind::Download, 1).is_err());
        q.refund(5, QuotaKind::Download);
        assert!(q.try_consume(5, QuotaKind::Download, 2).is_ok());
    }
}
