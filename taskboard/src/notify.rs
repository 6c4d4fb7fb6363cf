//! Transient user-facing notices.
//!
//! Board operations post short messages ("Task created successfully!",
//! remote error details, permission refusals). Each notice expires after a
//! fixed interval; the render layer calls [`NoticeBoard::tick`] to drop
//! expired ones.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// Default lifetime of a notice.
pub const DEFAULT_NOTICE_TTL: Duration = Duration::from_secs(3);
/// Lifetime of form validation notices.
pub const VALIDATION_NOTICE_TTL: Duration = Duration::from_secs(4);
/// Lifetime of guest lookup errors.
pub const GUEST_ERROR_TTL: Duration = Duration::from_secs(5);

/// Severity of a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for NoticeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// A message shown to the user until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: u64,
    pub level: NoticeLevel,
    pub text: String,
    pub expires_at: Instant,
}

/// Queue of live notices, oldest first.
#[derive(Debug)]
pub struct NoticeBoard {
    notices: VecDeque<Notice>,
    ttl: Duration,
    next_id: u64,
}

impl Default for NoticeBoard {
    fn default() -> Self {
        Self::new(DEFAULT_NOTICE_TTL)
    }
}

impl NoticeBoard {
    /// Creates a board whose notices live for `ttl` unless posted with their own.
    #[must_use]
    pub const fn new(ttl: Duration) -> Self {
        Self {
            notices: VecDeque::new(),
            ttl,
            next_id: 1,
        }
    }

    /// Posts a notice with the default lifetime and returns its id.
    pub fn post(&mut self, level: NoticeLevel, text: impl Into<String>) -> u64 {
        self.post_for(level, text, self.ttl)
    }

    /// Posts a notice with an explicit lifetime.
    pub fn post_for(&mut self, level: NoticeLevel, text: impl Into<String>, ttl: Duration) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let text = text.into();
        tracing::debug!(notice_id = id, %level, %text, "notice posted");
        self.notices.push_back(Notice {
            id,
            level,
            text,
            expires_at: Instant::now() + ttl,
        });
        id
    }

    /// Removes and returns every notice that has expired by `now`.
    pub fn tick(&mut self, now: Instant) -> Vec<Notice> {
        let (expired, live): (Vec<_>, Vec<_>) =
            self.notices.drain(..).partition(|n| n.expires_at <= now);
        self.notices = live.into();
        expired
    }

    /// Removes a notice before it expires.
    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.notices.len();
        self.notices.retain(|n| n.id != id);
        self.notices.len() != before
    }

    /// Live notices, oldest first.
    pub fn active(&self) -> impl Iterator<Item = &Notice> {
        self.notices.iter()
    }

    /// The most recent notice, if any.
    #[must_use]
    pub fn latest(&self) -> Option<&Notice> {
        self.notices.back()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.notices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notices.is_empty()
    }
}
