use crate::relay::QuotaExceeded;
use crate::types::{ChatId, MediaKind, UserId};
use std::time::Duration;

/// Telegram-style upload ceiling
pub const DEFAULT_SIZE_LIMIT_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    Url(String),
    /// Platform file reference, resolved to a URL before fetching
    PlatformFile(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFormat {
    /// Deliver the fetched bytes as they are
    Passthrough,
    /// Extract an audio track
    Audio,
}

impl TargetFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "passthrough" | "video" | "file" => Some(TargetFormat::Passthrough),
            "audio" | "mp3" => Some(TargetFormat::Audio),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MediaLimits {
    pub size_limit_bytes: u64,
    pub fetch_timeout: Duration,
    pub convert_timeout: Duration,
    pub max_concurrent_jobs: usize,
}

impl Default for MediaLimits {
    fn default() -> Self {
        Self {
            size_limit_bytes: DEFAULT_SIZE_LIMIT_BYTES,
            fetch_timeout: Duration::from_secs(60),
            convert_timeout: Duration::from_secs(120),
            max_concurrent_jobs: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStage {
    Fetch,
    Convert,
}

impl std::fmt::Display for TimeoutStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutStage::Fetch => write!(f, "fetch"),
            TimeoutStage::Convert => write!(f, "convert"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum MediaError {
    UnreachableSource(String),
    SizeExceeded { limit: u64, observed: u64 },
    ConversionError(String),
    Timeout(TimeoutStage),
    DeliveryFailure(String),
    /// Requester already has a job running
    JobInProgress,
    QuotaExceeded(QuotaExceeded),
    /// Local I/O on the job's working directory failed
    Io(String),
}

impl From<std::io::Error> for MediaError {
    fn from(err: std::io::Error) -> Self {
        MediaError::Io(err.to_string())
    }
}

impl From<QuotaExceeded> for MediaError {
    fn from(err: QuotaExceeded) -> Self {
        MediaError::QuotaExceeded(err)
    }
}

impl std::fmt::Display for MediaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaError::UnreachableSource(e) => write!(f, "Source unreachable: {}", e),
            MediaError::SizeExceeded { limit, observed } => {
                write!(f, "Media exceeds {} bytes (saw {})", limit, observed)
            }
            MediaError::ConversionError(e) => write!(f, "Conversion failed: {}", e),
            MediaError::Timeout(stage) => write!(f, "Media {} timed out", stage),
            MediaError::DeliveryFailure(e) => write!(f, "Upload failed: {}", e),
            MediaError::JobInProgress => write!(f, "A download is already running"),
            MediaError::QuotaExceeded(e) => write!(f, "{}", e),
            MediaError::Io(e) => write!(f, "Media I/O error: {}", e),
        }
    }
}

impl std::error::Error for MediaError {}

impl MediaError {
    /// Reply shown to the requester
    pub fn user_message(&self) -> String {
        match self {
            MediaError::UnreachableSource(_) => "❌ Could not download from that link.".to_string(),
            MediaError::SizeExceeded { limit, .. } => format!(
                "❌ The file is larger than {} MB and cannot be sent by the bot.",
                limit / (1024 * 1024)
            ),
            MediaError::ConversionError(_) => "❌ Could not convert the file.".to_string(),
            MediaError::Timeout(_) => "⏰ The download took too long and was cancelled.".to_string(),
            MediaError::DeliveryFailure(_) => "❌ Sending the file failed.".to_string(),
            MediaError::JobInProgress => {
                "⏳ Your previous download is still running, please wait.".to_string()
            }
            MediaError::QuotaExceeded(e) => format!(
                "😅 Today's quota for {} is used up.\n⏳ Resets in {}",
                e.kind.label(),
                crate::text::human_duration(e.resets_in)
            ),
            MediaError::Io(_) => "❌ Download failed, try again later.".to_string(),
        }
    }
}

/// Lifecycle of a media job. Terminal states are `Sent`, `Rejected` and `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Fetching,
    Converting,
    ReadyToSend,
    Sent,
    /// Refused by policy (size ceiling)
    Rejected(String),
    Failed(String),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Sent | JobState::Rejected(_) | JobState::Failed(_))
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(&self, next: &JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Queued, Fetching) => true,
            (Fetching, Converting) | (Fetching, ReadyToSend) => true,
            (Converting, ReadyToSend) => true,
            (ReadyToSend, Sent) => true,
            (s, Rejected(_)) | (s, Failed(_)) => !s.is_terminal(),
            _ => false,
        }
    }

    /// Terminal state for a failed job
    pub fn from_error(err: &MediaError) -> JobState {
        match err {
            MediaError::SizeExceeded { .. }
            | MediaError::JobInProgress
            | MediaError::QuotaExceeded(_) => JobState::Rejected(err.to_string()),
            _ => JobState::Failed(err.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaJob {
    pub id: u64,
    pub requester: UserId,
    pub chat_id: ChatId,
    pub source: MediaSource,
    pub target_format: TargetFormat,
    pub size_limit_bytes: u64,
    state: JobState,
}

impl MediaJob {
    pub fn new(
        id: u64,
        requester: UserId,
        chat_id: ChatId,
        source: MediaSource,
        target_format: TargetFormat,
        size_limit_bytes: u64,
    ) -> Self {
        Self {
            id,
            requester,
            chat_id,
            source,
            target_format,
            size_limit_bytes,
            state: JobState::Queued,
        }
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    /// Move to `next`; illegal transitions are logged and ignored
    pub fn advance(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(&next) {
            log::warn!(
                "⚠️  Media job {} ignored transition {:?} -> {:?}",
                self.id,
                self.state,
                next
            );
            return false;
        }
        log::debug!("Media job {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
        true
    }
}

/// Final report of a finished job
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: u64,
    pub state: JobState,
    /// Bytes delivered, set when `state == Sent`
    pub delivered_bytes: Option<u64>,
    pub kind: Option<MediaKind>,
    pub error: Option<MediaError>,
}
