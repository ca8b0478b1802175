//! Fetch → (convert) → upload, one job per request
//!
//! - Every job gets a private temporary directory that is removed when the
//!   job ends, whatever the outcome.
//! - A semaphore caps concurrently running jobs; a requester may only have
//!   one job in flight.
//! - Each job consumes one download quota unit, refunded if the job fails.

use super::bounded::copy_bounded;
use super::fetcher::Fetcher;
use super::transcoder::Transcoder;
use super::types::{
    JobOutcome, JobState, MediaError, MediaJob, MediaLimits, MediaSource, TargetFormat,
    TimeoutStage,
};
use crate::clock::Clock;
use crate::platform::{OutgoingMedia, PlatformClient, UploadSource};
use crate::relay::{QuotaKind, QuotaTracker};
use crate::types::{ChatId, MediaKind, UserId};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::time::timeout;

pub struct MediaPipeline {
    fetcher: Arc<dyn Fetcher>,
    transcoder: Arc<dyn Transcoder>,
    platform: Arc<dyn PlatformClient>,
    quotas: Arc<QuotaTracker>,
    clock: Arc<dyn Clock>,
    limits: MediaLimits,
    permits: Semaphore,
    active: Mutex<HashSet<UserId>>,
    next_id: AtomicU64,
    scratch_dir: Option<PathBuf>,
}

/// Releases the requester's in-flight slot when the job ends
struct ActiveSlot<'a> {
    active: &'a Mutex<HashSet<UserId>>,
    user: UserId,
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        active.remove(&self.user);
    }
}

struct Delivered {
    bytes: u64,
    kind: MediaKind,
}

impl MediaPipeline {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        transcoder: Arc<dyn Transcoder>,
        platform: Arc<dyn PlatformClient>,
        quotas: Arc<QuotaTracker>,
        clock: Arc<dyn Clock>,
        limits: MediaLimits,
    ) -> Self {
        Self {
            fetcher,
            transcoder,
            platform,
            quotas,
            clock,
            permits: Semaphore::new(limits.max_concurrent_jobs.max(1)),
            limits,
            active: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(1),
            scratch_dir: None,
        }
    }

    /// Create job directories under `dir` instead of the system temp dir
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn limits(&self) -> &MediaLimits {
        &self.limits
    }

    pub fn quotas(&self) -> &QuotaTracker {
        &self.quotas
    }

    fn claim_slot(&self, user: UserId) -> Option<ActiveSlot<'_>> {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        if !active.insert(user) {
            return None;
        }
        Some(ActiveSlot {
            active: &self.active,
            user,
        })
    }

    /// Run one job to a terminal state and tell the requester how it went
    pub async fn process(
        &self,
        requester: UserId,
        chat_id: ChatId,
        source: MediaSource,
        target_format: TargetFormat,
    ) -> JobOutcome {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut job = MediaJob::new(
            id,
            requester,
            chat_id,
            source,
            target_format,
            self.limits.size_limit_bytes,
        );

        match self.run(&mut job).await {
            Ok(delivered) => {
                job.advance(JobState::Sent);
                log::info!(
                    "✅ Media job {} sent {} bytes to chat {}",
                    id,
                    delivered.bytes,
                    chat_id
                );
                JobOutcome {
                    job_id: id,
                    state: job.state().clone(),
                    delivered_bytes: Some(delivered.bytes),
                    kind: Some(delivered.kind),
                    error: None,
                }
            }
            Err(err) => {
                job.advance(JobState::from_error(&err));
                log::warn!("⚠️  Media job {} for user {}: {}", id, requester, err);
                if let Err(e) = self.platform.send_message(chat_id, &err.user_message()).await {
                    log::warn!("⚠️  Media failure reply not sent: {}", e);
                }
                JobOutcome {
                    job_id: id,
                    state: job.state().clone(),
                    delivered_bytes: None,
                    kind: None,
                    error: Some(err),
                }
            }
        }
    }

    async fn run(&self, job: &mut MediaJob) -> Result<Delivered, MediaError> {
        let _slot = self
            .claim_slot(job.requester)
            .ok_or(MediaError::JobInProgress)?;

        self.quotas
            .try_consume(job.requester, QuotaKind::Download, self.clock.now())?;

        let result = self.run_admitted(job).await;
        if result.is_err() {
            self.quotas.refund(job.requester, QuotaKind::Download);
        }
        result
    }

    async fn run_admitted(&self, job: &mut MediaJob) -> Result<Delivered, MediaError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| MediaError::Io("media pipeline is shut down".to_string()))?;

        let workdir = self.job_dir(job.id)?;
        job.advance(JobState::Fetching);

        let url = match &job.source {
            MediaSource::Url(url) => url.clone(),
            MediaSource::PlatformFile(file_ref) => self
                .platform
                .resolve_file_url(file_ref)
                .await
                .map_err(|e| MediaError::UnreachableSource(e.to_string()))?,
        };

        let (mut path, mut kind) = timeout(
            self.limits.fetch_timeout,
            self.fetch_into(&url, workdir.path(), job.size_limit_bytes),
        )
        .await
        .map_err(|_| MediaError::Timeout(TimeoutStage::Fetch))??;

        if job.target_format == TargetFormat::Audio && !kind.is_audio() {
            job.advance(JobState::Converting);
            let converted = timeout(
                self.limits.convert_timeout,
                self.transcoder
                    .transcode(&path, TargetFormat::Audio, workdir.path()),
            )
            .await
            .map_err(|_| MediaError::Timeout(TimeoutStage::Convert))??;

            if converted != path {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    log::debug!("Source {} not removed after conversion: {}", path.display(), e);
                }
            }
            path = converted;
            kind = MediaKind::Audio;
        }

        let bytes = tokio::fs::metadata(&path).await?.len();
        if bytes > job.size_limit_bytes {
            return Err(MediaError::SizeExceeded {
                limit: job.size_limit_bytes,
                observed: bytes,
            });
        }

        job.advance(JobState::ReadyToSend);
        let media = OutgoingMedia {
            kind,
            source: UploadSource::File(path),
            caption: None,
        };
        self.platform
            .upload_media(job.chat_id, &media)
            .await
            .map_err(|e| MediaError::DeliveryFailure(e.to_string()))?;

        Ok(Delivered { bytes, kind })
    }

    fn job_dir(&self, id: u64) -> Result<tempfile::TempDir, MediaError> {
        let mut builder = tempfile::Builder::new();
        let prefix = format!("media-job-{}-", id);
        builder.prefix(&prefix);
        let dir = match &self.scratch_dir {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    async fn fetch_into(
        &self,
        url: &str,
        workdir: &Path,
        limit: u64,
    ) -> Result<(PathBuf, MediaKind), MediaError> {
        let mut stream = self.fetcher.fetch(url).await?;

        let extension = stream
            .file_name()
            .as_deref()
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .filter(|ext| ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(|ext| ext.to_ascii_lowercase());
        let kind = stream
            .content_type()
            .as_deref()
            .and_then(MediaKind::from_content_type)
            .or_else(|| extension.as_deref().map(MediaKind::from_extension))
            .unwrap_or(MediaKind::Document);

        let path = match extension {
            Some(ext) => workdir.join(format!("source.{}", ext)),
            None => workdir.join("source"),
        };
        copy_bounded(stream.as_mut(), &path, limit).await?;
        Ok((path, kind))
    }
}
