//! Media ingestion
//!
//! - `fetcher` - streamed HTTP download behind the `Fetcher` seam
//! - `bounded` - size-capped consumer that aborts oversized streams
//! - `transcoder` - audio extraction behind the `Transcoder` seam
//! - `pipeline` - job state machine, concurrency and timeouts

pub mod bounded;
pub mod fetcher;
pub mod pipeline;
pub mod transcoder;
pub mod types;

pub use fetcher::{ByteStream, Fetcher, HttpFetcher};
pub use pipeline::MediaPipeline;
pub use transcoder::{FfmpegTranscoder, Transcoder};
pub use types::{
    JobOutcome, JobState, MediaError, MediaJob, MediaLimits, MediaSource, TargetFormat,
    TimeoutStage, DEFAULT_SIZE_LIMIT_BYTES,
};
