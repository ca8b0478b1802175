//! Format conversion through an external tool

use super::types::{MediaError, TargetFormat};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Convert `input` to `target`, writing the result inside `workdir`
    async fn transcode(
        &self,
        input: &Path,
        target: TargetFormat,
        workdir: &Path,
    ) -> Result<PathBuf, MediaError>;
}

/// Runs `ffmpeg`. The child is killed if the future is dropped, so a timeout
/// around `transcode` does not leave stray processes.
pub struct FfmpegTranscoder {
    program: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self::with_program("ffmpeg")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        target: TargetFormat,
        workdir: &Path,
    ) -> Result<PathBuf, MediaError> {
        let output = match target {
            TargetFormat::Audio => workdir.join("converted.mp3"),
            TargetFormat::Passthrough => return Ok(input.to_path_buf()),
        };

        let result = tokio::process::Command::new(&self.program)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-vn", "-acodec", "libmp3lame", "-b:a", "192k"])
            .arg(&output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| MediaError::ConversionError(format!("cannot run ffmpeg: {}", e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let last_line = stderr.lines().last().unwrap_or("").trim().to_string();
            return Err(MediaError::ConversionError(format!(
                "ffmpeg exited with {}: {}",
                result.status, last_line
            )));
        }

        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Err(MediaError::ConversionError(
                "ffmpeg produced no output".to_string(),
            ));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_binary_is_conversion_error() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.mp4");
        std::fs::write(&input, b"not really video").unwrap();

        let transcoder = FfmpegTranscoder::with_program(dir.path().join("no-such-ffmpeg"));
        let err = transcoder
            .transcode(&input, TargetFormat::Audio, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::ConversionError(_)));
    }

    #[tokio::test]
    async fn test_passthrough_returns_input() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.mp4");
        let out = FfmpegTranscoder::new()
            .transcode(&input, TargetFormat::Passthrough, dir.path())
            .await
            .unwrap();
        assert_eq!(out, input);
    }
}
