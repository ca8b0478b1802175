//! Size-bounded consumer
//!
//! Pulls chunks from a `ByteStream` into a file and stops pulling the moment
//! the running total passes the ceiling. The caller owns the file's directory
//! and removes it on failure.

use super::fetcher::ByteStream;
use super::types::MediaError;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Copy `stream` into `dest`, returning the number of bytes written
pub async fn copy_bounded(
    stream: &mut dyn ByteStream,
    dest: &Path,
    limit: u64,
) -> Result<u64, MediaError> {
    if let Some(declared) = stream.content_length() {
        if declared > limit {
            return Err(MediaError::SizeExceeded {
                limit,
                observed: declared,
            });
        }
    }

    let mut file = tokio::fs::File::create(dest).await?;
    let mut total: u64 = 0;

    while let Some(chunk) = stream.next_chunk().await? {
        total += chunk.len() as u64;
        if total > limit {
            return Err(MediaError::SizeExceeded {
                limit,
                observed: total,
            });
        }
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ChunkedStream;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_copies_within_limit() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let mut stream = ChunkedStream::new(vec![vec![1u8; 4], vec![2u8; 4]]);

        let written = copy_bounded(&mut stream, &dest, 8).await.unwrap();
        assert_eq!(written, 8);
        assert_eq!(std::fs::read(&dest).unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_declared_length_rejects_before_reading() {
        let dir = tempdir().unwrap();
        let mut stream = ChunkedStream::new(vec![vec![0u8; 4]]).with_declared_length(100);
        let pulls = stream.pull_counter();

        let err = copy_bounded(&mut stream, &dir.path().join("x"), 50).await.unwrap_err();
        assert!(matches!(err, MediaError::SizeExceeded { observed: 100, .. }));
        assert_eq!(pulls.get(), 0);
    }

    #[tokio::test]
    async fn test_stops_pulling_once_limit_passed() {
        let dir = tempdir().unwrap();
        let chunks = (0..10).map(|_| vec![0u8; 10]).collect();
        let mut stream = ChunkedStream::new(chunks);
        let pulls = stream.pull_counter();

        let err = copy_bounded(&mut stream, &dir.path().join("x"), 25).await.unwrap_err();
        assert!(matches!(err, MediaError::SizeExceeded { limit: 25, observed: 30 }));
        assert_eq!(pulls.get(), 3);
    }
}
