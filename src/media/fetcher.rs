//! Streamed fetching of remote media

use super::types::MediaError;
use async_trait::async_trait;
use std::time::Duration;

/// A response body consumed chunk by chunk
#[async_trait]
pub trait ByteStream: Send {
    /// Next chunk, `None` at end of stream
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, MediaError>;

    /// Length announced by the source, if any
    fn content_length(&self) -> Option<u64>;

    fn content_type(&self) -> Option<String>;

    /// File name suggested by the source (last path segment)
    fn file_name(&self) -> Option<String>;
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Box<dyn ByteStream>, MediaError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// `connect_timeout` bounds connection setup only; the pipeline bounds
    /// the whole fetch.
    pub fn new(connect_timeout: Duration) -> Result<Self, MediaError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| MediaError::UnreachableSource(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Box<dyn ByteStream>, MediaError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MediaError::UnreachableSource(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MediaError::UnreachableSource(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let file_name = response
            .url()
            .path_segments()
            .and_then(|segments| segments.last())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        Ok(Box::new(HttpStream {
            content_length: response.content_length(),
            content_type,
            file_name,
            response,
        }))
    }
}

struct HttpStream {
    response: reqwest::Response,
    content_length: Option<u64>,
    content_type: Option<String>,
    file_name: Option<String>,
}

#[async_trait]
impl ByteStream for HttpStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, MediaError> {
        self.response
            .chunk()
            .await
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .map_err(|e| MediaError::UnreachableSource(e.to_string()))
    }

    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    fn content_type(&self) -> Option<String> {
        self.content_type.clone()
    }

    fn file_name(&self) -> Option<String> {
        self.file_name.clone()
    }
}
