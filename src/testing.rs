//! Test helpers shared by unit and integration tests
//!
//! Recording and scripted implementations of the collaborator traits, plus a
//! controllable clock and message builders.

use crate::clock::Clock;
use crate::media::{ByteStream, Fetcher, MediaError, TargetFormat, Transcoder};
use crate::platform::{OutgoingMedia, PlatformClient, PlatformError};
use crate::types::{ChatId, InboundMessage, MessageId, Sender, UserId};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct FixedClock {
    now: AtomicI64,
}

impl FixedClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

pub fn sender(id: UserId, first_name: &str) -> Sender {
    Sender {
        id,
        handle: None,
        first_name: first_name.to_string(),
        is_bot: false,
    }
}

pub fn group_message(chat_id: ChatId, message_id: MessageId, user_id: UserId, text: &str) -> InboundMessage {
    InboundMessage {
        chat_id,
        message_id,
        sender: sender(user_id, &format!("user{}", user_id)),
        text: Some(text.to_string()),
        caption: None,
        link_targets: Vec::new(),
        attachment: None,
    }
}

/// Private chats share their id with the user
pub fn private_message(user_id: UserId, message_id: MessageId, text: &str) -> InboundMessage {
    group_message(user_id, message_id, user_id, text)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    Send { chat_id: ChatId, text: String },
    Delete { chat_id: ChatId, message_id: MessageId },
    Restrict { chat_id: ChatId, user_id: UserId, until: i64 },
    Unrestrict { chat_id: ChatId, user_id: UserId },
    Upload { chat_id: ChatId, media: OutgoingMedia },
}

/// Records every call; individual operations can be made to fail
#[derive(Debug, Default)]
pub struct RecordingPlatform {
    calls: Mutex<Vec<PlatformCall>>,
    admins: Mutex<HashSet<(ChatId, UserId)>>,
    failing_send_chats: Mutex<HashSet<ChatId>>,
    fail_restrict: AtomicBool,
    fail_unrestrict: AtomicBool,
    fail_delete: AtomicBool,
    fail_upload: AtomicBool,
    send_delay_ms: AtomicU64,
    next_message_id: AtomicI64,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn record(&self, call: PlatformCall) {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).push(call);
    }

    fn next_id(&self) -> MessageId {
        self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Texts successfully sent to `chat_id`, in order
    pub fn sent_to(&self, chat_id: ChatId) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PlatformCall::Send { chat_id: c, text } if c == chat_id => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn uploads_to(&self, chat_id: ChatId) -> Vec<OutgoingMedia> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PlatformCall::Upload { chat_id: c, media } if c == chat_id => Some(media),
                _ => None,
            })
            .collect()
    }

    pub fn restrict_count(&self, chat_id: ChatId, user_id: UserId) -> usize {
        self.calls()
            .iter()
            .filter(|c| {
                matches!(c, PlatformCall::Restrict { chat_id: ch, user_id: u, .. } if *ch == chat_id && *u == user_id)
            })
            .count()
    }

    pub fn unrestrict_count(&self, chat_id: ChatId, user_id: UserId) -> usize {
        self.calls()
            .iter()
            .filter(|c| **c == PlatformCall::Unrestrict { chat_id, user_id })
            .count()
    }

    pub fn set_admin(&self, chat_id: ChatId, user_id: UserId) {
        self.admins.lock().unwrap_or_else(|p| p.into_inner()).insert((chat_id, user_id));
    }

    pub fn fail_send_to(&self, chat_id: ChatId) {
        self.failing_send_chats.lock().unwrap_or_else(|p| p.into_inner()).insert(chat_id);
    }

    /// Every `send_message` sleeps this long before completing
    pub fn set_send_delay(&self, delay: Duration) {
        self.send_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_restrict(&self, fail: bool) {
        self.fail_restrict.store(fail, Ordering::SeqCst);
    }

    pub fn fail_unrestrict(&self, fail: bool) {
        self.fail_unrestrict.store(fail, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn fail_upload(&self, fail: bool) {
        self.fail_upload.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PlatformClient for RecordingPlatform {
    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<MessageId, PlatformError> {
        let delay = self.send_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing_send_chats.lock().unwrap_or_else(|p| p.into_inner()).contains(&chat_id) {
            return Err(PlatformError::Rejected(format!("chat {} unavailable", chat_id)));
        }
        self.record(PlatformCall::Send {
            chat_id,
            text: text.to_string(),
        });
        Ok(self.next_id())
    }

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), PlatformError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(PlatformError::Rejected("cannot delete".to_string()));
        }
        self.record(PlatformCall::Delete { chat_id, message_id });
        Ok(())
    }

    async fn restrict_user(&self, chat_id: ChatId, user_id: UserId, until: i64) -> Result<(), PlatformError> {
        if self.fail_restrict.load(Ordering::SeqCst) {
            return Err(PlatformError::Network("restrict timed out".to_string()));
        }
        self.record(PlatformCall::Restrict {
            chat_id,
            user_id,
            until,
        });
        Ok(())
    }

    async fn unrestrict_user(&self, chat_id: ChatId, user_id: UserId) -> Result<(), PlatformError> {
        if self.fail_unrestrict.load(Ordering::SeqCst) {
            return Err(PlatformError::Network("unrestrict timed out".to_string()));
        }
        self.record(PlatformCall::Unrestrict { chat_id, user_id });
        Ok(())
    }

    async fn upload_media(&self, chat_id: ChatId, media: &OutgoingMedia) -> Result<MessageId, PlatformError> {
        if self.fail_upload.load(Ordering::SeqCst) || self.failing_send_chats.lock().unwrap_or_else(|p| p.into_inner()).contains(&chat_id) {
            return Err(PlatformError::Rejected("upload refused".to_string()));
        }
        self.record(PlatformCall::Upload {
            chat_id,
            media: media.clone(),
        });
        Ok(self.next_id())
    }

    async fn is_chat_admin(&self, chat_id: ChatId, user_id: UserId) -> Result<bool, PlatformError> {
        Ok(self.admins.lock().unwrap_or_else(|p| p.into_inner()).contains(&(chat_id, user_id)))
    }

    async fn resolve_file_url(&self, file_ref: &str) -> Result<String, PlatformError> {
        Ok(format!("https://files.example/{}", file_ref))
    }
}

/// Shared counter handed out by the fakes below
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory byte stream; the declared length is optional and may lie
pub struct ChunkedStream {
    chunks: VecDeque<Vec<u8>>,
    declared_length: Option<u64>,
    content_type: Option<String>,
    file_name: Option<String>,
    chunk_delay: Option<Duration>,
    pulls: Counter,
}

impl ChunkedStream {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into(),
            declared_length: None,
            content_type: None,
            file_name: None,
            chunk_delay: None,
            pulls: Counter::default(),
        }
    }

    pub fn with_declared_length(mut self, length: u64) -> Self {
        self.declared_length = Some(length);
        self
    }

    /// Counts calls to `next_chunk`
    pub fn pull_counter(&self) -> Counter {
        self.pulls.clone()
    }
}

#[async_trait]
impl ByteStream for ChunkedStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, MediaError> {
        self.pulls.bump();
        if let Some(delay) = self.chunk_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.chunks.pop_front())
    }

    fn content_length(&self) -> Option<u64> {
        self.declared_length
    }

    fn content_type(&self) -> Option<String> {
        self.content_type.clone()
    }

    fn file_name(&self) -> Option<String> {
        self.file_name.clone()
    }
}

/// Serves the same scripted body for every URL
pub struct StaticFetcher {
    chunks: Vec<Vec<u8>>,
    declared_length: Option<u64>,
    content_type: Option<String>,
    file_name: Option<String>,
    chunk_delay: Option<Duration>,
    failure: Option<String>,
    pulls: Counter,
    requested: Arc<Mutex<Vec<String>>>,
}

impl StaticFetcher {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks,
            declared_length: None,
            content_type: None,
            file_name: None,
            chunk_delay: None,
            failure: None,
            pulls: Counter::default(),
            requested: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every fetch fails with `UnreachableSource`
    pub fn failing(reason: &str) -> Self {
        let mut fetcher = Self::new(Vec::new());
        fetcher.failure = Some(reason.to_string());
        fetcher
    }

    pub fn with_declared_length(mut self, length: u64) -> Self {
        self.declared_length = Some(length);
        self
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    pub fn with_file_name(mut self, name: &str) -> Self {
        self.file_name = Some(name.to_string());
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Chunk pulls summed over every stream handed out
    pub fn pull_counter(&self) -> Counter {
        self.pulls.clone()
    }

    pub fn requested_urls(&self) -> Arc<Mutex<Vec<String>>> {
        self.requested.clone()
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<Box<dyn ByteStream>, MediaError> {
        self.requested.lock().unwrap_or_else(|p| p.into_inner()).push(url.to_string());
        if let Some(reason) = &self.failure {
            return Err(MediaError::UnreachableSource(reason.clone()));
        }
        Ok(Box::new(ChunkedStream {
            chunks: self.chunks.clone().into(),
            declared_length: self.declared_length,
            content_type: self.content_type.clone(),
            file_name: self.file_name.clone(),
            chunk_delay: self.chunk_delay,
            pulls: self.pulls.clone(),
        }))
    }
}

#[derive(Debug, Clone, Copy)]
enum TranscodeMode {
    Succeed { output_bytes: usize },
    Fail,
    Hang,
}

/// Scripted transcoder that writes a file of a chosen size
pub struct FakeTranscoder {
    mode: TranscodeMode,
    calls: Counter,
}

impl FakeTranscoder {
    pub fn succeed(output_bytes: usize) -> Self {
        Self {
            mode: TranscodeMode::Succeed { output_bytes },
            calls: Counter::default(),
        }
    }

    pub fn fail() -> Self {
        Self {
            mode: TranscodeMode::Fail,
            calls: Counter::default(),
        }
    }

    /// Never finishes; exercises the conversion timeout
    pub fn hang() -> Self {
        Self {
            mode: TranscodeMode::Hang,
            calls: Counter::default(),
        }
    }

    pub fn call_counter(&self) -> Counter {
        self.calls.clone()
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(&self, _input: &Path, _target: TargetFormat, workdir: &Path) -> Result<PathBuf, MediaError> {
        self.calls.bump();
        match self.mode {
            TranscodeMode::Succeed { output_bytes } => {
                let output = workdir.join("converted.mp3");
                tokio::fs::write(&output, vec![0u8; output_bytes]).await?;
                Ok(output)
            }
            TranscodeMode::Fail => Err(MediaError::ConversionError("scripted failure".to_string())),
            TranscodeMode::Hang => {
                std::future::pending::<()>().await;
                Err(MediaError::ConversionError("unreachable".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_moves_only_when_told() {
        let clock = FixedClock::new(100);
        assert_eq!(clock.now(), 100);
        clock.advance(20);
        assert_eq!(clock.now(), 120);
        clock.set(5);
        assert_eq!(clock.now(), 5);
    }

    #[tokio::test]
    async fn test_recording_platform_failure_switches() {
        let platform = RecordingPlatform::new();
        platform.fail_send_to(-1);
        assert!(platform.send_message(-1, "x").await.is_err());
        assert!(platform.send_message(-2, "y").await.is_ok());
        assert_eq!(platform.sent_to(-2), vec!["y"]);
    }
}
