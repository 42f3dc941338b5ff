//! Channel ingestion, independent of the MTProto client.
//!
//! The adapter turns raw updates into [`IncomingPost`]s; [`ChannelListener`]
//! decides which ones are monitored channel posts and hands them to a
//! [`MessageSink`].

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    errors::Error,
    pipeline::{OutcomeStatus, ProcessingPipeline},
    ports::MessageSink,
    schemas::{ChannelConfig, TelegramMessage},
    Result,
};

const BOT_API_CHANNEL_OFFSET: i64 = 1_000_000_000_000;

/// Delay between history fetches for different channels.
pub const BACKFILL_PAUSE: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatKind {
    Channel,
    Group,
    User,
}

/// A new message as seen by the user client.
#[derive(Clone, Debug)]
pub struct IncomingPost {
    pub kind: ChatKind,
    pub chat_id: i64,
    pub chat_name: String,
    pub message_id: i64,
    pub text: String,
    pub date: DateTime<Utc>,
    pub media_type: Option<String>,
    pub reply_to: Option<i64>,
}

/// Why a post was or was not forwarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Delivered,
    NotChannel,
    NotMonitored,
    Disabled,
    NoText,
    SinkFailed,
}

/// Map the MTProto (`1177174722`) and Bot API (`-1001177174722`) forms of a
/// channel id to the same value.
pub fn normalize_channel_id(id: i64) -> i64 {
    let abs = id.unsigned_abs() as i64;
    if abs > BOT_API_CHANNEL_OFFSET {
        abs - BOT_API_CHANNEL_OFFSET
    } else {
        abs
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListenerStats {
    pub received: u64,
    pub processed: u64,
    pub errors: u64,
    pub started_at: Option<DateTime<Utc>>,
}

pub struct ChannelListener {
    channels: Vec<ChannelConfig>,
    sink: Arc<dyn MessageSink>,
    received: AtomicU64,
    processed: AtomicU64,
    errors: AtomicU64,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

impl ChannelListener {
    pub fn new(channels: Vec<ChannelConfig>, sink: Arc<dyn MessageSink>) -> Self {
        for c in &channels {
            info!(channel = %c.channel_name, id = c.channel_id, enabled = c.enabled, "monitoring channel");
        }
        if channels.is_empty() {
            warn!("no channels configured for monitoring");
        }
        Self {
            channels,
            sink,
            received: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            started_at: Mutex::new(None),
        }
    }

    pub fn channels(&self) -> &[ChannelConfig] {
        &self.channels
    }

    /// The configured channel matching an id in either form.
    pub fn lookup(&self, chat_id: i64) -> Option<&ChannelConfig> {
        let wanted = normalize_channel_id(chat_id);
        self.channels
            .iter()
            .find(|c| normalize_channel_id(c.channel_id) == wanted)
    }

    pub fn mark_started(&self, at: DateTime<Utc>) {
        if let Ok(mut s) = self.started_at.lock() {
            *s = Some(at);
        }
    }

    pub async fn handle(&self, post: IncomingPost) -> Decision {
        info!(chat = %post.chat_name, id = post.chat_id, "incoming message");

        if post.kind != ChatKind::Channel {
            debug!(chat = %post.chat_name, kind = ?post.kind, "skipping: not a channel");
            return Decision::NotChannel;
        }
        let Some(channel) = self.lookup(post.chat_id) else {
            debug!(chat = %post.chat_name, id = post.chat_id, "skipping: not monitored");
            return Decision::NotMonitored;
        };
        if !channel.enabled {
            return Decision::Disabled;
        }
        if post.text.trim().is_empty() {
            debug!(channel = %channel.channel_name, "skipping non-text message");
            return Decision::NoText;
        }

        self.received.fetch_add(1, Ordering::Relaxed);
        let msg = TelegramMessage {
            message_id: post.message_id,
            channel_id: channel.channel_id,
            channel_name: channel.channel_name.clone(),
            has_media: post.media_type.is_some(),
            media_type: post.media_type,
            reply_to_message_id: post.reply_to,
            timestamp: post.date,
            text: post.text,
        };
        info!(
            channel = %msg.channel_name,
            message_id = msg.message_id,
            chars = msg.text.chars().count(),
            "new channel message"
        );

        match self.sink.deliver(msg).await {
            Ok(()) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
                Decision::Delivered
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                error!("failed to deliver channel message: {e}");
                Decision::SinkFailed
            }
        }
    }

    /// Feed history through the live path, oldest first. Returns how many were delivered.
    pub async fn backfill(&self, mut posts: Vec<IncomingPost>) -> usize {
        posts.sort_by_key(|p| (p.date, p.message_id));
        let mut delivered = 0;
        for post in posts {
            if self.handle(post).await == Decision::Delivered {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn stats(&self) -> ListenerStats {
        ListenerStats {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            started_at: self.started_at.lock().ok().and_then(|s| *s),
        }
    }

    pub fn log_summary(&self) {
        let s = self.stats();
        let runtime = s
            .started_at
            .map(|t| format_runtime(Utc::now() - t))
            .unwrap_or_else(|| "n/a".to_string());
        info!(
            received = s.received,
            processed = s.processed,
            errors = s.errors,
            runtime = %runtime,
            "listener stopped"
        );
    }
}

fn format_runtime(d: chrono::Duration) -> String {
    let secs = d.num_seconds().max(0);
    format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Console rendering used by listener-only mode.
pub fn format_for_console(msg: &TelegramMessage) -> String {
    let rule = "=".repeat(80);
    format!(
        "\n{rule}\n🚨 INCOMING MESSAGE FROM: {}\n   Timestamp: {}\n   Message ID: {}\n{}\n📝 TEXT:\n{}\n{rule}\n",
        msg.channel_name,
        msg.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        msg.message_id,
        "-".repeat(80),
        msg.text,
    )
}

/// Prints each message to stdout without processing it.
pub struct ConsoleSink;

#[async_trait]
impl MessageSink for ConsoleSink {
    async fn deliver(&self, message: TelegramMessage) -> Result<()> {
        println!("{}", format_for_console(&message));
        Ok(())
    }
}

/// Hands messages to the processing worker over a bounded channel.
pub struct QueueSink {
    tx: mpsc::Sender<TelegramMessage>,
}

impl QueueSink {
    pub fn new(tx: mpsc::Sender<TelegramMessage>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl MessageSink for QueueSink {
    async fn deliver(&self, message: TelegramMessage) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| Error::External("processing queue closed".to_string()))
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkerSummary {
    pub stored: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub failed: usize,
}

/// Process queued messages one at a time until every sender is dropped.
pub async fn run_processing_worker(
    mut rx: mpsc::Receiver<TelegramMessage>,
    pipeline: Arc<ProcessingPipeline>,
) -> WorkerSummary {
    let mut summary = WorkerSummary::default();
    while let Some(msg) = rx.recv().await {
        info!(message_id = msg.message_id, channel = %msg.channel_name, "processing message");
        let out = pipeline.process_message(&msg).await;
        match out.status {
            OutcomeStatus::Stored => {
                summary.stored += 1;
                let preview: String = out.summary.chars().take(50).collect();
                info!(
                    event_type = out.event_type.map(|t| t.as_str()).unwrap_or("unknown"),
                    "stored: {preview}"
                );
            }
            OutcomeStatus::Skipped => summary.skipped += 1,
            OutcomeStatus::Duplicate => summary.duplicates += 1,
            OutcomeStatus::Failed => {
                summary.failed += 1;
                warn!(
                    message_id = msg.message_id,
                    "failed to process message: {}",
                    out.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
    info!(
        stored = summary.stored,
        skipped = summary.skipped,
        duplicates = summary.duplicates,
        failed = summary.failed,
        "processing worker drained"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        geocoder::Geocoder,
        schemas::default_channels,
        store::IncidentStore,
        testing::{channel_message, FakeEmbedder, FakeModel, FakeSink},
    };

    fn post(chat_id: i64, message_id: i64, text: &str) -> IncomingPost {
        IncomingPost {
            kind: ChatKind::Channel,
            chat_id,
            chat_name: "chan".to_string(),
            message_id,
            text: text.to_string(),
            date: Utc::now(),
            media_type: None,
            reply_to: None,
        }
    }

    #[test]
    fn normalizes_both_id_forms() {
        assert_eq!(normalize_channel_id(-1001277927787), 1277927787);
        assert_eq!(normalize_channel_id(1277927787), 1277927787);
        assert_eq!(normalize_channel_id(1001277927787), 1277927787);
        assert_eq!(normalize_channel_id(-42), 42);
    }

    #[tokio::test]
    async fn filters_and_counts() {
        let sink = Arc::new(FakeSink::default());
        let mut channels = default_channels();
        channels[1].enabled = false;
        let l = ChannelListener::new(channels, sink.clone());

        let mut group = post(1277927787, 1, "hi");
        group.kind = ChatKind::Group;
        assert_eq!(l.handle(group).await, Decision::NotChannel);
        assert_eq!(l.handle(post(999, 2, "x")).await, Decision::NotMonitored);
        assert_eq!(l.handle(post(1352866222, 3, "x")).await, Decision::Disabled);
        assert_eq!(l.handle(post(1277927787, 4, "")).await, Decision::NoText);

        let mut p = post(1277927787, 5, "ירי בלוד");
        p.media_type = Some("photo".to_string());
        p.reply_to = Some(4);
        assert_eq!(l.handle(p).await, Decision::Delivered);

        let got = sink.delivered();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].channel_id, -1001277927787);
        assert_eq!(got[0].channel_name, "Amar Assadi News");
        assert!(got[0].has_media);
        assert_eq!(got[0].reply_to_message_id, Some(4));

        let s = l.stats();
        assert_eq!((s.received, s.processed, s.errors), (1, 1, 0));
    }

    #[tokio::test]
    async fn sink_failures_count_as_errors() {
        let l = ChannelListener::new(default_channels(), Arc::new(FakeSink::failing()));
        assert_eq!(
            l.handle(post(-1001177174722, 1, "x")).await,
            Decision::SinkFailed
        );
        let s = l.stats();
        assert_eq!((s.received, s.processed, s.errors), (1, 0, 1));
    }

    #[tokio::test]
    async fn backfill_delivers_oldest_first() {
        let sink = Arc::new(FakeSink::default());
        let l = ChannelListener::new(default_channels(), sink.clone());
        let mut newer = post(1177174722, 2, "second");
        newer.date = Utc::now();
        let mut older = post(1177174722, 1, "first");
        older.date = newer.date - chrono::Duration::minutes(5);
        let empty = post(1177174722, 3, "");

        assert_eq!(l.backfill(vec![newer, empty, older]).await, 2);
        let texts: Vec<String> = sink.delivered().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn console_format() {
        let out = format_for_console(&channel_message(7, "hello"));
        assert!(out.contains("🚨 INCOMING MESSAGE FROM: Test Channel"));
        assert!(out.contains("   Message ID: 7"));
        assert!(out.contains("📝 TEXT:\nhello\n"));
    }

    #[tokio::test]
    async fn queue_feeds_worker_until_closed() {
        let model = FakeModel::new().respond_when(
            "MESSAGE:",
            r#"{"summary":"ירי בלוד","city":"Lod","event_type":"shooting","severity":6}"#,
        );
        let store = IncidentStore::open_in_memory("q", Arc::new(FakeEmbedder)).unwrap();
        let pipeline = Arc::new(ProcessingPipeline::new(
            Arc::new(model),
            Arc::new(Geocoder::offline()),
            Arc::new(store),
        ));

        let (tx, rx) = mpsc::channel(4);
        let worker = tokio::spawn(run_processing_worker(rx, pipeline.clone()));
        let sink = QueueSink::new(tx);
        sink.deliver(channel_message(1, "ירי בלוד")).await.unwrap();
        sink.deliver(channel_message(1, "ירי בלוד")).await.unwrap();
        drop(sink);

        let summary = worker.await.unwrap();
        assert_eq!(summary.stored, 1);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(pipeline.store().count().unwrap(), 1);
    }
}
