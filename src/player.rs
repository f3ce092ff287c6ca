// ABOUTME: Narrow media-queue engine interface (external job engine).
// ABOUTME: Defines the MediaPlayer trait, track/queue handles, and the player event stream.

use anyhow::Result;
use async_trait::async_trait;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio_stream::Stream;

use crate::platform::{ChatMessage, ChatUser};

/// A track resolved by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    /// Source URL of the media.
    pub url: String,
    /// Human-readable title.
    pub title: String,
}

impl Track {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }
}

/// Node options passed to the engine when starting playback.
#[derive(Debug, Clone)]
pub struct PlayOptions {
    pub volume: u8,
    pub leave_on_empty_cooldown_ms: u64,
    pub leave_on_end_cooldown_ms: u64,
}

/// Mutable bag the bot stashes per-queue bookkeeping in.
///
/// The engine creates it empty; the play command records who asked and which
/// reply message anchors the comment session for the queued track.
#[derive(Debug, Default)]
pub struct QueueMetadata {
    pub requested_by: Option<ChatUser>,
    pub enqueued_message: Option<ChatMessage>,
}

/// Cheap handle onto one room's playback queue.
#[derive(Clone)]
pub struct QueueRef {
    /// Room the queue belongs to.
    pub guild_id: String,
    /// Voice channel the queue plays into.
    pub channel_id: String,
    metadata: Arc<Mutex<QueueMetadata>>,
}

impl QueueRef {
    pub fn new(guild_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            channel_id: channel_id.into(),
            metadata: Arc::new(Mutex::new(QueueMetadata::default())),
        }
    }

    pub fn set_requested_by(&self, user: ChatUser) {
        if let Ok(mut meta) = self.metadata.lock() {
            meta.requested_by = Some(user);
        }
    }

    pub fn requested_by(&self) -> Option<ChatUser> {
        self.metadata.lock().ok().and_then(|m| m.requested_by.clone())
    }

    pub fn set_enqueued_message(&self, message: ChatMessage) {
        if let Ok(mut meta) = self.metadata.lock() {
            meta.enqueued_message = Some(message);
        }
    }

    pub fn enqueued_message(&self) -> Option<ChatMessage> {
        self.metadata
            .lock()
            .ok()
            .and_then(|m| m.enqueued_message.clone())
    }
}

/// Track lifecycle events emitted by the engine.
#[derive(Clone)]
pub enum PlayerEvent {
    /// A track started playing on a queue.
    TrackStart { queue: QueueRef, track: Track },
    /// A track finished normally.
    TrackFinish { queue: QueueRef, track: Track },
    /// The engine reported a playback error.
    PlayerError { queue: QueueRef, message: String },
    /// The queue ran out of tracks.
    QueueEmpty { queue: QueueRef },
    /// The queue was torn down.
    QueueDelete { queue: QueueRef },
}

impl PlayerEvent {
    /// Room the event originated from.
    pub fn guild_id(&self) -> &str {
        match self {
            Self::TrackStart { queue, .. } => &queue.guild_id,
            Self::TrackFinish { queue, .. } => &queue.guild_id,
            Self::PlayerError { queue, .. } => &queue.guild_id,
            Self::QueueEmpty { queue } => &queue.guild_id,
            Self::QueueDelete { queue } => &queue.guild_id,
        }
    }
}

/// Stream of player events produced by an engine.
pub type PlayerEventStream = Pin<Box<dyn Stream<Item = PlayerEvent> + Send>>;

/// The engine surface the music features depend on.
///
/// No in-tree implementation exists; deployments inject one and tests use
/// mocks. The bot runs degraded (player handlers skipped) without it.
#[async_trait]
pub trait MediaPlayer: Send + Sync {
    /// Resolve `query` and start or enqueue playback in a voice channel.
    async fn play(
        &self,
        guild_id: &str,
        voice_channel_id: &str,
        query: &str,
        options: PlayOptions,
    ) -> Result<Track>;

    /// Handle onto the room's queue, if one exists.
    fn queue(&self, guild_id: &str) -> Option<QueueRef>;

    /// Whether the room's queue is currently audible.
    fn is_playing(&self, guild_id: &str) -> bool;

    /// Track currently playing in the room, if any.
    fn current_track(&self, guild_id: &str) -> Option<Track>;

    async fn pause(&self, guild_id: &str) -> Result<()>;

    async fn resume(&self, guild_id: &str) -> Result<()>;

    /// Skip the current track, advancing the queue.
    async fn skip(&self, guild_id: &str) -> Result<()>;

    /// Stop playback and clear the room's queue.
    async fn stop(&self, guild_id: &str) -> Result<()>;

    /// Stream of lifecycle events. May be taken once; subsequent calls error.
    fn event_stream(&self) -> Result<PlayerEventStream>;
}
