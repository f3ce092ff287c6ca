// ABOUTME: End-to-end tests for comment sessions: recording replies and
// ABOUTME: reactions during playback and replaying them on the next play.

use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use offbeat::config::Config;
use offbeat::features;
use offbeat::loader;
use offbeat::platform::{
    ChatClient, ChatMessage, ChatReaction, ChatUser, ClientEvent, ClientEventStream,
};
use offbeat::player::{
    MediaPlayer, PlayOptions, PlayerEvent, PlayerEventStream, QueueRef, Track,
};

const SPACER: &str = "\u{200B}";

// =============================================================================
// Mock chat client
// =============================================================================

struct MockChat {
    sent: Mutex<Vec<(String, String)>>,
    reactions: Mutex<Vec<(String, String)>>,
    created_threads: Mutex<Vec<(String, String)>>,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
}

impl MockChat {
    fn new() -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            reactions: Mutex::new(Vec::new()),
            created_threads: Mutex::new(Vec::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }

    fn push(&self, event: ClientEvent) {
        self.events_tx.send(event).unwrap();
    }

    /// Messages sent as (channel id, content) pairs.
    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// Reactions added as (message id, emoji) pairs.
    fn reactions(&self) -> Vec<(String, String)> {
        self.reactions.lock().unwrap().clone()
    }

    /// Threads created as (anchor message id, name) pairs.
    fn created_threads(&self) -> Vec<(String, String)> {
        self.created_threads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatClient for MockChat {
    fn platform_id(&self) -> &'static str {
        "mock"
    }

    async fn login(&self, _token: &str) -> Result<()> {
        Ok(())
    }

    fn event_stream(&self) -> Result<ClientEventStream> {
        let receiver = self
            .events_rx
            .lock()
            .unwrap()
            .take()
            .context("event stream already taken")?;
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    fn bot_user_id(&self) -> Option<String> {
        Some("bot-1".to_string())
    }

    async fn send_message(&self, channel_id: &str, content: &str) -> Result<ChatMessage> {
        self.sent
            .lock()
            .unwrap()
            .push((channel_id.to_string(), content.to_string()));
        Ok(ChatMessage::new(
            "sent",
            channel_id,
            ChatUser::new("bot-1"),
            content,
        ))
    }

    async fn reply(&self, to: &ChatMessage, content: &str) -> Result<ChatMessage> {
        Ok(ChatMessage::new(
            "sent",
            &to.channel_id,
            ChatUser::new("bot-1"),
            content,
        ))
    }

    async fn existing_thread(
        &self,
        _channel_id: &str,
        _message_id: &str,
    ) -> Result<Option<String>> {
        Ok(None)
    }

    async fn create_thread(
        &self,
        _channel_id: &str,
        message_id: &str,
        name: &str,
    ) -> Result<String> {
        self.created_threads
            .lock()
            .unwrap()
            .push((message_id.to_string(), name.to_string()));
        Ok(format!("thread-{}", message_id))
    }

    async fn add_reaction(&self, _channel_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        self.reactions
            .lock()
            .unwrap()
            .push((message_id.to_string(), emoji.to_string()));
        Ok(())
    }

    async fn start_typing(&self, _channel_id: &str) -> Result<()> {
        Ok(())
    }

    async fn set_activity(&self, _activity: Option<&str>) -> Result<()> {
        Ok(())
    }

    async fn voice_channel_of(&self, _guild_id: &str, _user_id: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

// =============================================================================
// Mock media engine
// =============================================================================

struct MockEngine {
    events_tx: mpsc::UnboundedSender<PlayerEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PlayerEvent>>>,
}

impl MockEngine {
    fn new() -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }

    fn push(&self, event: PlayerEvent) {
        self.events_tx.send(event).unwrap();
    }
}

#[async_trait]
impl MediaPlayer for MockEngine {
    async fn play(
        &self,
        _guild_id: &str,
        _voice_channel_id: &str,
        _query: &str,
        _options: PlayOptions,
    ) -> Result<Track> {
        bail!("tests drive the engine through events")
    }

    fn queue(&self, _guild_id: &str) -> Option<QueueRef> {
        None
    }

    fn is_playing(&self, _guild_id: &str) -> bool {
        false
    }

    fn current_track(&self, _guild_id: &str) -> Option<Track> {
        None
    }

    async fn pause(&self, _guild_id: &str) -> Result<()> {
        Ok(())
    }

    async fn resume(&self, _guild_id: &str) -> Result<()> {
        Ok(())
    }

    async fn skip(&self, _guild_id: &str) -> Result<()> {
        Ok(())
    }

    async fn stop(&self, _guild_id: &str) -> Result<()> {
        Ok(())
    }

    fn event_stream(&self) -> Result<PlayerEventStream> {
        let receiver = self
            .events_rx
            .lock()
            .unwrap()
            .take()
            .context("event stream already taken")?;
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }
}

// =============================================================================
// Helpers
// =============================================================================

struct Bot {
    chat: Arc<MockChat>,
    engine: Arc<MockEngine>,
    _db_dir: tempfile::TempDir,
}

async fn started_bot() -> Bot {
    let chat = MockChat::new();
    let engine = MockEngine::new();
    let db_dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.bot.token = "token".to_string();
    config.database.path = db_dir
        .path()
        .join("bot.db")
        .to_string_lossy()
        .into_owned();

    let manifest = features::manifest(
        Arc::clone(&chat) as Arc<dyn ChatClient>,
        Some(Arc::clone(&engine) as Arc<dyn MediaPlayer>),
        None,
    );
    loader::start(manifest, config).await.unwrap();

    Bot {
        chat,
        engine,
        _db_dir: db_dir,
    }
}

fn anchor_message(id: &str) -> ChatMessage {
    let mut message = ChatMessage::new(id, "chan", ChatUser::new("bot-1"), "💥 Enqueued");
    message.guild_id = Some("g1".to_string());
    message.author_is_bot = true;
    message
}

fn track_start(anchor_id: &str) -> PlayerEvent {
    let queue = QueueRef::new("g1", "voice-1");
    queue.set_enqueued_message(anchor_message(anchor_id));
    PlayerEvent::TrackStart {
        queue,
        track: Track::new("https://media.example/x", "Daft Punk"),
    }
}

fn reply_to(anchor_id: &str, id: &str, content: &str) -> ClientEvent {
    let mut message = ChatMessage::new(id, "chan", ChatUser::with_name("u1", "zen"), content);
    message.guild_id = Some("g1".to_string());
    message.replied_to = Some(anchor_id.to_string());
    ClientEvent::MessageCreate(message)
}

fn reaction_on(anchor_id: &str, emoji: &str) -> ClientEvent {
    ClientEvent::ReactionAdd {
        reaction: ChatReaction {
            message_id: anchor_id.to_string(),
            channel_id: "chan".to_string(),
            guild_id: Some("g1".to_string()),
            emoji: emoji.to_string(),
        },
        user: ChatUser::with_name("u2", "kay"),
        user_is_bot: false,
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

/// Let the router drain whatever was just pushed.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

// =============================================================================
// Record and replay
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_history_recorded_live_replays_on_the_next_play() {
    let bot = started_bot().await;

    // First play of the track opens a session on its enqueued message.
    bot.engine.push(track_start("anchor-1"));
    settle().await;

    // A reaction lands 5 seconds in, a reply 65 seconds in.
    tokio::time::advance(Duration::from_secs(5)).await;
    bot.chat.push(reaction_on("anchor-1", "🔥"));
    settle().await;

    tokio::time::advance(Duration::from_secs(60)).await;
    bot.chat.push(reply_to("anchor-1", "reply-1", "so good"));
    wait_until(|| !bot.chat.reactions().is_empty()).await;
    assert_eq!(
        bot.chat.reactions(),
        [("reply-1".to_string(), "💬".to_string())]
    );

    // Second play of the same track replays the stored timeline in a thread.
    bot.engine.push(track_start("anchor-2"));
    tokio::time::sleep(Duration::from_secs(70)).await;

    assert_eq!(
        bot.chat.created_threads(),
        [("anchor-2".to_string(), "Comments".to_string())]
    );

    let thread = "thread-anchor-2".to_string();
    assert_eq!(
        bot.chat.sent(),
        [
            (thread.clone(), SPACER.to_string()),
            (thread.clone(), "**⚡ REACTIONS TO DAFT PUNK:**".to_string()),
            (thread.clone(), SPACER.to_string()),
            (thread.clone(), "🔥 🔥  KAY  🔥 🔥".to_string()),
            (thread.clone(), SPACER.to_string()),
            (thread.clone(), "💬 **zen:** so good".to_string()),
            (thread, SPACER.to_string()),
        ]
    );

    // The replayed reaction is also re-applied to the new enqueued message.
    assert_eq!(
        bot.chat.reactions(),
        [
            ("reply-1".to_string(), "💬".to_string()),
            ("anchor-2".to_string(), "🔥".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_track_without_enqueued_message_opens_no_session() {
    let bot = started_bot().await;

    let queue = QueueRef::new("g1", "voice-1");
    bot.engine.push(PlayerEvent::TrackStart {
        queue,
        track: Track::new("https://media.example/x", "Daft Punk"),
    });
    settle().await;

    bot.chat.push(reply_to("anchor-1", "reply-1", "anyone here"));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(bot.chat.reactions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_queue_empty_ends_the_session() {
    let bot = started_bot().await;

    bot.engine.push(track_start("anchor-1"));
    settle().await;

    bot.engine.push(PlayerEvent::QueueEmpty {
        queue: QueueRef::new("g1", "voice-1"),
    });
    settle().await;

    bot.chat.push(reply_to("anchor-1", "reply-1", "too late"));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(bot.chat.reactions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_queue_delete_cancels_a_running_replay() {
    let bot = started_bot().await;

    // Record one comment a minute into the first play.
    bot.engine.push(track_start("anchor-1"));
    settle().await;
    tokio::time::advance(Duration::from_secs(60)).await;
    bot.chat.push(reply_to("anchor-1", "reply-1", "lost to the void"));
    wait_until(|| !bot.chat.reactions().is_empty()).await;

    // Start the replay, then tear the queue down before the comment is due.
    bot.engine.push(track_start("anchor-2"));
    tokio::time::sleep(Duration::from_secs(1)).await;
    bot.engine.push(PlayerEvent::QueueDelete {
        queue: QueueRef::new("g1", "voice-1"),
    });
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert!(!bot
        .chat
        .sent()
        .iter()
        .any(|(_, text)| text.contains("lost to the void")));
}
