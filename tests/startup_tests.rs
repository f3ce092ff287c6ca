// ABOUTME: Integration tests for loader::start: event wiring and platform login.
// ABOUTME: Drives the full startup path with a recording mock chat client.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use offbeat::config::Config;
use offbeat::feature::Feature;
use offbeat::features::core::CoreFeature;
use offbeat::loader;
use offbeat::platform::{ChatClient, ChatMessage, ChatUser, ClientEvent, ClientEventStream};

// =============================================================================
// Mock chat client
// =============================================================================

struct MockChat {
    logins: Mutex<Vec<String>>,
    replies: Mutex<Vec<(String, String)>>,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
}

impl MockChat {
    fn new() -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            logins: Mutex::new(Vec::new()),
            replies: Mutex::new(Vec::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }

    fn push(&self, event: ClientEvent) {
        self.events_tx.send(event).unwrap();
    }

    fn logins(&self) -> Vec<String> {
        self.logins.lock().unwrap().clone()
    }

    /// Replies as (replied-to message id, content) pairs.
    fn replies(&self) -> Vec<(String, String)> {
        self.replies.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatClient for MockChat {
    fn platform_id(&self) -> &'static str {
        "mock"
    }

    async fn login(&self, token: &str) -> Result<()> {
        self.logins.lock().unwrap().push(token.to_string());
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
        Ok(ChatMessage::new(
            "sent",
            channel_id,
            ChatUser::new("bot-1"),
            content,
        ))
    }

    async fn reply(&self, to: &ChatMessage, content: &str) -> Result<ChatMessage> {
        self.replies
            .lock()
            .unwrap()
            .push((to.id.clone(), content.to_string()));
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
        _name: &str,
    ) -> Result<String> {
        Ok(format!("thread-{}", message_id))
    }

    async fn add_reaction(&self, _channel_id: &str, _message_id: &str, _emoji: &str) -> Result<()> {
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

fn test_config() -> Config {
    let mut config = Config::default();
    config.bot.token = "token-123".to_string();
    config
}

fn user_message(id: &str, content: &str) -> ClientEvent {
    ClientEvent::MessageCreate(ChatMessage::new(
        id,
        "chan",
        ChatUser::with_name("u1", "zen"),
        content,
    ))
}

/// Poll until the routed handlers have produced the expected side effect.
async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

// =============================================================================
// Startup flow
// =============================================================================

#[tokio::test]
async fn test_start_logs_in_with_the_configured_token() {
    let chat = MockChat::new();
    let manifest: Vec<Arc<dyn Feature>> =
        vec![CoreFeature::new(Arc::clone(&chat) as Arc<dyn ChatClient>)];

    let ctx = loader::start(manifest, test_config()).await.unwrap();

    assert_eq!(chat.logins(), ["token-123"]);
    assert!(ctx.client().is_ok());
    assert_eq!(ctx.enabled_features(), ["core"]);
}

struct BareFeature;

#[async_trait]
impl Feature for BareFeature {
    fn name(&self) -> &'static str {
        "core"
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &[]
    }
}

#[tokio::test]
async fn test_start_requires_an_installed_client() {
    let manifest: Vec<Arc<dyn Feature>> = vec![Arc::new(BareFeature)];

    let err = loader::start(manifest, test_config()).await.unwrap_err();

    assert!(err.to_string().contains("without a chat client"));
}

#[tokio::test]
async fn test_commands_dispatch_after_start() {
    let chat = MockChat::new();
    let manifest: Vec<Arc<dyn Feature>> =
        vec![CoreFeature::new(Arc::clone(&chat) as Arc<dyn ChatClient>)];

    let _ctx = loader::start(manifest, test_config()).await.unwrap();

    chat.push(ClientEvent::Ready {
        user: ChatUser::with_name("bot-1", "offbeat"),
    });
    chat.push(user_message("m1", "#help"));

    wait_until(|| !chat.replies().is_empty()).await;
    let replies = chat.replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].0, "m1");
    assert!(replies[0].1.starts_with("**Registered commands:**"));
    assert!(replies[0].1.contains("#help"));
}

#[tokio::test]
async fn test_bot_authored_messages_are_not_dispatched() {
    let chat = MockChat::new();
    let manifest: Vec<Arc<dyn Feature>> =
        vec![CoreFeature::new(Arc::clone(&chat) as Arc<dyn ChatClient>)];

    let _ctx = loader::start(manifest, test_config()).await.unwrap();

    let mut from_bot = ChatMessage::new("m1", "chan", ChatUser::new("bot-1"), "#help");
    from_bot.author_is_bot = true;
    chat.push(ClientEvent::MessageCreate(from_bot));
    chat.push(user_message("m2", "#help"));

    // The streams are processed in order, so one reply means the bot
    // message was skipped and the user message was not.
    wait_until(|| !chat.replies().is_empty()).await;
    let replies = chat.replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].0, "m2");
}
