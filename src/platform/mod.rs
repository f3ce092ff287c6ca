// ABOUTME: Narrow chat-platform interface consumed by the bot core.
// ABOUTME: Defines the ChatClient trait, message/reaction data types, and the client event stream.

use anyhow::Result;
use async_trait::async_trait;
use std::pin::Pin;
use tokio_stream::Stream;

#[cfg(feature = "discord")]
pub mod discord;

#[cfg(feature = "discord")]
pub use discord::DiscordClient;

// =============================================================================
// User Identity
// =============================================================================

/// Identity of a chat user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatUser {
    /// Platform-unique identifier (e.g. a Discord snowflake).
    pub id: String,
    /// Display name, when the platform provides one.
    pub display_name: Option<String>,
}

impl ChatUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
        }
    }

    pub fn with_name(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: Some(name.into()),
        }
    }

    /// Display name with the raw id as fallback.
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

// =============================================================================
// Incoming Payloads
// =============================================================================

/// A message received from the platform.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// Platform message id.
    pub id: String,
    /// Channel the message was sent in.
    pub channel_id: String,
    /// Room (guild/server) the channel belongs to, absent for direct messages.
    pub guild_id: Option<String>,
    /// Author identity.
    pub author: ChatUser,
    /// Whether the author is a bot account (including ourselves).
    pub author_is_bot: bool,
    /// Whether the author holds the administrator permission in this room.
    pub author_is_admin: bool,
    /// Raw text body.
    pub content: String,
    /// Id of the message this one replies to, if it is a reply.
    pub replied_to: Option<String>,
    /// URLs of any attachments, in upload order.
    pub attachment_urls: Vec<String>,
    /// URLs of any stickers.
    pub sticker_urls: Vec<String>,
}

impl ChatMessage {
    /// Minimal message for composing in adapters and tests.
    pub fn new(
        id: impl Into<String>,
        channel_id: impl Into<String>,
        author: ChatUser,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            channel_id: channel_id.into(),
            guild_id: None,
            author,
            author_is_bot: false,
            author_is_admin: false,
            content: content.into(),
            replied_to: None,
            attachment_urls: Vec::new(),
            sticker_urls: Vec::new(),
        }
    }
}

/// An emoji reaction added to a message.
#[derive(Debug, Clone)]
pub struct ChatReaction {
    /// Message the reaction was added to.
    pub message_id: String,
    /// Channel holding that message.
    pub channel_id: String,
    /// Room the channel belongs to, absent for direct messages.
    pub guild_id: Option<String>,
    /// Emoji token as the platform renders it.
    pub emoji: String,
}

// =============================================================================
// Client Events
// =============================================================================

/// Events the platform connection emits to the bot.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Gateway connection established and identity known.
    Ready { user: ChatUser },
    /// A message was created in a channel the bot can see.
    MessageCreate(ChatMessage),
    /// A reaction was added to a message.
    ReactionAdd {
        reaction: ChatReaction,
        user: ChatUser,
        user_is_bot: bool,
    },
}

/// Stream of client events produced by a platform adapter.
pub type ClientEventStream = Pin<Box<dyn Stream<Item = ClientEvent> + Send>>;

// =============================================================================
// ChatClient Trait
// =============================================================================

/// The platform surface the bot depends on.
///
/// The gateway protocol itself is the adapter's business; the core only
/// subscribes to the event stream and issues these narrow operations.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Platform identifier for logs (e.g. "discord").
    fn platform_id(&self) -> &'static str;

    /// Connect and authenticate with the given bot token.
    ///
    /// Resolves once the gateway session is established. Failure here is
    /// fatal to startup.
    async fn login(&self, token: &str) -> Result<()>;

    /// Stream of incoming events. May be taken once; subsequent calls error.
    fn event_stream(&self) -> Result<ClientEventStream>;

    /// The bot's own user id, known after login.
    fn bot_user_id(&self) -> Option<String>;

    /// Send a plain message to a channel, returning the sent message.
    async fn send_message(&self, channel_id: &str, content: &str) -> Result<ChatMessage>;

    /// Reply to a message, returning the reply that was sent.
    async fn reply(&self, to: &ChatMessage, content: &str) -> Result<ChatMessage>;

    /// Id of the thread already attached to a message, if any.
    async fn existing_thread(&self, channel_id: &str, message_id: &str) -> Result<Option<String>>;

    /// Create a thread hanging off a message and return its channel id.
    async fn create_thread(
        &self,
        channel_id: &str,
        message_id: &str,
        name: &str,
    ) -> Result<String>;

    /// Add an emoji reaction to a message.
    async fn add_reaction(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<()>;

    /// Show a typing indicator in a channel.
    async fn start_typing(&self, channel_id: &str) -> Result<()>;

    /// Set the bot's presence activity text, or clear it with `None`.
    async fn set_activity(&self, activity: Option<&str>) -> Result<()>;

    /// Voice channel a user is currently connected to in a room, if any.
    async fn voice_channel_of(&self, guild_id: &str, user_id: &str) -> Result<Option<String>>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_user_name_falls_back_to_id() {
        let bare = ChatUser::new("123");
        assert_eq!(bare.name(), "123");

        let named = ChatUser::with_name("123", "zen");
        assert_eq!(named.name(), "zen");
    }

    #[test]
    fn chat_message_new_defaults() {
        let msg = ChatMessage::new("m1", "c1", ChatUser::new("u1"), "hi");
        assert_eq!(msg.id, "m1");
        assert!(msg.guild_id.is_none());
        assert!(!msg.author_is_bot);
        assert!(msg.replied_to.is_none());
        assert!(msg.attachment_urls.is_empty());
    }
}
