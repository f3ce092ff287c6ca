// ABOUTME: Discord adapter: serenity gateway events in, HTTP operations out.
// ABOUTME: Forwards gateway events onto an mpsc channel the router consumes.

use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

use serenity::cache::Cache;
use serenity::client::bridge::gateway::ShardMessenger;
use serenity::client::{Client, Context as GatewayContext, EventHandler as GatewayEventHandler};
use serenity::http::{Http, HttpError};
use serenity::model::channel::{Channel, ChannelType, Message, Reaction, ReactionType};
use serenity::model::gateway::{Activity, GatewayIntents, Ready};
use serenity::model::id::{ChannelId, EmojiId, GuildId, MessageId, UserId};

use super::{ChatClient, ChatMessage, ChatReaction, ChatUser, ClientEvent, ClientEventStream};

/// State the gateway callbacks fill in once the session is up.
struct GatewayState {
    bot_user: Mutex<Option<ChatUser>>,
    shard: Mutex<Option<ShardMessenger>>,
    cache: Mutex<Option<Arc<Cache>>>,
    ready_signal: Mutex<Option<oneshot::Sender<()>>>,
}

impl GatewayState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            bot_user: Mutex::new(None),
            shard: Mutex::new(None),
            cache: Mutex::new(None),
            ready_signal: Mutex::new(None),
        })
    }
}

/// Discord platform connection.
///
/// `login` runs the serenity gateway on a background task; outbound calls go
/// straight through the HTTP client. Gateway events buffer on an unbounded
/// channel until the router drains the stream.
pub struct DiscordClient {
    http: Mutex<Option<Arc<Http>>>,
    state: Arc<GatewayState>,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
}

impl DiscordClient {
    pub fn new() -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            http: Mutex::new(None),
            state: GatewayState::new(),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }

    fn http(&self) -> Result<Arc<Http>> {
        self.http
            .lock()
            .map_err(|e| anyhow::anyhow!("HTTP handle mutex poisoned: {}", e))?
            .clone()
            .context("Discord client is not logged in")
    }

    fn cache(&self) -> Result<Arc<Cache>> {
        self.state
            .cache
            .lock()
            .map_err(|e| anyhow::anyhow!("Cache handle mutex poisoned: {}", e))?
            .clone()
            .context("Discord client is not logged in")
    }
}

fn parse_id(id: &str) -> Result<u64> {
    id.parse::<u64>()
        .with_context(|| format!("Invalid Discord id '{}'", id))
}

/// Turn an emoji token back into serenity's reaction type. Accepts plain
/// unicode emoji and the `<:name:id>` / `<a:name:id>` custom forms that
/// incoming reactions render to.
fn parse_reaction(emoji: &str) -> ReactionType {
    let trimmed = emoji.trim();
    let custom = trimmed
        .strip_prefix("<a:")
        .map(|rest| (true, rest))
        .or_else(|| trimmed.strip_prefix("<:").map(|rest| (false, rest)));
    if let Some((animated, rest)) = custom {
        if let Some(inner) = rest.strip_suffix('>') {
            if let Some(colon) = inner.rfind(':') {
                if let Ok(id) = inner[colon + 1..].parse::<u64>() {
                    return ReactionType::Custom {
                        animated,
                        id: EmojiId(id),
                        name: Some(inner[..colon].to_string()),
                    };
                }
            }
        }
    }
    ReactionType::Unicode(trimmed.to_string())
}

fn is_thread(kind: ChannelType) -> bool {
    matches!(
        kind,
        ChannelType::PublicThread | ChannelType::PrivateThread | ChannelType::NewsThread
    )
}

/// Administrator check against the cached guild: the owner always passes,
/// everyone else needs a role carrying the administrator bit.
fn author_is_admin(ctx: &GatewayContext, msg: &Message) -> bool {
    let Some(guild_id) = msg.guild_id else {
        return false;
    };
    let Some(guild) = ctx.cache.guild(guild_id) else {
        return false;
    };
    if guild.owner_id == msg.author.id {
        return true;
    }
    let Some(member) = &msg.member else {
        return false;
    };
    member.roles.iter().any(|role_id| {
        guild
            .roles
            .get(role_id)
            .map(|role| role.permissions.administrator())
            .unwrap_or(false)
    })
}

fn chat_message(msg: &Message, is_admin: bool) -> ChatMessage {
    let replied_to = msg
        .message_reference
        .as_ref()
        .and_then(|reference| reference.message_id)
        .map(|id| id.0.to_string())
        .or_else(|| {
            msg.referenced_message
                .as_ref()
                .map(|referenced| referenced.id.0.to_string())
        });

    ChatMessage {
        id: msg.id.0.to_string(),
        channel_id: msg.channel_id.0.to_string(),
        guild_id: msg.guild_id.map(|g| g.0.to_string()),
        author: ChatUser::with_name(msg.author.id.0.to_string(), msg.author.name.clone()),
        author_is_bot: msg.author.bot,
        author_is_admin: is_admin,
        content: msg.content.clone(),
        replied_to,
        attachment_urls: msg.attachments.iter().map(|a| a.url.clone()).collect(),
        sticker_urls: msg
            .sticker_items
            .iter()
            .filter_map(|sticker| sticker.image_url())
            .collect(),
    }
}

/// serenity event handler that forwards everything onto the client's channel.
struct GatewayForwarder {
    events: mpsc::UnboundedSender<ClientEvent>,
    state: Arc<GatewayState>,
}

impl GatewayForwarder {
    fn forward(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            tracing::warn!("Event stream receiver dropped, discarding client event");
        }
    }
}

#[async_trait]
impl GatewayEventHandler for GatewayForwarder {
    async fn ready(&self, ctx: GatewayContext, ready: Ready) {
        tracing::info!(
            user = %ready.user.name,
            guilds = ready.guilds.len(),
            "Discord gateway ready"
        );
        let user = ChatUser::with_name(ready.user.id.0.to_string(), ready.user.name.clone());

        if let Ok(mut bot_user) = self.state.bot_user.lock() {
            *bot_user = Some(user.clone());
        }
        if let Ok(mut shard) = self.state.shard.lock() {
            *shard = Some(ctx.shard.clone());
        }
        if let Ok(mut signal) = self.state.ready_signal.lock() {
            if let Some(tx) = signal.take() {
                let _ = tx.send(());
            }
        }

        self.forward(ClientEvent::Ready { user });
    }

    async fn message(&self, ctx: GatewayContext, msg: Message) {
        let is_admin = author_is_admin(&ctx, &msg);
        self.forward(ClientEvent::MessageCreate(chat_message(&msg, is_admin)));
    }

    async fn reaction_add(&self, ctx: GatewayContext, reaction: Reaction) {
        let Some(user_id) = reaction.user_id else {
            tracing::debug!("Reaction without a user id, skipping");
            return;
        };

        let (user, user_is_bot) = match &reaction.member {
            Some(member) => (
                ChatUser::with_name(user_id.0.to_string(), member.user.name.clone()),
                member.user.bot,
            ),
            None => match ctx.cache.user(user_id) {
                Some(cached) => (
                    ChatUser::with_name(user_id.0.to_string(), cached.name.clone()),
                    cached.bot,
                ),
                None => (ChatUser::new(user_id.0.to_string()), false),
            },
        };

        self.forward(ClientEvent::ReactionAdd {
            reaction: ChatReaction {
                message_id: reaction.message_id.0.to_string(),
                channel_id: reaction.channel_id.0.to_string(),
                guild_id: reaction.guild_id.map(|g| g.0.to_string()),
                emoji: reaction.emoji.to_string(),
            },
            user,
            user_is_bot,
        });
    }
}

#[async_trait]
impl ChatClient for DiscordClient {
    fn platform_id(&self) -> &'static str {
        "discord"
    }

    async fn login(&self, token: &str) -> Result<()> {
        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_VOICE_STATES
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::GUILD_MESSAGE_REACTIONS
            | GatewayIntents::MESSAGE_CONTENT;

        let (ready_tx, ready_rx) = oneshot::channel();
        {
            let mut signal = self
                .state
                .ready_signal
                .lock()
                .map_err(|e| anyhow::anyhow!("Ready signal mutex poisoned: {}", e))?;
            *signal = Some(ready_tx);
        }

        let forwarder = GatewayForwarder {
            events: self.events_tx.clone(),
            state: Arc::clone(&self.state),
        };
        let client = Client::builder(token, intents)
            .event_handler(forwarder)
            .await
            .context("Failed to create Discord client")?;

        {
            let mut http = self
                .http
                .lock()
                .map_err(|e| anyhow::anyhow!("HTTP handle mutex poisoned: {}", e))?;
            *http = Some(Arc::clone(&client.cache_and_http.http));
        }
        {
            let mut cache = self
                .state
                .cache
                .lock()
                .map_err(|e| anyhow::anyhow!("Cache handle mutex poisoned: {}", e))?;
            *cache = Some(Arc::clone(&client.cache_and_http.cache));
        }

        tracing::info!(intents = ?intents, "Connecting to Discord gateway");
        let gateway = tokio::spawn(async move {
            let mut client = client;
            client.start().await
        });

        tokio::select! {
            ready = ready_rx => {
                ready.context("Gateway task ended before ready")?;
                Ok(())
            }
            finished = gateway => match finished {
                Ok(Ok(())) => bail!("Gateway connection closed before ready"),
                Ok(Err(e)) => Err(e).context("Gateway connection failed"),
                Err(e) => Err(e).context("Gateway task panicked"),
            },
        }
    }

    fn event_stream(&self) -> Result<ClientEventStream> {
        let receiver = self
            .events_rx
            .lock()
            .map_err(|e| anyhow::anyhow!("Event stream mutex poisoned: {}", e))?
            .take()
            .context("Event stream already taken")?;
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    fn bot_user_id(&self) -> Option<String> {
        self.state
            .bot_user
            .lock()
            .ok()
            .and_then(|user| user.as_ref().map(|u| u.id.clone()))
    }

    async fn send_message(&self, channel_id: &str, content: &str) -> Result<ChatMessage> {
        let http = self.http()?;
        let sent = ChannelId(parse_id(channel_id)?)
            .say(&http, content)
            .await
            .with_context(|| format!("Failed to send message to channel {}", channel_id))?;
        Ok(chat_message(&sent, false))
    }

    async fn reply(&self, to: &ChatMessage, content: &str) -> Result<ChatMessage> {
        let http = self.http()?;
        let channel = ChannelId(parse_id(&to.channel_id)?);
        let message = MessageId(parse_id(&to.id)?);
        let sent = channel
            .send_message(&http, |m| {
                m.content(content).reference_message((channel, message))
            })
            .await
            .with_context(|| format!("Failed to reply to message {}", to.id))?;
        Ok(chat_message(&sent, false))
    }

    async fn existing_thread(&self, channel_id: &str, message_id: &str) -> Result<Option<String>> {
        let http = self.http()?;
        let parent = ChannelId(parse_id(channel_id)?);
        // A thread hanging off a message shares the message's id.
        match http.get_channel(parse_id(message_id)?).await {
            Ok(Channel::Guild(channel))
                if is_thread(channel.kind) && channel.parent_id == Some(parent) =>
            {
                Ok(Some(channel.id.0.to_string()))
            }
            Ok(_) => Ok(None),
            // Discord answers 404 when the message has no thread.
            Err(serenity::Error::Http(err))
                if matches!(&*err, HttpError::UnsuccessfulRequest(r) if r.status_code == 404) =>
            {
                Ok(None)
            }
            Err(e) => Err(e).context("Failed to look up thread channel"),
        }
    }

    async fn create_thread(
        &self,
        channel_id: &str,
        message_id: &str,
        name: &str,
    ) -> Result<String> {
        let http = self.http()?;
        let thread = ChannelId(parse_id(channel_id)?)
            .create_public_thread(&http, MessageId(parse_id(message_id)?), |t| t.name(name))
            .await
            .with_context(|| format!("Failed to create thread on message {}", message_id))?;
        Ok(thread.id.0.to_string())
    }

    async fn add_reaction(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        let http = self.http()?;
        ChannelId(parse_id(channel_id)?)
            .create_reaction(&http, MessageId(parse_id(message_id)?), parse_reaction(emoji))
            .await
            .with_context(|| format!("Failed to react to message {}", message_id))?;
        Ok(())
    }

    async fn start_typing(&self, channel_id: &str) -> Result<()> {
        let http = self.http()?;
        ChannelId(parse_id(channel_id)?)
            .broadcast_typing(&http)
            .await
            .context("Failed to broadcast typing")?;
        Ok(())
    }

    async fn set_activity(&self, activity: Option<&str>) -> Result<()> {
        let shard = self
            .state
            .shard
            .lock()
            .map_err(|e| anyhow::anyhow!("Shard mutex poisoned: {}", e))?
            .clone()
            .context("Gateway not ready, cannot set activity")?;
        shard.set_activity(activity.map(Activity::playing));
        Ok(())
    }

    async fn voice_channel_of(&self, guild_id: &str, user_id: &str) -> Result<Option<String>> {
        let cache = self.cache()?;
        let guild = GuildId(parse_id(guild_id)?);
        let user = UserId(parse_id(user_id)?);
        Ok(cache
            .guild(guild)
            .and_then(|g| g.voice_states.get(&user).and_then(|state| state.channel_id))
            .map(|channel| channel.0.to_string()))
    }
}
