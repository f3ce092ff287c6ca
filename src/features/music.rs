// ABOUTME: Music feature: installs the media player and exposes the playback
// ABOUTME: commands, plus presence updates that mirror the player state.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use std::any::Any;
use std::env;
use std::sync::Arc;

use crate::commands::Command;
use crate::config::Config;
use crate::context::Context;
use crate::events::{Event, EventHandler, EventKind};
use crate::feature::Feature;
use crate::features::core::{truncate, ActivityService};
use crate::platform::ChatMessage;
use crate::player::{MediaPlayer, PlayerEvent, PlayOptions};

/// Tunables for the playback engine, overridable from the environment.
#[derive(Debug, Clone)]
pub struct MusicConfig {
    pub volume: u8,
    pub leave_on_empty_cooldown_ms: u64,
    pub leave_on_end_cooldown_ms: u64,
}

impl Default for MusicConfig {
    fn default() -> Self {
        Self {
            volume: 50,
            leave_on_empty_cooldown_ms: 60_000,
            leave_on_end_cooldown_ms: 60_000,
        }
    }
}

impl MusicConfig {
    fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(val) = env::var("MUSIC_VOLUME") {
            config.volume = val
                .parse()
                .with_context(|| format!("MUSIC_VOLUME must be a number 0-100, got '{}'", val))?;
        }
        if let Ok(val) = env::var("MUSIC_LEAVE_TIMEOUT") {
            let ms: u64 = val.parse().with_context(|| {
                format!("MUSIC_LEAVE_TIMEOUT must be milliseconds, got '{}'", val)
            })?;
            config.leave_on_empty_cooldown_ms = ms;
            config.leave_on_end_cooldown_ms = ms;
        }
        Ok(config)
    }

    fn play_options(&self) -> PlayOptions {
        PlayOptions {
            volume: self.volume,
            leave_on_empty_cooldown_ms: self.leave_on_empty_cooldown_ms,
            leave_on_end_cooldown_ms: self.leave_on_end_cooldown_ms,
        }
    }
}

/// Installs the injected media player and the playback command set.
pub struct MusicFeature {
    player: Arc<dyn MediaPlayer>,
}

impl MusicFeature {
    pub fn new(player: Arc<dyn MediaPlayer>) -> Arc<Self> {
        Arc::new(Self { player })
    }
}

#[async_trait]
impl Feature for MusicFeature {
    fn name(&self) -> &'static str {
        "music"
    }

    fn build_config(&self, _config: &Config) -> Option<Result<Arc<dyn Any + Send + Sync>>> {
        Some(MusicConfig::from_env().map(|c| Arc::new(c) as Arc<dyn Any + Send + Sync>))
    }

    async fn init(&self, ctx: &mut Context) -> Result<()> {
        ctx.install_player(Arc::clone(&self.player));
        Ok(())
    }

    fn commands(&self) -> Vec<Arc<dyn Command>> {
        vec![
            Arc::new(PlayCommand),
            Arc::new(PauseCommand),
            Arc::new(ResumeCommand),
            Arc::new(SkipCommand),
            Arc::new(StopCommand),
        ]
    }

    fn event_handlers(&self) -> Vec<Arc<dyn EventHandler>> {
        vec![Arc::new(NowPlayingPresence), Arc::new(IdlePresence)]
    }
}

/// Room the message came from, or `None` with a user-facing excuse sent.
async fn require_guild(message: &ChatMessage, ctx: &Arc<Context>) -> Result<Option<String>> {
    match &message.guild_id {
        Some(guild_id) => Ok(Some(guild_id.clone())),
        None => {
            ctx.client()?
                .reply(message, "You need to be in a voice channel!")
                .await?;
            Ok(None)
        }
    }
}

struct PlayCommand;

#[async_trait]
impl Command for PlayCommand {
    fn name(&self) -> &'static str {
        "play"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["p"]
    }

    async fn execute(
        &self,
        message: &ChatMessage,
        args: &[String],
        ctx: &Arc<Context>,
    ) -> Result<()> {
        let client = ctx.client()?;

        if args.is_empty() {
            client.reply(message, "🛑 Link missing").await?;
            return Ok(());
        }
        let Some(guild_id) = require_guild(message, ctx).await? else {
            return Ok(());
        };
        let Some(voice_channel) = client
            .voice_channel_of(&guild_id, &message.author.id)
            .await?
        else {
            client
                .reply(message, "You need to be in a voice channel!")
                .await?;
            return Ok(());
        };

        let options = ctx
            .feature_config::<MusicConfig>("music")
            .map(|c| c.play_options())
            .unwrap_or_else(|_| MusicConfig::default().play_options());

        let query = args.join(" ");
        let player = ctx.player()?;
        let track = player.play(&guild_id, &voice_channel, &query, options).await?;

        let reply = client
            .reply(message, &format!("**{}** enqueued!", track.title))
            .await?;

        // The reply anchors this track's comment session; remember who asked.
        if let Some(queue) = player.queue(&guild_id) {
            queue.set_requested_by(message.author.clone());
            queue.set_enqueued_message(reply);
        }

        Ok(())
    }
}

struct PauseCommand;

#[async_trait]
impl Command for PauseCommand {
    fn name(&self) -> &'static str {
        "pause"
    }

    async fn execute(
        &self,
        message: &ChatMessage,
        _args: &[String],
        ctx: &Arc<Context>,
    ) -> Result<()> {
        let client = ctx.client()?;
        let Some(guild_id) = require_guild(message, ctx).await? else {
            return Ok(());
        };

        let player = ctx.player()?;
        if !player.is_playing(&guild_id) {
            client
                .reply(message, "There is no music playing right now!")
                .await?;
            return Ok(());
        }

        player.pause(&guild_id).await?;
        client.reply(message, "⏸️ Playback has been paused.").await?;
        Ok(())
    }
}

struct ResumeCommand;

#[async_trait]
impl Command for ResumeCommand {
    fn name(&self) -> &'static str {
        "resume"
    }

    async fn execute(
        &self,
        message: &ChatMessage,
        _args: &[String],
        ctx: &Arc<Context>,
    ) -> Result<()> {
        let client = ctx.client()?;
        let Some(guild_id) = require_guild(message, ctx).await? else {
            return Ok(());
        };

        let player = ctx.player()?;
        if player.queue(&guild_id).is_none() {
            client
                .reply(message, "There is no music playing right now!")
                .await?;
            return Ok(());
        }

        player.resume(&guild_id).await?;
        client
            .reply(message, "▶️ Playback has been resumed.")
            .await?;
        Ok(())
    }
}

struct SkipCommand;

#[async_trait]
impl Command for SkipCommand {
    fn name(&self) -> &'static str {
        "skip"
    }

    async fn execute(
        &self,
        message: &ChatMessage,
        _args: &[String],
        ctx: &Arc<Context>,
    ) -> Result<()> {
        let client = ctx.client()?;
        let Some(guild_id) = require_guild(message, ctx).await? else {
            return Ok(());
        };

        let player = ctx.player()?;
        if player.queue(&guild_id).is_none() {
            client.reply(message, "There is no music playing!").await?;
            return Ok(());
        }
        let Some(track) = player.current_track(&guild_id) else {
            client
                .reply(message, "There is no track playing right now!")
                .await?;
            return Ok(());
        };

        player.skip(&guild_id).await?;
        client
            .reply(message, &format!("⏭️ Skipped **{}**", track.title))
            .await?;
        Ok(())
    }
}

struct StopCommand;

#[async_trait]
impl Command for StopCommand {
    fn name(&self) -> &'static str {
        "stop"
    }

    async fn execute(
        &self,
        message: &ChatMessage,
        _args: &[String],
        ctx: &Arc<Context>,
    ) -> Result<()> {
        let client = ctx.client()?;
        let Some(guild_id) = require_guild(message, ctx).await? else {
            return Ok(());
        };

        let player = ctx.player()?;
        if player.queue(&guild_id).is_none() {
            client.reply(message, "There is no music playing!").await?;
            return Ok(());
        }

        player.stop(&guild_id).await?;
        if let Ok(activity) = ctx.service::<ActivityService>("activity") {
            activity.set(None).await;
        }
        client
            .reply(message, "Stopped the player and cleared the queue!")
            .await?;
        Ok(())
    }
}

/// Mirrors the playing track into the bot presence.
struct NowPlayingPresence;

#[async_trait]
impl EventHandler for NowPlayingPresence {
    fn kind(&self) -> EventKind {
        EventKind::TrackStart
    }

    async fn handle(&self, event: &Event, ctx: &Arc<Context>) -> Result<bool> {
        let Event::Player(PlayerEvent::TrackStart { track, .. }) = event else {
            return Ok(false);
        };
        let activity = ctx.service::<ActivityService>("activity")?;
        activity
            .set(Some(&format!("💥 Blasting {}", truncate(&track.title, 160))))
            .await;
        Ok(true)
    }
}

/// Clears the presence once the queue drains.
struct IdlePresence;

#[async_trait]
impl EventHandler for IdlePresence {
    fn kind(&self) -> EventKind {
        EventKind::QueueEmpty
    }

    async fn handle(&self, event: &Event, ctx: &Arc<Context>) -> Result<bool> {
        let Event::Player(PlayerEvent::QueueEmpty { .. }) = event else {
            return Ok(false);
        };
        let activity = ctx.service::<ActivityService>("activity")?;
        activity.set(None).await;
        Ok(true)
    }
}
