// ABOUTME: Track comment feature: records replies and reactions against the
// ABOUTME: enqueued message while a track plays, and replays them next time.

pub mod playback;
pub mod sessions;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::commands::{require_admin, require_server, Command};
use crate::context::Context;
use crate::events::{Event, EventHandler, EventKind};
use crate::feature::{Feature, FeatureService};
use crate::features::music_stats::{music_db, MusicDb};
use crate::platform::{ChatMessage, ClientEvent};
use crate::player::PlayerEvent;

pub use sessions::{ActiveSession, CommentSessions};

/// Comment recording and playback, bound to the music queue's lifecycle.
pub struct MusicCommentsFeature {
    sessions: Arc<CommentSessions>,
}

impl MusicCommentsFeature {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: Arc::new(CommentSessions::new()),
        })
    }
}

impl Feature for MusicCommentsFeature {
    fn name(&self) -> &'static str {
        "music-comments"
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["core", "database", "music", "music-stats"]
    }

    fn service(&self, _ctx: &Context) -> Option<Result<FeatureService>> {
        Some(Ok(FeatureService {
            name: "comments",
            service: Arc::clone(&self.sessions) as Arc<dyn std::any::Any + Send + Sync>,
        }))
    }

    fn commands(&self) -> Vec<Arc<dyn Command>> {
        vec![Arc::new(ClearVideosCommand), Arc::new(ClearVideoCommand)]
    }

    fn event_handlers(&self) -> Vec<Arc<dyn EventHandler>> {
        vec![
            Arc::new(PlaybackSessionStart {
                sessions: Arc::clone(&self.sessions),
            }),
            Arc::new(StopOnQueueEmpty {
                sessions: Arc::clone(&self.sessions),
            }),
            Arc::new(StopOnQueueDelete {
                sessions: Arc::clone(&self.sessions),
            }),
            Arc::new(ReplyRecorder {
                sessions: Arc::clone(&self.sessions),
            }),
            Arc::new(ReactionRecorder {
                sessions: Arc::clone(&self.sessions),
            }),
        ]
    }
}

// ===== Event handlers =====

/// Starts a comment session when a track begins and replays stored history.
struct PlaybackSessionStart {
    sessions: Arc<CommentSessions>,
}

#[async_trait]
impl EventHandler for PlaybackSessionStart {
    fn kind(&self) -> EventKind {
        EventKind::TrackStart
    }

    async fn handle(&self, event: &Event, ctx: &Arc<Context>) -> Result<bool> {
        let Event::Player(PlayerEvent::TrackStart { queue, track }) = event else {
            return Ok(false);
        };
        let Some(anchor) = queue.enqueued_message() else {
            tracing::debug!(
                track = %track.title,
                "No enqueued message for track, skipping comment session"
            );
            return Ok(false);
        };

        let client = ctx.client()?;
        let db = music_db(ctx)?;
        self.sessions
            .start_session(&queue.guild_id, anchor, &track.url, &track.title)?;
        self.sessions
            .ensure_playback_thread(&queue.guild_id, &client, &db)
            .await?;
        self.sessions
            .schedule_playback(&queue.guild_id, client, &db)
            .await?;
        Ok(true)
    }
}

struct StopOnQueueEmpty {
    sessions: Arc<CommentSessions>,
}

#[async_trait]
impl EventHandler for StopOnQueueEmpty {
    fn kind(&self) -> EventKind {
        EventKind::QueueEmpty
    }

    async fn handle(&self, event: &Event, _ctx: &Arc<Context>) -> Result<bool> {
        let Event::Player(PlayerEvent::QueueEmpty { queue }) = event else {
            return Ok(false);
        };
        tracing::debug!(guild = %queue.guild_id, "Queue empty, ending comment session");
        self.sessions.stop_session(&queue.guild_id)?;
        Ok(true)
    }
}

struct StopOnQueueDelete {
    sessions: Arc<CommentSessions>,
}

#[async_trait]
impl EventHandler for StopOnQueueDelete {
    fn kind(&self) -> EventKind {
        EventKind::QueueDelete
    }

    async fn handle(&self, event: &Event, _ctx: &Arc<Context>) -> Result<bool> {
        let Event::Player(PlayerEvent::QueueDelete { queue }) = event else {
            return Ok(false);
        };
        tracing::debug!(guild = %queue.guild_id, "Queue deleted, ending comment session");
        self.sessions.stop_session(&queue.guild_id)?;
        Ok(true)
    }
}

/// Feeds every incoming message through the reply recorder.
struct ReplyRecorder {
    sessions: Arc<CommentSessions>,
}

#[async_trait]
impl EventHandler for ReplyRecorder {
    fn kind(&self) -> EventKind {
        EventKind::MessageCreate
    }

    async fn handle(&self, event: &Event, ctx: &Arc<Context>) -> Result<bool> {
        let Event::Client(ClientEvent::MessageCreate(message)) = event else {
            return Ok(false);
        };
        let client = ctx.client()?;
        let db = music_db(ctx)?;
        self.sessions
            .handle_potential_reply(message, ctx.prefix(), &client, &db)
            .await
    }
}

struct ReactionRecorder {
    sessions: Arc<CommentSessions>,
}

#[async_trait]
impl EventHandler for ReactionRecorder {
    fn kind(&self) -> EventKind {
        EventKind::ReactionAdd
    }

    async fn handle(&self, event: &Event, ctx: &Arc<Context>) -> Result<bool> {
        let Event::Client(ClientEvent::ReactionAdd {
            reaction,
            user,
            user_is_bot,
        }) = event
        else {
            return Ok(false);
        };
        let db = music_db(ctx)?;
        self.sessions
            .handle_reaction_add(reaction, user, *user_is_bot, &db)
    }
}

// ===== Commands =====

fn count_part(count: usize, noun: &str) -> Option<String> {
    (count > 0).then(|| format!("{} {}{}", count, noun, if count == 1 { "" } else { "s" }))
}

fn cleared_parts(comments: usize, reactions: usize) -> Option<String> {
    let parts: Vec<String> = [count_part(comments, "comment"), count_part(reactions, "reaction")]
        .into_iter()
        .flatten()
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" and "))
    }
}

fn clear_guild_history(db: &MusicDb, guild_id: &str) -> Result<(usize, usize)> {
    Ok((
        db.clear_track_comments(guild_id)?,
        db.clear_track_reactions(guild_id)?,
    ))
}

fn clear_video_history(db: &MusicDb, track_url: &str, guild_id: &str) -> Result<(usize, usize)> {
    Ok((
        db.clear_video_comments(track_url, guild_id)?,
        db.clear_video_reactions(track_url, guild_id)?,
    ))
}

/// Wipes every stored comment and reaction for the server.
pub struct ClearVideosCommand;

#[async_trait]
impl Command for ClearVideosCommand {
    fn name(&self) -> &'static str {
        "clearvideos"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["clearcomments"]
    }

    fn permissions(&self) -> &'static [&'static str] {
        &["Administrator"]
    }

    async fn execute(
        &self,
        message: &ChatMessage,
        _args: &[String],
        ctx: &Arc<Context>,
    ) -> Result<()> {
        let Some(guild_id) = require_server(message, ctx).await? else {
            return Ok(());
        };
        if !require_admin(message, ctx).await? {
            return Ok(());
        }

        tracing::info!(guild = %guild_id, "Clearing all track comments");
        let db = music_db(ctx)?;
        let reply = match clear_guild_history(&db, &guild_id) {
            Ok((comments, reactions)) => {
                tracing::info!(guild = %guild_id, comments, reactions, "Cleared track comments and reactions");
                match cleared_parts(comments, reactions) {
                    Some(parts) => format!("✅ Cleared {} for this server.", parts),
                    None => "✅ No track comments or reactions to clear.".to_string(),
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to clear track comments/reactions");
                format!("Failed to clear: {}", e)
            }
        };
        ctx.client()?.reply(message, &reply).await?;
        Ok(())
    }
}

/// Wipes the stored comments and reactions for the currently playing track.
/// Must be invoked as a reply to that track's enqueued message.
pub struct ClearVideoCommand;

#[async_trait]
impl Command for ClearVideoCommand {
    fn name(&self) -> &'static str {
        "clearvideo"
    }

    fn permissions(&self) -> &'static [&'static str] {
        &["Administrator"]
    }

    async fn execute(
        &self,
        message: &ChatMessage,
        _args: &[String],
        ctx: &Arc<Context>,
    ) -> Result<()> {
        let Some(guild_id) = require_server(message, ctx).await? else {
            return Ok(());
        };
        if !require_admin(message, ctx).await? {
            return Ok(());
        }
        let client = ctx.client()?;

        let Some(replied_to) = &message.replied_to else {
            tracing::debug!(guild = %guild_id, "Clearvideo refused: not a reply");
            client
                .reply(
                    message,
                    &format!(
                        "🛑 Reply to an enqueued message with `{}clearvideo` to clear comments for that video.",
                        ctx.prefix()
                    ),
                )
                .await?;
            return Ok(());
        };

        let sessions: Arc<CommentSessions> = ctx.service("comments")?;
        let active = sessions
            .active_session(&guild_id)?
            .filter(|session| session.anchor_message_id == *replied_to);
        let Some(active) = active else {
            tracing::debug!(guild = %guild_id, "Clearvideo refused: reply not to current track enqueued message");
            client
                .reply(
                    message,
                    "🛑 Reply to the currently playing track's enqueued message to clear its comments.",
                )
                .await?;
            return Ok(());
        };

        tracing::info!(guild = %guild_id, track = %active.track_url, "Clearing comments and reactions for video");
        let db = music_db(ctx)?;
        let reply = match clear_video_history(&db, &active.track_url, &guild_id) {
            Ok((comments, reactions)) => {
                tracing::info!(guild = %guild_id, comments, reactions, "Cleared comments and reactions for video");
                match cleared_parts(comments, reactions) {
                    Some(parts) => format!("✅ Cleared {} for this video.", parts),
                    None => "✅ No comments or reactions to clear for this video.".to_string(),
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to clear video comments/reactions");
                format!("Failed to clear: {}", e)
            }
        };
        client.reply(message, &reply).await?;
        Ok(())
    }
}
