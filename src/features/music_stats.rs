// ABOUTME: Play-history tracking behind the "music" storage namespace, plus
// ABOUTME: the musicstats/clearmusicstats commands built on top of it.

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

use crate::commands::{require_admin, require_server, Command};
use crate::context::Context;
use crate::events::{Event, EventHandler, EventKind};
use crate::feature::{Feature, StoreNamespace};
use crate::features::core::truncate;
use crate::platform::ChatMessage;
use crate::player::PlayerEvent;
use crate::store::Store;

/// A video ranked by play count.
#[derive(Debug, Clone)]
pub struct VideoPlayCount {
    pub video_url: String,
    pub video_title: String,
    pub play_count: i64,
    pub last_played: String,
}

/// A listener ranked by play count.
#[derive(Debug, Clone)]
pub struct ListenerCount {
    pub user_id: String,
    pub user_name: String,
    pub play_count: i64,
}

/// The most recently played video in a room.
#[derive(Debug, Clone)]
pub struct LastPlayed {
    pub video_url: String,
    pub video_title: String,
    pub played_at: String,
}

/// A comment left on a track, stamped with its playback offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackComment {
    pub user_id: String,
    pub user_name: String,
    pub text: String,
    pub offset_ms: i64,
}

/// An emoji reaction left on a track, stamped with its playback offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackReaction {
    pub user_id: String,
    pub user_name: String,
    pub emoji: String,
    pub offset_ms: i64,
}

/// Storage API published under the "music" namespace.
///
/// Holds play history plus the offset-stamped comments and reactions the
/// playback feature replays.
pub struct MusicDb {
    conn: Arc<Mutex<Connection>>,
}

impl MusicDb {
    /// Create the schema on the shared store and return the API.
    pub fn open(store: &Store) -> Result<Self> {
        let db = Self {
            conn: store.connection(),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS play_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                video_url TEXT NOT NULL,
                video_title TEXT NOT NULL,
                user_id TEXT NOT NULL,
                user_name TEXT NOT NULL,
                guild_id TEXT NOT NULL,
                played_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_play_history_video_url ON play_history(video_url)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_play_history_user_id ON play_history(user_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_play_history_guild_id ON play_history(guild_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS track_comments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                video_url TEXT NOT NULL,
                guild_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                user_name TEXT NOT NULL,
                comment_text TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_track_comments_video
             ON track_comments(video_url, guild_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS track_reactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                video_url TEXT NOT NULL,
                guild_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                user_name TEXT NOT NULL,
                reaction_emoji TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_track_reactions_video
             ON track_reactions(video_url, guild_id)",
            [],
        )?;

        tracing::info!("Music database tables initialized");
        Ok(())
    }

    // ===== Play history =====

    pub fn record_play(
        &self,
        video_url: &str,
        video_title: &str,
        user_id: &str,
        user_name: &str,
        guild_id: &str,
    ) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
        conn.execute(
            "INSERT INTO play_history (video_url, video_title, user_id, user_name, guild_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![video_url, video_title, user_id, user_name, guild_id],
        )?;
        tracing::debug!(title = %video_title, user = %user_name, "Recorded play");
        Ok(())
    }

    pub fn top_videos_overall(&self, guild_id: &str, limit: u32) -> Result<Vec<VideoPlayCount>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
        let mut stmt = conn.prepare(
            "SELECT video_url, video_title, COUNT(*) as play_count, MAX(played_at) as last_played
             FROM play_history
             WHERE guild_id = ?1
             GROUP BY video_url
             ORDER BY play_count DESC, last_played DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![guild_id, limit], |row| {
                Ok(VideoPlayCount {
                    video_url: row.get(0)?,
                    video_title: row.get(1)?,
                    play_count: row.get(2)?,
                    last_played: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn top_videos_by_user(
        &self,
        guild_id: &str,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<VideoPlayCount>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
        let mut stmt = conn.prepare(
            "SELECT video_url, video_title, COUNT(*) as play_count, MAX(played_at) as last_played
             FROM play_history
             WHERE guild_id = ?1 AND user_id = ?2
             GROUP BY video_url
             ORDER BY play_count DESC, last_played DESC
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![guild_id, user_id, limit], |row| {
                Ok(VideoPlayCount {
                    video_url: row.get(0)?,
                    video_title: row.get(1)?,
                    play_count: row.get(2)?,
                    last_played: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn top_listeners(&self, guild_id: &str, limit: u32) -> Result<Vec<ListenerCount>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
        let mut stmt = conn.prepare(
            "SELECT user_id, user_name, COUNT(*) as play_count
             FROM play_history
             WHERE guild_id = ?1
             GROUP BY user_id
             ORDER BY play_count DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![guild_id, limit], |row| {
                Ok(ListenerCount {
                    user_id: row.get(0)?,
                    user_name: row.get(1)?,
                    play_count: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn total_plays(&self, guild_id: &str) -> Result<i64> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
        let total = conn.query_row(
            "SELECT COUNT(*) FROM play_history WHERE guild_id = ?1",
            params![guild_id],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    pub fn user_total_plays(&self, guild_id: &str, user_id: &str) -> Result<i64> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
        let total = conn.query_row(
            "SELECT COUNT(*) FROM play_history WHERE guild_id = ?1 AND user_id = ?2",
            params![guild_id, user_id],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    pub fn last_played_video(&self, guild_id: &str) -> Result<Option<LastPlayed>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
        let row = conn.query_row(
            "SELECT video_url, video_title, played_at
             FROM play_history
             WHERE guild_id = ?1
             ORDER BY played_at DESC
             LIMIT 1",
            params![guild_id],
            |row| {
                Ok(LastPlayed {
                    video_url: row.get(0)?,
                    video_title: row.get(1)?,
                    played_at: row.get(2)?,
                })
            },
        );
        match row {
            Ok(last) => Ok(Some(last)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a room's play history. Returns the number of deleted records.
    pub fn clear_music_stats(&self, guild_id: &str) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
        let deleted = conn.execute(
            "DELETE FROM play_history WHERE guild_id = ?1",
            params![guild_id],
        )?;
        tracing::info!(deleted, guild = %guild_id, "Cleared music stats records");
        Ok(deleted)
    }

    // ===== Track comments =====

    pub fn save_track_comment(
        &self,
        video_url: &str,
        guild_id: &str,
        user_id: &str,
        user_name: &str,
        text: &str,
        offset_ms: i64,
    ) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
        conn.execute(
            "INSERT INTO track_comments
                 (video_url, guild_id, user_id, user_name, comment_text, timestamp_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![video_url, guild_id, user_id, user_name, text, offset_ms],
        )?;
        tracing::debug!(offset_ms, user = %user_name, "Saved track comment");
        Ok(())
    }

    /// Comments on a track, sorted by playback offset.
    pub fn get_track_comments(&self, video_url: &str, guild_id: &str) -> Result<Vec<TrackComment>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
        let mut stmt = conn.prepare(
            "SELECT user_id, user_name, comment_text, timestamp_ms
             FROM track_comments
             WHERE video_url = ?1 AND guild_id = ?2
             ORDER BY timestamp_ms ASC",
        )?;
        let rows = stmt
            .query_map(params![video_url, guild_id], |row| {
                Ok(TrackComment {
                    user_id: row.get(0)?,
                    user_name: row.get(1)?,
                    text: row.get(2)?,
                    offset_ms: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn clear_track_comments(&self, guild_id: &str) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
        let deleted = conn.execute(
            "DELETE FROM track_comments WHERE guild_id = ?1",
            params![guild_id],
        )?;
        tracing::info!(deleted, guild = %guild_id, "Cleared track comments");
        Ok(deleted)
    }

    pub fn clear_video_comments(&self, video_url: &str, guild_id: &str) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
        let deleted = conn.execute(
            "DELETE FROM track_comments WHERE video_url = ?1 AND guild_id = ?2",
            params![video_url, guild_id],
        )?;
        tracing::info!(deleted, guild = %guild_id, "Cleared comments for video");
        Ok(deleted)
    }

    // ===== Track reactions =====

    pub fn save_track_reaction(
        &self,
        video_url: &str,
        guild_id: &str,
        user_id: &str,
        user_name: &str,
        emoji: &str,
        offset_ms: i64,
    ) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
        conn.execute(
            "INSERT INTO track_reactions
                 (video_url, guild_id, user_id, user_name, reaction_emoji, timestamp_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![video_url, guild_id, user_id, user_name, emoji, offset_ms],
        )?;
        tracing::debug!(offset_ms, user = %user_name, emoji = %emoji, "Saved track reaction");
        Ok(())
    }

    /// Reactions on a track, sorted by playback offset.
    pub fn get_track_reactions(
        &self,
        video_url: &str,
        guild_id: &str,
    ) -> Result<Vec<TrackReaction>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
        let mut stmt = conn.prepare(
            "SELECT user_id, user_name, reaction_emoji, timestamp_ms
             FROM track_reactions
             WHERE video_url = ?1 AND guild_id = ?2
             ORDER BY timestamp_ms ASC",
        )?;
        let rows = stmt
            .query_map(params![video_url, guild_id], |row| {
                Ok(TrackReaction {
                    user_id: row.get(0)?,
                    user_name: row.get(1)?,
                    emoji: row.get(2)?,
                    offset_ms: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn clear_track_reactions(&self, guild_id: &str) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
        let deleted = conn.execute(
            "DELETE FROM track_reactions WHERE guild_id = ?1",
            params![guild_id],
        )?;
        tracing::info!(deleted, guild = %guild_id, "Cleared track reactions");
        Ok(deleted)
    }

    pub fn clear_video_reactions(&self, video_url: &str, guild_id: &str) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
        let deleted = conn.execute(
            "DELETE FROM track_reactions WHERE video_url = ?1 AND guild_id = ?2",
            params![video_url, guild_id],
        )?;
        tracing::info!(deleted, guild = %guild_id, "Cleared reactions for video");
        Ok(deleted)
    }
}

/// The "music" storage namespace, for features that consume it.
pub(crate) fn music_db(ctx: &Context) -> Result<Arc<MusicDb>> {
    ctx.store()?.get("music")
}

/// Registers the "music" storage namespace and the stats commands.
pub struct MusicStatsFeature;

impl MusicStatsFeature {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Feature for MusicStatsFeature {
    fn name(&self) -> &'static str {
        "music-stats"
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["core", "database", "music"]
    }

    fn store_api(&self, store: &Store, _ctx: &Context) -> Option<Result<StoreNamespace>> {
        Some(MusicDb::open(store).map(|db| StoreNamespace {
            name: "music",
            api: Arc::new(db),
        }))
    }

    fn commands(&self) -> Vec<Arc<dyn Command>> {
        vec![Arc::new(MusicStatsCommand), Arc::new(ClearMusicStatsCommand)]
    }

    fn event_handlers(&self) -> Vec<Arc<dyn EventHandler>> {
        vec![Arc::new(RecordPlayHandler)]
    }
}

/// Writes a play-history row whenever a track starts.
struct RecordPlayHandler;

#[async_trait]
impl EventHandler for RecordPlayHandler {
    fn kind(&self) -> EventKind {
        EventKind::TrackStart
    }

    async fn handle(&self, event: &Event, ctx: &Arc<Context>) -> Result<bool> {
        let Event::Player(PlayerEvent::TrackStart { queue, track }) = event else {
            return Ok(false);
        };
        let Some(requested_by) = queue.requested_by() else {
            tracing::debug!(guild = %queue.guild_id, "Track has no requester, not recording");
            return Ok(false);
        };

        let db = music_db(ctx)?;
        db.record_play(
            &track.url,
            &track.title,
            &requested_by.id,
            requested_by.name(),
            &queue.guild_id,
        )?;
        Ok(true)
    }
}

const TOP_VIDEO_LIMIT: u32 = 3;
const TOP_LISTENER_LIMIT: u32 = 10;
const LIST_TITLE_LENGTH: usize = 50;

fn display_title(title: &str, max: usize) -> String {
    let trimmed = title.trim();
    let safe = if trimmed.is_empty() { "Unknown Title" } else { trimmed };
    truncate(safe, max)
}

fn plays_text(count: i64) -> String {
    if count == 1 {
        "1 play".to_string()
    } else {
        format!("{} plays", count)
    }
}

fn render_stats(db: &MusicDb, guild_id: &str, user_id: &str) -> Result<String> {
    let top_overall = db.top_videos_overall(guild_id, TOP_VIDEO_LIMIT)?;
    let top_by_user = db.top_videos_by_user(guild_id, user_id, TOP_VIDEO_LIMIT)?;
    let top_listeners = db.top_listeners(guild_id, TOP_LISTENER_LIMIT)?;
    let total_plays = db.total_plays(guild_id)?;
    let user_total_plays = db.user_total_plays(guild_id, user_id)?;
    let last_played = db.last_played_video(guild_id)?;

    let mut sections = vec![
        "📊 **Music Stats**".to_string(),
        format!(
            "**Total plays on this server:** {}\n**Your total plays:** {}",
            total_plays, user_total_plays
        ),
    ];

    sections.push("👂 **Top 10 Listeners (Server)**".to_string());
    if top_listeners.is_empty() {
        sections.push("_No plays recorded yet!_".to_string());
    } else {
        let lines: Vec<String> = top_listeners
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                format!(
                    "{}. **{}** — {}",
                    i + 1,
                    entry.user_name,
                    plays_text(entry.play_count)
                )
            })
            .collect();
        sections.push(lines.join("\n"));
    }

    sections.push("🏆 **Top 3 Most Played (Server)**".to_string());
    if top_overall.is_empty() {
        sections.push("_No plays recorded yet!_".to_string());
    } else {
        sections.push(video_lines(&top_overall));
    }

    sections.push("🎵 **Your Top 3 Most Played**".to_string());
    if top_by_user.is_empty() {
        sections.push("_You haven't played anything yet!_".to_string());
    } else {
        sections.push(video_lines(&top_by_user));
    }

    sections.push("**Last played Video**".to_string());
    match last_played {
        Some(last) => sections.push(format!("**{}**", display_title(&last.video_title, 200))),
        None => sections.push("_No plays recorded yet!_".to_string()),
    }

    Ok(sections.join("\n\n"))
}

fn video_lines(entries: &[VideoPlayCount]) -> String {
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            format!(
                "{}. **{}** — {}",
                i + 1,
                display_title(&entry.video_title, LIST_TITLE_LENGTH),
                plays_text(entry.play_count)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Shows server and personal play statistics.
struct MusicStatsCommand;

#[async_trait]
impl Command for MusicStatsCommand {
    fn name(&self) -> &'static str {
        "musicstats"
    }

    async fn execute(
        &self,
        message: &ChatMessage,
        _args: &[String],
        ctx: &Arc<Context>,
    ) -> Result<()> {
        let client = ctx.client()?;
        let Some(guild_id) = require_server(message, ctx).await? else {
            return Ok(());
        };
        tracing::debug!(guild = %guild_id, user = %message.author.name(), "Musicstats requested");

        let db = music_db(ctx)?;
        match render_stats(&db, &guild_id, &message.author.id) {
            Ok(text) => {
                client.reply(message, &text).await?;
                tracing::info!(guild = %guild_id, "Musicstats sent");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to get music stats");
                client
                    .reply(message, &format!("Failed to get music stats: {}", e))
                    .await?;
            }
        }
        Ok(())
    }
}

/// Wipes a room's play history. Administrator only.
struct ClearMusicStatsCommand;

#[async_trait]
impl Command for ClearMusicStatsCommand {
    fn name(&self) -> &'static str {
        "clearmusicstats"
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
        let client = ctx.client()?;
        let Some(guild_id) = require_server(message, ctx).await? else {
            return Ok(());
        };
        if !require_admin(message, ctx).await? {
            return Ok(());
        }
        tracing::info!(guild = %guild_id, "Clearing music stats");

        let db = music_db(ctx)?;
        match db.clear_music_stats(&guild_id) {
            Ok(deleted) => {
                let plural = if deleted == 1 { "" } else { "s" };
                client
                    .reply(
                        message,
                        &format!(
                            "✅ Cleared {} music stats record{} for this server.",
                            deleted, plural
                        ),
                    )
                    .await?;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to clear music stats");
                client
                    .reply(message, &format!("Failed to clear music stats: {}", e))
                    .await?;
            }
        }
        Ok(())
    }
}
