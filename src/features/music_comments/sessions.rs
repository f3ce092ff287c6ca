// ABOUTME: Per-room comment session lifecycle: reply/reaction recording against
// ABOUTME: the anchor message, and cancellable scheduled playback of the timeline.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use crate::features::music_stats::MusicDb;
use crate::platform::{ChatClient, ChatMessage, ChatReaction, ChatUser};

use super::playback::{
    format_comment_line, format_offset, format_reaction_line, merge_timeline, playback_header,
    TimelineItem, PLAYBACK_THREAD_NAME, SPACER,
};

/// One room's active session: the anchor message being watched plus the
/// timers driving scheduled playback.
struct CommentSession {
    anchor: ChatMessage,
    track_url: String,
    track_title: String,
    started_at: Instant,
    thread_id: Option<String>,
    timers: Vec<JoinHandle<()>>,
}

/// Snapshot of a session for command-side checks.
pub struct ActiveSession {
    pub anchor_message_id: String,
    pub track_url: String,
}

/// Session table, at most one session per room.
///
/// Published as the "comments" service. All awaiting happens outside the
/// table lock; playback tasks are spawned while it is held so cancellation
/// handles land in the session atomically.
pub struct CommentSessions {
    sessions: Mutex<HashMap<String, CommentSession>>,
}

impl Default for CommentSessions {
    fn default() -> Self {
        Self::new()
    }
}

impl CommentSessions {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn table(&self) -> Result<MutexGuard<'_, HashMap<String, CommentSession>>> {
        self.sessions
            .lock()
            .map_err(|e| anyhow::anyhow!("Session table mutex poisoned: {}", e))
    }

    /// Start a session for this room; any previous session is stopped and its
    /// pending playback cancelled.
    pub fn start_session(
        &self,
        guild_id: &str,
        anchor: ChatMessage,
        track_url: &str,
        track_title: &str,
    ) -> Result<()> {
        self.stop_session(guild_id)?;

        let anchor_id = anchor.id.clone();
        let session = CommentSession {
            anchor,
            track_url: track_url.to_string(),
            track_title: track_title.to_string(),
            started_at: Instant::now(),
            thread_id: None,
            timers: Vec::new(),
        };
        self.table()?.insert(guild_id.to_string(), session);
        tracing::info!(guild = %guild_id, anchor = %anchor_id, "Started comment session");
        Ok(())
    }

    /// Stop the room's session and abort every scheduled playback task.
    /// A no-op when no session exists.
    pub fn stop_session(&self, guild_id: &str) -> Result<()> {
        let removed = self.table()?.remove(guild_id);
        if let Some(session) = removed {
            let cancelled = session.timers.len();
            for timer in &session.timers {
                timer.abort();
            }
            tracing::info!(guild = %guild_id, cancelled, "Stopped comment session");
        }
        Ok(())
    }

    pub fn active_session(&self, guild_id: &str) -> Result<Option<ActiveSession>> {
        let table = self.table()?;
        Ok(table.get(guild_id).map(|session| ActiveSession {
            anchor_message_id: session.anchor.id.clone(),
            track_url: session.track_url.clone(),
        }))
    }

    fn store_thread(&self, guild_id: &str, anchor_id: &str, thread_id: Option<String>) -> Result<()> {
        let mut table = self.table()?;
        if let Some(session) = table.get_mut(guild_id) {
            // The session may have been replaced while we talked to the platform.
            if session.anchor.id == anchor_id {
                session.thread_id = thread_id;
            }
        }
        Ok(())
    }

    /// Attach a playback thread to the anchor message when the track has any
    /// stored comments or reactions. Reuses an existing thread; falls back to
    /// the anchor's channel when thread creation fails.
    pub async fn ensure_playback_thread(
        &self,
        guild_id: &str,
        client: &Arc<dyn ChatClient>,
        db: &MusicDb,
    ) -> Result<Option<String>> {
        let (anchor, track_url) = {
            let table = self.table()?;
            let Some(session) = table.get(guild_id) else {
                return Ok(None);
            };
            (session.anchor.clone(), session.track_url.clone())
        };

        let comments = db.get_track_comments(&track_url, guild_id)?;
        let reactions = db.get_track_reactions(&track_url, guild_id)?;
        if comments.is_empty() && reactions.is_empty() {
            return Ok(None);
        }

        match client.existing_thread(&anchor.channel_id, &anchor.id).await {
            Ok(Some(thread_id)) => {
                tracing::debug!(thread = %thread_id, "Using existing thread for playback");
                self.store_thread(guild_id, &anchor.id, Some(thread_id.clone()))?;
                return Ok(Some(thread_id));
            }
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "Thread lookup failed"),
        }

        match client
            .create_thread(&anchor.channel_id, &anchor.id, PLAYBACK_THREAD_NAME)
            .await
        {
            Ok(thread_id) => {
                tracing::info!(guild = %guild_id, thread = %thread_id, "Created playback thread");
                self.store_thread(guild_id, &anchor.id, Some(thread_id.clone()))?;
                Ok(Some(thread_id))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not create playback thread, using channel");
                self.store_thread(guild_id, &anchor.id, None)?;
                Ok(None)
            }
        }
    }

    /// Schedule the track's merged comment/reaction timeline.
    ///
    /// Sends a headline immediately, then each item at its recorded offset
    /// from session start, into the playback thread when one exists. Every
    /// spawned task's handle is kept on the session for cancellation.
    pub async fn schedule_playback(
        &self,
        guild_id: &str,
        client: Arc<dyn ChatClient>,
        db: &MusicDb,
    ) -> Result<()> {
        let (anchor, track_url) = {
            let table = self.table()?;
            let Some(session) = table.get(guild_id) else {
                return Ok(());
            };
            (session.anchor.clone(), session.track_url.clone())
        };

        let comments = db.get_track_comments(&track_url, guild_id)?;
        let reactions = db.get_track_reactions(&track_url, guild_id)?;
        let comment_count = comments.len();
        let reaction_count = reactions.len();
        let items = merge_timeline(comments, reactions);
        if items.is_empty() {
            tracing::debug!(track = %track_url, "No comments or reactions to play back");
            return Ok(());
        }

        let mut table = self.table()?;
        let Some(session) = table.get_mut(guild_id) else {
            return Ok(());
        };
        if session.anchor.id != anchor.id {
            return Ok(());
        }

        let target = session
            .thread_id
            .clone()
            .unwrap_or_else(|| anchor.channel_id.clone());
        tracing::info!(
            comments = comment_count,
            reactions = reaction_count,
            destination = if session.thread_id.is_some() { "thread" } else { "channel" },
            "Scheduling comment playback"
        );

        let header = playback_header(&session.track_title);
        {
            let client = Arc::clone(&client);
            let target = target.clone();
            session.timers.push(tokio::spawn(async move {
                for text in [SPACER, header.as_str(), SPACER] {
                    if let Err(e) = client.send_message(&target, text).await {
                        tracing::warn!(error = %e, "Failed to send reactions headline");
                        return;
                    }
                }
            }));
        }

        for item in items {
            let delay = Duration::from_millis(item.offset_ms().max(0) as u64);
            let client = Arc::clone(&client);
            let target = target.clone();
            let anchor_channel = anchor.channel_id.clone();
            let anchor_id = anchor.id.clone();
            session.timers.push(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                match item {
                    TimelineItem::Comment(comment) => {
                        let text = format_comment_line(&comment);
                        if let Err(e) = client.send_message(&target, &text).await {
                            tracing::warn!(error = %e, "Failed to send playback");
                            return;
                        }
                        if let Err(e) = client.send_message(&target, SPACER).await {
                            tracing::warn!(error = %e, "Failed to send playback");
                        }
                    }
                    TimelineItem::Reaction(reaction) => {
                        let line = format_reaction_line(&reaction);
                        if let Err(e) = client.send_message(&target, &line).await {
                            tracing::warn!(error = %e, "Failed to send playback");
                            return;
                        }
                        if let Err(e) = client.send_message(&target, SPACER).await {
                            tracing::warn!(error = %e, "Failed to send playback");
                            return;
                        }
                        if let Err(e) = client
                            .add_reaction(&anchor_channel, &anchor_id, &reaction.emoji)
                            .await
                        {
                            tracing::debug!(error = %e, "Could not add reaction to enqueued message");
                        }
                    }
                }
            }));
        }

        Ok(())
    }

    /// Record a reply to the anchor message as a track comment.
    ///
    /// Returns whether the message belonged to this session. An empty reply
    /// (no text after trimming, no attachments) is handled but not stored.
    pub async fn handle_potential_reply(
        &self,
        message: &ChatMessage,
        prefix: &str,
        client: &Arc<dyn ChatClient>,
        db: &MusicDb,
    ) -> Result<bool> {
        if message.author_is_bot {
            return Ok(false);
        }
        if message.content.starts_with(prefix) {
            return Ok(false);
        }
        let Some(replied_to) = &message.replied_to else {
            return Ok(false);
        };
        let Some(guild_id) = &message.guild_id else {
            return Ok(false);
        };

        let (track_url, offset_ms) = {
            let table = self.table()?;
            let Some(session) = table.get(guild_id) else {
                return Ok(false);
            };
            if session.anchor.id != *replied_to {
                return Ok(false);
            }
            (
                session.track_url.clone(),
                session.started_at.elapsed().as_millis() as i64,
            )
        };

        let mut comment_text = message.content.trim().to_string();
        for urls in [&message.attachment_urls, &message.sticker_urls] {
            if urls.is_empty() {
                continue;
            }
            let joined = urls.join("\n");
            if comment_text.is_empty() {
                comment_text = joined;
            } else {
                comment_text.push('\n');
                comment_text.push_str(&joined);
            }
        }

        if comment_text.is_empty() {
            tracing::debug!(user = %message.author.name(), "Ignored empty reply");
            return Ok(true);
        }

        match db.save_track_comment(
            &track_url,
            guild_id,
            &message.author.id,
            message.author.name(),
            &comment_text,
            offset_ms,
        ) {
            Ok(()) => {
                tracing::info!(
                    user = %message.author.name(),
                    at = %format_offset(offset_ms),
                    "Recorded track comment"
                );
                if let Err(e) = client
                    .add_reaction(&message.channel_id, &message.id, "💬")
                    .await
                {
                    tracing::debug!(error = %e, "Could not acknowledge comment");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to save comment"),
        }

        Ok(true)
    }

    /// Record a reaction on the anchor message with its playback offset.
    /// Returns whether the reaction belonged to this session.
    pub fn handle_reaction_add(
        &self,
        reaction: &ChatReaction,
        user: &ChatUser,
        user_is_bot: bool,
        db: &MusicDb,
    ) -> Result<bool> {
        if user_is_bot {
            return Ok(false);
        }
        let Some(guild_id) = &reaction.guild_id else {
            return Ok(false);
        };

        let (track_url, offset_ms) = {
            let table = self.table()?;
            let Some(session) = table.get(guild_id) else {
                return Ok(false);
            };
            if session.anchor.id != reaction.message_id {
                return Ok(false);
            }
            (
                session.track_url.clone(),
                session.started_at.elapsed().as_millis() as i64,
            )
        };

        match db.save_track_reaction(
            &track_url,
            guild_id,
            &user.id,
            user.name(),
            &reaction.emoji,
            offset_ms,
        ) {
            Ok(()) => tracing::info!(
                user = %user.name(),
                emoji = %reaction.emoji,
                at = %format_offset(offset_ms),
                "Recorded track reaction"
            ),
            Err(e) => tracing::error!(error = %e, "Failed to save reaction"),
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::RecordingClient;
    use crate::store::Store;

    fn memory_db() -> MusicDb {
        let store = Store::open_in_memory().unwrap();
        MusicDb::open(&store).unwrap()
    }

    fn anchor_message() -> ChatMessage {
        let mut anchor = ChatMessage::new(
            "anchor-1",
            "chan",
            ChatUser::new("bot-user"),
            "**Song** enqueued!",
        );
        anchor.guild_id = Some("g1".to_string());
        anchor.author_is_bot = true;
        anchor
    }

    fn reply_to_anchor(content: &str) -> ChatMessage {
        let mut message =
            ChatMessage::new("reply-1", "chan", ChatUser::with_name("u1", "zen"), content);
        message.guild_id = Some("g1".to_string());
        message.replied_to = Some("anchor-1".to_string());
        message
    }

    fn started_sessions() -> CommentSessions {
        let sessions = CommentSessions::new();
        sessions
            .start_session("g1", anchor_message(), "url-a", "Daft Punk")
            .unwrap();
        sessions
    }

    #[tokio::test]
    async fn one_session_per_room() {
        let sessions = started_sessions();

        let mut second = anchor_message();
        second.id = "anchor-2".to_string();
        sessions
            .start_session("g1", second, "url-b", "Other")
            .unwrap();

        let active = sessions.active_session("g1").unwrap().unwrap();
        assert_eq!(active.anchor_message_id, "anchor-2");
        assert_eq!(active.track_url, "url-b");
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let sessions = started_sessions();
        sessions.stop_session("g1").unwrap();
        sessions.stop_session("g1").unwrap();
        assert!(sessions.active_session("g1").unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn replies_record_offsets_from_session_start() {
        let sessions = started_sessions();
        let client = RecordingClient::new();
        let db = memory_db();

        tokio::time::advance(Duration::from_millis(65_000)).await;

        let handled = sessions
            .handle_potential_reply(
                &reply_to_anchor("this part rules"),
                "#",
                &(Arc::clone(&client) as Arc<dyn ChatClient>),
                &db,
            )
            .await
            .unwrap();

        assert!(handled);
        let comments = db.get_track_comments("url-a", "g1").unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].offset_ms, 65_000);
        assert_eq!(comments[0].text, "this part rules");
        // Ack react lands on the reply itself.
        assert_eq!(client.reactions(), [("reply-1".to_string(), "💬".to_string())]);
    }

    #[tokio::test]
    async fn replies_that_do_not_belong_are_ignored() {
        let sessions = started_sessions();
        let client: Arc<dyn ChatClient> = RecordingClient::new();
        let db = memory_db();

        let mut bot_reply = reply_to_anchor("beep");
        bot_reply.author_is_bot = true;
        assert!(!sessions
            .handle_potential_reply(&bot_reply, "#", &client, &db)
            .await
            .unwrap());

        assert!(!sessions
            .handle_potential_reply(&reply_to_anchor("#play next"), "#", &client, &db)
            .await
            .unwrap());

        let mut not_a_reply = reply_to_anchor("hi");
        not_a_reply.replied_to = None;
        assert!(!sessions
            .handle_potential_reply(&not_a_reply, "#", &client, &db)
            .await
            .unwrap());

        let mut wrong_anchor = reply_to_anchor("hi");
        wrong_anchor.replied_to = Some("other-message".to_string());
        assert!(!sessions
            .handle_potential_reply(&wrong_anchor, "#", &client, &db)
            .await
            .unwrap());

        sessions.stop_session("g1").unwrap();
        assert!(!sessions
            .handle_potential_reply(&reply_to_anchor("hi"), "#", &client, &db)
            .await
            .unwrap());

        assert!(db.get_track_comments("url-a", "g1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_replies_are_handled_but_not_stored() {
        let sessions = started_sessions();
        let client: Arc<dyn ChatClient> = RecordingClient::new();
        let db = memory_db();

        let handled = sessions
            .handle_potential_reply(&reply_to_anchor("   "), "#", &client, &db)
            .await
            .unwrap();

        assert!(handled);
        assert!(db.get_track_comments("url-a", "g1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn attachment_urls_become_comment_text() {
        let sessions = started_sessions();
        let client: Arc<dyn ChatClient> = RecordingClient::new();
        let db = memory_db();

        let mut with_image = reply_to_anchor("");
        with_image.attachment_urls = vec!["https://cdn.example/cat.png".to_string()];
        assert!(sessions
            .handle_potential_reply(&with_image, "#", &client, &db)
            .await
            .unwrap());

        let comments = db.get_track_comments("url-a", "g1").unwrap();
        assert_eq!(comments[0].text, "https://cdn.example/cat.png");
    }

    #[tokio::test(start_paused = true)]
    async fn reactions_on_the_anchor_are_recorded() {
        let sessions = started_sessions();
        let db = memory_db();

        tokio::time::advance(Duration::from_millis(5_000)).await;

        let reaction = ChatReaction {
            message_id: "anchor-1".to_string(),
            channel_id: "chan".to_string(),
            guild_id: Some("g1".to_string()),
            emoji: "🔥".to_string(),
        };
        let user = ChatUser::with_name("u2", "kay");

        assert!(sessions
            .handle_reaction_add(&reaction, &user, false, &db)
            .unwrap());
        // Bot reactions (including our own playback reacts) are ignored.
        assert!(!sessions
            .handle_reaction_add(&reaction, &user, true, &db)
            .unwrap());

        let reactions = db.get_track_reactions("url-a", "g1").unwrap();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].emoji, "🔥");
        assert_eq!(reactions[0].offset_ms, 5_000);
    }

    #[tokio::test]
    async fn thread_is_skipped_without_history() {
        let sessions = started_sessions();
        let client = RecordingClient::new();
        let db = memory_db();

        let thread = sessions
            .ensure_playback_thread("g1", &(Arc::clone(&client) as Arc<dyn ChatClient>), &db)
            .await
            .unwrap();

        assert!(thread.is_none());
        assert!(client.created_threads().is_empty());
    }

    #[tokio::test]
    async fn thread_is_created_for_stored_history() {
        let sessions = started_sessions();
        let client = RecordingClient::new();
        let db = memory_db();
        db.save_track_comment("url-a", "g1", "u1", "zen", "nice", 1_000)
            .unwrap();

        let thread = sessions
            .ensure_playback_thread("g1", &(Arc::clone(&client) as Arc<dyn ChatClient>), &db)
            .await
            .unwrap();

        assert_eq!(thread.as_deref(), Some("thread-anchor-1"));
        assert_eq!(
            client.created_threads(),
            [("anchor-1".to_string(), "Comments".to_string())]
        );
    }

    #[tokio::test]
    async fn existing_thread_is_reused() {
        let sessions = started_sessions();
        let client = RecordingClient::new();
        *client.existing_thread_id.lock().unwrap() = Some("old-thread".to_string());
        let db = memory_db();
        db.save_track_reaction("url-a", "g1", "u1", "zen", "🔥", 1_000)
            .unwrap();

        let thread = sessions
            .ensure_playback_thread("g1", &(Arc::clone(&client) as Arc<dyn ChatClient>), &db)
            .await
            .unwrap();

        assert_eq!(thread.as_deref(), Some("old-thread"));
        assert!(client.created_threads().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn playback_replays_the_timeline_in_order() {
        let sessions = started_sessions();
        let client = RecordingClient::new();
        let db = memory_db();
        db.save_track_comment("url-a", "g1", "u1", "zen", "first", 1_000)
            .unwrap();
        db.save_track_reaction("url-a", "g1", "u2", "kay", "🔥", 2_000)
            .unwrap();
        db.save_track_comment("url-a", "g1", "u1", "zen", "third", 3_000)
            .unwrap();

        sessions
            .ensure_playback_thread("g1", &(Arc::clone(&client) as Arc<dyn ChatClient>), &db)
            .await
            .unwrap();
        sessions
            .schedule_playback("g1", Arc::clone(&client) as Arc<dyn ChatClient>, &db)
            .await
            .unwrap();

        // Let every timer fire.
        tokio::time::sleep(Duration::from_millis(4_000)).await;

        let sent = client.sent();
        let texts: Vec<&str> = sent.iter().map(|(_, text)| text.as_str()).collect();
        assert_eq!(
            texts,
            [
                SPACER,
                "**⚡ REACTIONS TO DAFT PUNK:**",
                SPACER,
                "💬 **zen:** first",
                SPACER,
                "🔥 🔥  KAY  🔥 🔥",
                SPACER,
                "💬 **zen:** third",
                SPACER,
            ]
        );
        // Everything went to the playback thread.
        assert!(sent.iter().all(|(channel, _)| channel == "thread-anchor-1"));
        // The reaction was mirrored onto the anchor message.
        assert_eq!(
            client.reactions(),
            [("anchor-1".to_string(), "🔥".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_cancels_pending_playback() {
        let sessions = started_sessions();
        let client = RecordingClient::new();
        let db = memory_db();
        db.save_track_comment("url-a", "g1", "u1", "zen", "never shown", 10_000)
            .unwrap();

        sessions
            .schedule_playback("g1", Arc::clone(&client) as Arc<dyn ChatClient>, &db)
            .await
            .unwrap();

        // Let the header go out, then kill the session before the comment fires.
        tokio::task::yield_now().await;
        sessions.stop_session("g1").unwrap();
        tokio::time::sleep(Duration::from_millis(15_000)).await;

        let texts: Vec<String> = client.sent().into_iter().map(|(_, text)| text).collect();
        assert!(!texts.iter().any(|t| t.contains("never shown")));
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_a_session_cancels_the_old_timeline() {
        let sessions = started_sessions();
        let client = RecordingClient::new();
        let db = memory_db();
        db.save_track_comment("url-a", "g1", "u1", "zen", "from the old track", 5_000)
            .unwrap();

        sessions
            .schedule_playback("g1", Arc::clone(&client) as Arc<dyn ChatClient>, &db)
            .await
            .unwrap();

        let mut second = anchor_message();
        second.id = "anchor-2".to_string();
        sessions
            .start_session("g1", second, "url-b", "Next Track")
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10_000)).await;

        let texts: Vec<String> = client.sent().into_iter().map(|(_, text)| text).collect();
        assert!(!texts.iter().any(|t| t.contains("from the old track")));
    }
}
