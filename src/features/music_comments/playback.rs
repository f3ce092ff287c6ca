// ABOUTME: Pure formatting and ordering for comment/reaction playback:
// ABOUTME: the merged timeline, message lines, header, and truncation rules.

use crate::features::music_stats::{TrackComment, TrackReaction};

/// Thread name for playback (platform limit 100 chars).
pub const PLAYBACK_THREAD_NAME: &str = "Comments";

/// Comment text limit before truncation. URLs are exempt.
pub const MAX_COMMENT_LENGTH: usize = 200;

/// Zero-width space: a blank message used as vertical spacing.
pub const SPACER: &str = "\u{200B}";

fn is_url_line(line: &str) -> bool {
    line.starts_with("http://") || line.starts_with("https://")
}

/// Truncate to `max` characters per line. Lines that are URLs pass through
/// untouched so links stay clickable.
pub fn truncate_comment_text(text: &str, max: usize) -> String {
    if is_url_line(text) {
        return text.to_string();
    }
    if text.contains('\n') {
        return text
            .split('\n')
            .map(|line| {
                if is_url_line(line) {
                    line.to_string()
                } else {
                    truncate_line(line, max)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
    }
    truncate_line(text, max)
}

fn truncate_line(line: &str, max: usize) -> String {
    if line.chars().count() <= max {
        return line.to_string();
    }
    let kept: String = line.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// One entry of the merged playback timeline.
pub enum TimelineItem {
    Comment(TrackComment),
    Reaction(TrackReaction),
}

impl TimelineItem {
    pub fn offset_ms(&self) -> i64 {
        match self {
            Self::Comment(c) => c.offset_ms,
            Self::Reaction(r) => r.offset_ms,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Comment(_) => 0,
            Self::Reaction(_) => 1,
        }
    }
}

/// Merge comments and reactions into one offset-ordered timeline.
/// A comment and a reaction at the same offset play comment first.
pub fn merge_timeline(
    comments: Vec<TrackComment>,
    reactions: Vec<TrackReaction>,
) -> Vec<TimelineItem> {
    let mut items: Vec<TimelineItem> = comments
        .into_iter()
        .map(TimelineItem::Comment)
        .chain(reactions.into_iter().map(TimelineItem::Reaction))
        .collect();
    items.sort_by_key(|item| (item.offset_ms(), item.rank()));
    items
}

/// Playback line for a comment: attribution, truncated text, then any URL
/// lines verbatim on their own lines.
pub fn format_comment_line(comment: &TrackComment) -> String {
    let mut text_parts = Vec::new();
    let mut url_parts = Vec::new();
    for line in comment.text.split('\n') {
        if is_url_line(line) {
            url_parts.push(line);
        } else if !line.trim().is_empty() {
            text_parts.push(line);
        }
    }

    let mut message = format!("💬 **{}:**", comment.user_name);
    if !text_parts.is_empty() {
        message.push(' ');
        message.push_str(&truncate_comment_text(
            &text_parts.join(" "),
            MAX_COMMENT_LENGTH,
        ));
    }
    if !url_parts.is_empty() {
        message.push('\n');
        message.push_str(&url_parts.join("\n"));
    }
    message
}

/// Playback line for a reaction: EMOJI EMOJI  USERNAME  EMOJI EMOJI.
pub fn format_reaction_line(reaction: &TrackReaction) -> String {
    let emoji = &reaction.emoji;
    format!(
        "{} {}  {}  {} {}",
        emoji,
        emoji,
        reaction.user_name.to_uppercase(),
        emoji,
        emoji
    )
}

/// Headline sent before the timeline plays.
pub fn playback_header(track_title: &str) -> String {
    format!(
        "**⚡ REACTIONS TO {}:**",
        display_title(track_title).to_uppercase()
    )
}

/// Title for display: trimmed, trailing colon stripped, "Track" fallback.
fn display_title(title: &str) -> String {
    let trimmed = title.trim();
    let stripped = match trimmed.strip_suffix(':') {
        Some(rest) => rest.trim_end(),
        None => trimmed,
    };
    if stripped.is_empty() {
        "Track".to_string()
    } else {
        stripped.to_string()
    }
}

/// Playback offset as m:ss for logs.
pub fn format_offset(offset_ms: i64) -> String {
    let minutes = offset_ms / 60_000;
    let seconds = (offset_ms % 60_000) / 1_000;
    format!("{}:{:02}", minutes, seconds)
}
