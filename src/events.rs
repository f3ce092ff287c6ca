// ABOUTME: Event taxonomy shared by the router and feature handlers.
// ABOUTME: Wraps client and player payloads in one Event type with a kind/target discriminant.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::context::Context;
use crate::platform::ClientEvent;
use crate::player::PlayerEvent;

/// Which emitter a handler binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchTarget {
    /// The chat-platform connection.
    Client,
    /// The media-queue engine.
    Player,
}

/// Discriminant over every event the bot routes.
///
/// The target is a property of the kind, so handlers never declare it and no
/// name-set lookup is needed to tell player events from client events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Ready,
    MessageCreate,
    ReactionAdd,
    TrackStart,
    TrackFinish,
    PlayerError,
    QueueEmpty,
    QueueDelete,
}

impl EventKind {
    pub fn target(self) -> DispatchTarget {
        match self {
            Self::Ready | Self::MessageCreate | Self::ReactionAdd => DispatchTarget::Client,
            Self::TrackStart
            | Self::TrackFinish
            | Self::PlayerError
            | Self::QueueEmpty
            | Self::QueueDelete => DispatchTarget::Player,
        }
    }

    /// Event name for logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::MessageCreate => "message_create",
            Self::ReactionAdd => "reaction_add",
            Self::TrackStart => "track_start",
            Self::TrackFinish => "track_finish",
            Self::PlayerError => "player_error",
            Self::QueueEmpty => "queue_empty",
            Self::QueueDelete => "queue_delete",
        }
    }
}

/// One routed event occurrence with its payload.
#[derive(Clone)]
pub enum Event {
    Client(ClientEvent),
    Player(PlayerEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Client(ClientEvent::Ready { .. }) => EventKind::Ready,
            Self::Client(ClientEvent::MessageCreate(_)) => EventKind::MessageCreate,
            Self::Client(ClientEvent::ReactionAdd { .. }) => EventKind::ReactionAdd,
            Self::Player(PlayerEvent::TrackStart { .. }) => EventKind::TrackStart,
            Self::Player(PlayerEvent::TrackFinish { .. }) => EventKind::TrackFinish,
            Self::Player(PlayerEvent::PlayerError { .. }) => EventKind::PlayerError,
            Self::Player(PlayerEvent::QueueEmpty { .. }) => EventKind::QueueEmpty,
            Self::Player(PlayerEvent::QueueDelete { .. }) => EventKind::QueueDelete,
        }
    }

    pub fn target(&self) -> DispatchTarget {
        self.kind().target()
    }
}

/// A feature-owned handler for one event kind.
///
/// The returned bool reports whether the handler considered the event
/// handled; it is informational only and never short-circuits dispatch.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn kind(&self) -> EventKind;

    async fn handle(&self, event: &Event, ctx: &Arc<Context>) -> Result<bool>;
}
