// ABOUTME: Routes client and player events to feature handlers in load order.
// ABOUTME: Handlers run sequentially per firing; one failure never stops the rest.

use std::collections::HashMap;
use std::sync::Arc;
use tokio_stream::StreamExt;

use crate::context::Context;
use crate::events::{DispatchTarget, Event, EventHandler, EventKind};
use crate::platform::ClientEventStream;
use crate::player::PlayerEventStream;

/// A handler tagged with the feature that contributed it.
pub struct HandlerEntry {
    pub feature: String,
    pub handler: Arc<dyn EventHandler>,
}

/// Immutable routing table built once after every feature has loaded.
///
/// Handlers for the same event kind fire sequentially in feature load order:
/// the foundational command dispatcher sees a message before any feature's
/// reply-tracking handler does. A handler returning `true` marks the event as
/// handled for logging only; it never stops later handlers from running.
pub struct EventRouter {
    routes: HashMap<EventKind, Vec<HandlerEntry>>,
}

impl EventRouter {
    /// Build the table from `(feature, handler)` pairs in load order.
    pub fn new(handlers: Vec<(String, Arc<dyn EventHandler>)>) -> Self {
        let mut routes: HashMap<EventKind, Vec<HandlerEntry>> = HashMap::new();
        for (feature, handler) in handlers {
            routes
                .entry(handler.kind())
                .or_default()
                .push(HandlerEntry { feature, handler });
        }
        Self { routes }
    }

    pub fn handler_count(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    fn count_for_target(&self, target: DispatchTarget) -> usize {
        self.routes
            .iter()
            .filter(|(kind, _)| kind.target() == target)
            .map(|(_, entries)| entries.len())
            .sum()
    }

    /// Run every handler registered for this event's kind.
    ///
    /// Each invocation is individually isolated: a handler error is logged
    /// with the owning feature and the event name, then dispatch moves on.
    pub async fn dispatch(&self, event: &Event, ctx: &Arc<Context>) {
        let kind = event.kind();
        let Some(entries) = self.routes.get(&kind) else {
            return;
        };
        for entry in entries {
            match entry.handler.handle(event, ctx).await {
                Ok(true) => {
                    tracing::trace!(
                        feature = %entry.feature,
                        event = %kind.name(),
                        "Event handled"
                    );
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        feature = %entry.feature,
                        event = %kind.name(),
                        "Event handler failed"
                    );
                }
            }
        }
    }

    /// Spawn a consumer loop per emitter stream.
    ///
    /// When no player stream exists, player-targeted handlers are skipped
    /// with a warning naming how many; the bot runs fine without media.
    pub fn wire(
        self: Arc<Self>,
        ctx: Arc<Context>,
        client_events: ClientEventStream,
        player_events: Option<PlayerEventStream>,
    ) {
        let router = Arc::clone(&self);
        let client_ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            let mut stream = client_events;
            while let Some(client_event) = stream.next().await {
                let event = Event::Client(client_event);
                router.dispatch(&event, &client_ctx).await;
            }
            tracing::warn!("Client event stream ended");
        });

        match player_events {
            Some(player_events) => {
                let router = Arc::clone(&self);
                tokio::spawn(async move {
                    let mut stream = player_events;
                    while let Some(player_event) = stream.next().await {
                        let event = Event::Player(player_event);
                        router.dispatch(&event, &ctx).await;
                    }
                    tracing::warn!("Player event stream ended");
                });
            }
            None => {
                let skipped = self.count_for_target(DispatchTarget::Player);
                if skipped > 0 {
                    tracing::warn!(
                        skipped_handlers = skipped,
                        "No media player loaded, player event handlers will not fire"
                    );
                }
            }
        }
    }
}
