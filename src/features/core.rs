// ABOUTME: Foundational feature: installs the chat client, dispatches prefix
// ABOUTME: commands, greets the gateway on ready, and provides help/activity.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::commands::{parse_invocation, Command};
use crate::context::Context;
use crate::events::{Event, EventHandler, EventKind};
use crate::feature::{Feature, FeatureService};
use crate::platform::{ChatClient, ChatMessage, ClientEvent};

/// Presence text limit imposed by the platform.
pub const MAX_ACTIVITY_LEN: usize = 128;

/// Truncate to `max` characters, appending "..." when cut.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Presence management published as the "activity" service.
pub struct ActivityService {
    client: Arc<dyn ChatClient>,
}

impl ActivityService {
    pub fn new(client: Arc<dyn ChatClient>) -> Self {
        Self { client }
    }

    /// Set or clear the bot's activity text. Best-effort: failures are logged.
    pub async fn set(&self, activity: Option<&str>) {
        let result = match activity {
            Some(text) => {
                let text = truncate(text, MAX_ACTIVITY_LEN);
                tracing::debug!(activity = %text, "Activity set");
                self.client.set_activity(Some(&text)).await
            }
            None => {
                tracing::debug!("Activity cleared");
                self.client.set_activity(None).await
            }
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to update activity");
        }
    }
}

/// The foundational feature. Always loads first; every other feature
/// implicitly depends on it.
pub struct CoreFeature {
    client: Arc<dyn ChatClient>,
}

impl CoreFeature {
    pub fn new(client: Arc<dyn ChatClient>) -> Arc<Self> {
        Arc::new(Self { client })
    }
}

#[async_trait]
impl Feature for CoreFeature {
    fn name(&self) -> &'static str {
        "core"
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &[]
    }

    async fn init(&self, ctx: &mut Context) -> Result<()> {
        tracing::info!(platform = %self.client.platform_id(), "Installing chat client");
        ctx.install_client(Arc::clone(&self.client));
        Ok(())
    }

    fn service(&self, ctx: &Context) -> Option<Result<FeatureService>> {
        let service = ctx.client().map(|client| FeatureService {
            name: "activity",
            service: Arc::new(ActivityService::new(client)),
        });
        Some(service)
    }

    fn commands(&self) -> Vec<Arc<dyn Command>> {
        vec![Arc::new(HelpCommand)]
    }

    fn event_handlers(&self) -> Vec<Arc<dyn EventHandler>> {
        vec![Arc::new(ReadyHandler), Arc::new(CommandDispatchHandler)]
    }
}

/// Logs the connected identity once the gateway session is up.
struct ReadyHandler;

#[async_trait]
impl EventHandler for ReadyHandler {
    fn kind(&self) -> EventKind {
        EventKind::Ready
    }

    async fn handle(&self, event: &Event, _ctx: &Arc<Context>) -> Result<bool> {
        if let Event::Client(ClientEvent::Ready { user }) = event {
            tracing::info!(user = %user.name(), "Chat client ready");
        }
        Ok(false)
    }
}

/// Parses prefix commands out of incoming messages and runs them.
///
/// Registered first so reply-tracking handlers in later features see messages
/// after command parsing has happened. Returns `true` whenever a command was
/// found and attempted, even if it failed.
pub struct CommandDispatchHandler;

#[async_trait]
impl EventHandler for CommandDispatchHandler {
    fn kind(&self) -> EventKind {
        EventKind::MessageCreate
    }

    async fn handle(&self, event: &Event, ctx: &Arc<Context>) -> Result<bool> {
        let Event::Client(ClientEvent::MessageCreate(message)) = event else {
            return Ok(false);
        };

        if message.author_is_bot {
            return Ok(false);
        }

        let Some(invocation) = parse_invocation(&message.content, ctx.prefix()) else {
            return Ok(false);
        };

        let Some(registered) = ctx.commands().get(&invocation.name) else {
            tracing::debug!(command = %invocation.name, "Unknown command");
            return Ok(false);
        };

        tracing::info!(
            command = %invocation.name,
            user = %message.author.name(),
            feature = %registered.feature,
            "Executing command"
        );

        if let Err(e) = registered
            .command
            .execute(message, &invocation.args, ctx)
            .await
        {
            tracing::error!(
                error = %e,
                command = %invocation.name,
                feature = %registered.feature,
                "Command failed"
            );
            // Best-effort error notice; a failed reply is only logged.
            if let Ok(client) = ctx.client() {
                if let Err(reply_err) = client
                    .reply(message, &format!("Something went wrong: {}", e))
                    .await
                {
                    tracing::debug!(error = %reply_err, "Could not deliver error reply");
                }
            }
        }

        Ok(true)
    }
}

/// Lists every registered command with its aliases.
struct HelpCommand;

#[async_trait]
impl Command for HelpCommand {
    fn name(&self) -> &'static str {
        "help"
    }

    async fn execute(
        &self,
        message: &ChatMessage,
        _args: &[String],
        ctx: &Arc<Context>,
    ) -> Result<()> {
        let client = ctx.client()?;
        let registry = ctx.commands();

        if registry.is_empty() {
            client.reply(message, "No commands registered.").await?;
            return Ok(());
        }

        let prefix = ctx.prefix();
        let lines: Vec<String> = registry
            .unique_commands()
            .iter()
            .map(|registered| {
                let aliases = registered.command.aliases();
                if aliases.is_empty() {
                    format!("{}{}", prefix, registered.command.name())
                } else {
                    format!(
                        "{}{} ({})",
                        prefix,
                        registered.command.name(),
                        aliases.join(", ")
                    )
                }
            })
            .collect();

        let text = format!("**Registered commands:**\n```\n{}\n```", lines.join("\n"));
        client.reply(message, &text).await?;
        Ok(())
    }
}
