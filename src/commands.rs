// ABOUTME: Prefix command parsing and the name/alias command registry.
// ABOUTME: Platform-agnostic #command handling shared by every feature.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::Context;
use crate::platform::ChatMessage;

/// A parsed command invocation from a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Case-folded command name (may be empty when the message is just the prefix).
    pub name: String,
    /// Whitespace-separated positional arguments after the name.
    pub args: Vec<String>,
}

/// Parse a message body into a command invocation.
///
/// Returns `None` when the body does not start with the prefix, meaning the
/// message is not a command at all. A body that is only the prefix parses to
/// an empty name, which will fail lookup and be logged at debug level.
pub fn parse_invocation(body: &str, prefix: &str) -> Option<Invocation> {
    let rest = body.strip_prefix(prefix)?;
    let mut tokens = rest.split_whitespace();
    let name = tokens.next().unwrap_or("").to_lowercase();
    let args = tokens.map(|t| t.to_string()).collect();
    Some(Invocation { name, args })
}

/// Refuse the command unless the author is an administrator in the room.
///
/// Returns whether execution may proceed; the refusal reply has already been
/// sent when it may not.
pub async fn require_admin(message: &ChatMessage, ctx: &Arc<Context>) -> Result<bool> {
    if message.author_is_admin {
        return Ok(true);
    }
    tracing::debug!(user = %message.author.name(), "Refused: user lacks Administrator");
    ctx.client()?
        .reply(
            message,
            "🛑 You need the 'Administrator' permission to use this command.",
        )
        .await?;
    Ok(false)
}

/// Room id of a guild message, refusing with a reply when sent in a DM.
pub async fn require_server(message: &ChatMessage, ctx: &Arc<Context>) -> Result<Option<String>> {
    match &message.guild_id {
        Some(guild_id) => Ok(Some(guild_id.clone())),
        None => {
            ctx.client()?
                .reply(message, "This command only works in a server.")
                .await?;
            Ok(None)
        }
    }
}

/// One command contributed by a feature.
#[async_trait]
pub trait Command: Send + Sync {
    /// Primary name, matched case-insensitively.
    fn name(&self) -> &'static str;

    /// Alternate names resolving to the same command.
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    /// Declared permission requirements. Informational: command bodies
    /// perform their own checks against the platform.
    fn permissions(&self) -> &'static [&'static str] {
        &[]
    }

    async fn execute(
        &self,
        message: &ChatMessage,
        args: &[String],
        ctx: &Arc<Context>,
    ) -> Result<()>;
}

/// A command tagged with the feature that registered it.
#[derive(Clone)]
pub struct RegisteredCommand {
    pub feature: String,
    pub command: Arc<dyn Command>,
}

/// Map from name or alias to command, built during feature load.
///
/// Keys are case-folded. Registering an already-used key overwrites it and
/// logs a warning naming both features: last registration wins.
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Arc<RegisteredCommand>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command's primary name and every alias for `feature`.
    pub fn register(&mut self, feature: &str, command: Arc<dyn Command>) {
        let registered = Arc::new(RegisteredCommand {
            feature: feature.to_string(),
            command: Arc::clone(&command),
        });

        let mut keys = vec![command.name()];
        keys.extend(command.aliases());
        for key in keys {
            let folded = key.to_lowercase();
            if let Some(previous) = self
                .commands
                .insert(folded.clone(), Arc::clone(&registered))
            {
                tracing::warn!(
                    command = %folded,
                    previous_feature = %previous.feature,
                    feature = %feature,
                    "Command name already registered, overwriting"
                );
            }
        }
    }

    /// Case-insensitive lookup by name or alias.
    pub fn get(&self, name: &str) -> Option<Arc<RegisteredCommand>> {
        self.commands.get(&name.to_lowercase()).cloned()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Commands deduplicated by primary name, sorted for display.
    pub fn unique_commands(&self) -> Vec<Arc<RegisteredCommand>> {
        let mut by_name: HashMap<&str, Arc<RegisteredCommand>> = HashMap::new();
        for registered in self.commands.values() {
            by_name
                .entry(registered.command.name())
                .or_insert_with(|| Arc::clone(registered));
        }
        let mut list: Vec<_> = by_name.into_values().collect();
        list.sort_by_key(|r| r.command.name());
        list
    }
}
