// ABOUTME: AI question answering. Installs the text provider as a shared
// ABOUTME: capability and registers the ask command on top of it.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::commands::Command;
use crate::context::Context;
use crate::feature::Feature;
use crate::features::core::truncate;
use crate::llm::{AskOptions, TextProvider};
use crate::platform::ChatMessage;

/// Platform message cap is 2000 chars. Leave room for formatting.
const MAX_RESPONSE_LENGTH: usize = 1900;

const SYSTEM_INSTRUCTION: &str = "You are a helpful Discord bot assistant. \
    Keep your answers concise and to the point since Discord messages have a \
    character limit. Use markdown formatting that works in Discord (bold, \
    italic, code blocks, etc.).";

pub struct LlmFeature {
    provider: Arc<dyn TextProvider>,
}

impl LlmFeature {
    pub fn new(provider: Arc<dyn TextProvider>) -> Arc<Self> {
        Arc::new(Self { provider })
    }
}

#[async_trait]
impl Feature for LlmFeature {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn init(&self, ctx: &mut Context) -> Result<()> {
        ctx.install_text_provider(Arc::clone(&self.provider));
        tracing::info!("Text provider installed");
        Ok(())
    }

    fn commands(&self) -> Vec<Arc<dyn Command>> {
        vec![Arc::new(AskCommand)]
    }
}

/// Ask the bot a question and get a generated answer.
pub struct AskCommand;

#[async_trait]
impl Command for AskCommand {
    fn name(&self) -> &'static str {
        "ask"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["ai", "gem"]
    }

    async fn execute(
        &self,
        message: &ChatMessage,
        args: &[String],
        ctx: &Arc<Context>,
    ) -> Result<()> {
        let client = ctx.client()?;
        let question = args.join(" ").trim().to_string();
        if question.is_empty() {
            client
                .reply(
                    message,
                    &format!(
                        "Please provide a question. Usage: `{}ask <your question>`",
                        ctx.prefix()
                    ),
                )
                .await?;
            return Ok(());
        }

        let provider = ctx.text_provider()?;
        tracing::info!(
            user = %message.author.name(),
            question = %truncate(&question, 80),
            "Ask received"
        );

        // Typing indicator while the request is in flight.
        if let Err(e) = client.start_typing(&message.channel_id).await {
            tracing::debug!(error = %e, "Could not start typing");
        }

        let options = AskOptions {
            system_instruction: Some(SYSTEM_INSTRUCTION.to_string()),
        };
        let reply = match provider.ask(&question, &options).await {
            Ok(mut answer) => {
                tracing::info!(chars = answer.chars().count(), "Provider answered");
                if answer.chars().count() > MAX_RESPONSE_LENGTH {
                    answer = answer.chars().take(MAX_RESPONSE_LENGTH).collect();
                    answer.push_str("\n\n*…response truncated*");
                }
                answer
            }
            Err(e) => {
                tracing::error!(error = %e, "Text provider request failed");
                "Something went wrong while asking the AI. Please try again later.".to_string()
            }
        };
        client.reply(message, &reply).await?;
        Ok(())
    }
}
