// ABOUTME: Text generation provider abstraction and the OpenAI-compatible client.
// ABOUTME: Features ask for completions without caring which API backs them.

use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Per-request options for a text generation round trip.
#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    /// Instruction prepended as the system message.
    pub system_instruction: Option<String>,
}

/// Something that can answer a prompt with generated text.
#[async_trait]
pub trait TextProvider: Send + Sync {
    async fn ask(&self, prompt: &str, options: &AskOptions) -> Result<String>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatRequestMessage<'a>>,
}

#[derive(Serialize)]
struct ChatRequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// Client for any OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct OpenAiProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl TextProvider for OpenAiProvider {
    async fn ask(&self, prompt: &str, options: &AskOptions) -> Result<String> {
        let mut messages = Vec::new();
        if let Some(system) = &options.system_instruction {
            messages.push(ChatRequestMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatRequestMessage {
            role: "user",
            content: prompt,
        });

        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(model = %self.model, "Sending chat completion request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages,
            })
            .send()
            .await
            .context("Failed to reach text provider")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Text provider returned {}: {}", status, body);
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse text provider response")?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .context("Text provider returned no choices")?;
        Ok(choice.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_puts_system_message_first() {
        let request = ChatRequest {
            model: "gpt-4o-mini",
            messages: vec![
                ChatRequestMessage {
                    role: "system",
                    content: "be brief",
                },
                ChatRequestMessage {
                    role: "user",
                    content: "hi",
                },
            ],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
    }

    #[test]
    fn response_parses_first_choice_content() {
        let body = r#"{
            "choices": [
                {"message": {"role": "assistant", "content": "hello there"}}
            ]
        }"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content, "hello there");
    }

    #[test]
    fn trailing_slash_is_normalized() {
        let provider = OpenAiProvider::new("https://api.example.com/v1/", "key", "model");
        assert_eq!(provider.base_url, "https://api.example.com/v1");
    }
}
