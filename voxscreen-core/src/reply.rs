//! Reply generation.
//!
//! `ReplyProvider` is stateless: every call gets the whole transcript, ending
//! with the candidate turn being answered.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::conversation::ConversationTurn;
use crate::error::{Result, VoxscreenError};

#[async_trait]
pub trait ReplyProvider: Send + Sync + 'static {
    /// Produce the interviewer's next line.
    async fn reply(&self, turns: &[ConversationTurn]) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct ChatCompletionsConfig {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for ChatCompletionsConfig {
    fn default() -> Self {
        Self {
            url: "https://openrouter.ai/api/v1/chat/completions".into(),
            api_key: String::new(),
            model: "deepseek/deepseek-chat-v3.1".into(),
            max_tokens: 5_000,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ChatReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client.
pub struct ChatCompletionsProvider {
    config: ChatCompletionsConfig,
    http: reqwest::Client,
}

impl ChatCompletionsProvider {
    pub fn new(config: ChatCompletionsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| VoxscreenError::Config(format!("http client: {e}")))?;
        Ok(Self { config, http })
    }
}

fn build_request<'a>(config: &'a ChatCompletionsConfig, turns: &'a [ConversationTurn]) -> ChatRequest<'a> {
    ChatRequest {
        model: &config.model,
        messages: turns
            .iter()
            .map(|t| ChatMessage {
                role: t.role.chat_role(),
                content: &t.text,
            })
            .collect(),
        stream: false,
        max_tokens: config.max_tokens,
    }
}

fn extract_reply(body: ChatResponse) -> Result<String> {
    let text = body
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .unwrap_or_default();
    if text.is_empty() {
        return Err(VoxscreenError::ReplyProvider("empty reply".into()));
    }
    Ok(text)
}

#[async_trait]
impl ReplyProvider for ChatCompletionsProvider {
    async fn reply(&self, turns: &[ConversationTurn]) -> Result<String> {
        let request = build_request(&self.config, turns);
        debug!(turns = turns.len(), model = %self.config.model, "requesting reply");

        let resp = self
            .http
            .post(&self.config.url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| VoxscreenError::ReplyProvider(e.to_string()))?
            .error_for_status()
            .map_err(|e| VoxscreenError::ReplyProvider(e.to_string()))?;

        let body: ChatResponse = resp
            .json()
            .await
            .map_err(|e| VoxscreenError::ReplyProvider(format!("bad response body: {e}")))?;
        extract_reply(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;

    #[test]
    fn request_carries_full_transcript_in_order() {
        let config = ChatCompletionsConfig::default();
        let turns = vec![
            ConversationTurn::new(Role::System, "rules"),
            ConversationTurn::new(Role::Interviewer, "Hello"),
            ConversationTurn::new(Role::Candidate, "Hi"),
        ];
        let json = serde_json::to_value(build_request(&config, &turns)).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["max_tokens"], 5_000);
        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"], "Hi");
    }

    #[test]
    fn reply_is_first_choice_content() {
        let body: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":" Tell me more. "}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_reply(body).unwrap(), "Tell me more.");
    }

    #[test]
    fn missing_content_is_an_error() {
        let body: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(extract_reply(body), Err(VoxscreenError::ReplyProvider(_))));
    }
}
