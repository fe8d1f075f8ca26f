//! Support client: emotion analysis and supportive replies for chat messages.
//!
//! Talks to an OpenAI-compatible chat-completions endpoint and asks for a
//! JSON object `{response, emotion, supportType}`. Any transport, API, or
//! parse failure falls back to a canned supportive reply so a chat message
//! always gets exactly one answer.

use crate::config::SupportConfig;
use serde::{Deserialize, Serialize};

const SYSTEM_PROMPT: &str = "You are a warm, patient companion inside a speech-therapy app. \
Reply to the user's message with encouragement suited to speech practice. \
Respond ONLY with a JSON object: {\"response\": string, \"emotion\": string, \"supportType\": string}. \
emotion is the user's likely feeling (e.g. joy, frustration, anxiety, neutral); \
supportType is one of encouragement, validation, coping, celebration.";

/// Reply from the support collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportReply {
    pub response: String,
    pub emotion: String,
    pub support_type: String,
}

impl SupportReply {
    /// Canned reply used when the completion API is unreachable or answers
    /// with something unusable.
    pub fn fallback() -> Self {
        Self {
            response: "I'm here with you. Take your time, and remember that every bit of \
                       practice counts — you're doing great."
                .to_string(),
            emotion: "neutral".to_string(),
            support_type: "encouragement".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SupportError {
    #[error("support request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("support api error: {0}")]
    Api(String),
    #[error("support reply malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<CompletionMessage>,
}

#[derive(Debug, Serialize)]
struct CompletionMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionChoiceMessage {
    #[serde(default)]
    content: String,
}

/// Client for the support/completion API.
#[derive(Clone)]
pub struct SupportClient {
    base_url: Option<String>,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl SupportClient {
    pub fn new(config: &SupportConfig, api_key: Option<String>) -> Self {
        Self {
            base_url: config
                .base_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            api_key,
            model: config.model.clone(),
            client: reqwest::Client::new(),
        }
    }

    /// Analyze a message and produce a supportive reply. Total: every failure
    /// path returns the fallback reply.
    pub async fn analyze(&self, content: &str) -> SupportReply {
        if self.base_url.is_none() {
            log::debug!("support api not configured, using fallback reply");
            return SupportReply::fallback();
        }
        match self.request_analysis(content).await {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("support analysis failed, using fallback: {}", e);
                SupportReply::fallback()
            }
        }
    }

    /// POST /chat/completions — one non-streaming completion.
    async fn request_analysis(&self, content: &str) -> Result<SupportReply, SupportError> {
        let base_url = self
            .base_url
            .as_deref()
            .ok_or_else(|| SupportError::Api("base url not configured".to_string()))?;
        let url = format!("{}/chat/completions", base_url);
        let body = CompletionRequest {
            model: self.model.clone(),
            messages: vec![
                CompletionMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                CompletionMessage {
                    role: "user".to_string(),
                    content: content.to_string(),
                },
            ],
        };
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(SupportError::Api(format!("{} {}", status, body)));
        }
        let data: CompletionResponse = res.json().await?;
        let content = data
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();
        parse_reply(&content)
    }
}

/// Parse the model's JSON reply, tolerating a fenced code block around it.
fn parse_reply(content: &str) -> Result<SupportReply, SupportError> {
    let trimmed = content.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```").trim())
        .unwrap_or(trimmed);
    serde_json::from_str(trimmed).map_err(|e| SupportError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SupportConfig;

    #[test]
    fn fallback_reply_has_all_fields() {
        let reply = SupportReply::fallback();
        assert!(!reply.response.is_empty());
        assert_eq!(reply.emotion, "neutral");
        assert_eq!(reply.support_type, "encouragement");
    }

    #[test]
    fn parses_plain_and_fenced_replies() {
        let plain = r#"{"response":"Nice work!","emotion":"joy","supportType":"celebration"}"#;
        let reply = parse_reply(plain).expect("plain");
        assert_eq!(reply.support_type, "celebration");

        let fenced = format!("```json\n{}\n```", plain);
        let reply = parse_reply(&fenced).expect("fenced");
        assert_eq!(reply.emotion, "joy");

        assert!(parse_reply("I just want to chat").is_err());
    }

    #[tokio::test]
    async fn unconfigured_client_answers_with_fallback() {
        let client = SupportClient::new(&SupportConfig::default(), None);
        let reply = client.analyze("hello").await;
        assert_eq!(reply.emotion, "neutral");
        assert_eq!(reply.support_type, "encouragement");
    }
}
