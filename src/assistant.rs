//! Assistant client
//!
//! Stateless request/response wrapper around the text-generation service.
//! Every failure class (missing credential, transport, non-success status,
//! malformed body) is logged and collapses to "no reply"; the caller simply
//! produces no spoken response. No retries.

use crate::config::AssistantSettings;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Fixed system instruction for the single-turn request.
const SYSTEM_PROMPT: &str = "You are Coach, a voice assistant listening in a \
game voice channel. Answer in one or two short sentences suitable for being \
read aloud.";

/// How much of an unexpected response body is logged for diagnosis.
const BODY_SNIPPET_CHARS: usize = 256;

pub struct AssistantClient {
    http: reqwest::Client,
    settings: AssistantSettings,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
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

impl AssistantClient {
    pub fn new(settings: AssistantSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    /// Submits a single-turn query and returns the first response's text, or
    /// `None` on any failure.
    pub async fn query(&self, text: &str) -> Option<String> {
        if self.settings.api_key.is_empty() {
            warn!("assistant credential missing; skipping query");
            return None;
        }

        let url = format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );
        let body = ChatRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
        };

        let response = match self
            .http
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("assistant request failed: {}", e);
                return None;
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("failed to read assistant response: {}", e);
                return None;
            }
        };

        if !status.is_success() {
            warn!("assistant returned {}: {}", status, snippet(&body));
            return None;
        }

        match serde_json::from_str::<ChatResponse>(&body) {
            Ok(parsed) => match parsed.choices.into_iter().next() {
                Some(choice) if !choice.message.content.is_empty() => {
                    Some(choice.message.content)
                }
                _ => {
                    warn!("assistant response carried no reply: {}", snippet(&body));
                    None
                }
            },
            Err(e) => {
                warn!("malformed assistant response ({}): {}", e, snippet(&body));
                None
            }
        }
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_CHARS).collect()
}
