//! Blocking client for OpenAI-compatible `/v1/chat/completions` servers
//! (llama.cpp `llama-server`, vLLM, Ollama and friends).

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::{
    error::BackendError,
    sys::llm::{Content, Role},
};

use super::{ChatBackend, Completion, CompletionRequest};

const COMPLETIONS_PATH: &str = "/v1/chat/completions";

pub struct OpenAiCompatBackend {
    client: Client,
    url: String,
    model: String,
    stops: Vec<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Content],
    max_tokens: u32,
    #[serde(skip_serializing_if = "no_stops")]
    stop: &'a [String],
}

fn no_stops(stops: &&[String]) -> bool {
    stops.is_empty()
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Option<Vec<Choice>>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    role: Option<String>,
    content: Option<String>,
}

impl OpenAiCompatBackend {
    pub fn new(
        endpoint: &str,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Unavailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            url: format!("{}{COMPLETIONS_PATH}", endpoint.trim_end_matches('/')),
            model: model.into(),
            stops: Vec::new(),
        })
    }

    pub fn with_stops(mut self, stops: Vec<String>) -> Self {
        self.stops = stops;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ChatBackend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        &self.model
    }

    fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            stop: &self.stops,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .map_err(|e| BackendError::Unavailable(format!("POST {}: {e}", self.url)))?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| BackendError::Unavailable(format!("reading response: {e}")))?;
        if !status.is_success() {
            return Err(BackendError::Unavailable(format!("{status}: {text}")));
        }

        parse_completion(&text)
    }
}

/// Extracts `choices[0].message` from a chat-completion response body.
pub fn parse_completion(body: &str) -> Result<Completion, BackendError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| BackendError::Malformed(format!("invalid json: {e}")))?;

    let message = response
        .choices
        .and_then(|choices| choices.into_iter().next())
        .and_then(|choice| choice.message)
        .ok_or_else(|| BackendError::Malformed("missing choices[0].message".into()))?;

    let role = match message.role.as_deref() {
        None => Role::Assistant,
        Some(role) => role
            .parse()
            .map_err(|_| BackendError::Malformed(format!("unknown role `{role}`")))?,
    };
    let content = message
        .content
        .ok_or_else(|| BackendError::Malformed("missing choices[0].message.content".into()))?;

    Ok(Completion { role, content })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_top_choice() {
        let body = r#"{
            "id": "chatcmpl-1",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "Greetings."}},
                {"index": 1, "message": {"role": "assistant", "content": "Second."}}
            ]
        }"#;
        assert_eq!(
            parse_completion(body).unwrap(),
            Completion::assistant("Greetings.")
        );
    }

    #[test]
    fn missing_role_defaults_to_assistant() {
        let body = r#"{"choices": [{"message": {"content": "Hi."}}]}"#;
        assert_eq!(parse_completion(body).unwrap().role, Role::Assistant);
    }

    #[test]
    fn rejects_missing_fields() {
        for body in [
            "not json",
            "{}",
            r#"{"choices": []}"#,
            r#"{"choices": [{}]}"#,
            r#"{"choices": [{"message": {"role": "assistant"}}]}"#,
            r#"{"choices": [{"message": {"role": "narrator", "content": "x"}}]}"#,
        ] {
            assert!(
                matches!(parse_completion(body), Err(BackendError::Malformed(_))),
                "{body}"
            );
        }
    }

    #[test]
    fn request_body_matches_chat_shape() {
        let messages = vec![Content {
            role: Role::System,
            content: "be brief".into(),
        }];
        let body = ChatRequest {
            model: "m",
            messages: &messages,
            max_tokens: 75,
            stop: &[],
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "model": "m",
                "messages": [{"role": "system", "content": "be brief"}],
                "max_tokens": 75
            })
        );
    }

    #[test]
    fn endpoint_is_joined_without_double_slash() {
        let backend =
            OpenAiCompatBackend::new("http://127.0.0.1:8080/", "m", Duration::from_secs(1))
                .unwrap();
        assert_eq!(backend.url(), "http://127.0.0.1:8080/v1/chat/completions");
    }
}
