//! OpenAI-compatible chat-completions backend.
//!
//! Works with the OpenAI API and any server exposing the same
//! `/chat/completions` endpoint (Azure OpenAI proxies, vLLM, Ollama).

use async_trait::async_trait;
use reqwest::{Client, header};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::completion::{CompletionError, CompletionRequest, CompletionService};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiCompletion {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiCompletion {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        }
    }

    /// Backend for the public OpenAI API.
    pub fn openai(model: &str, api_key: impl Into<String>) -> Self {
        Self::new(DEFAULT_BASE_URL, model, Some(api_key.into()))
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageResponse,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    fn id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let body = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let mut http = self
            .client
            .post(self.chat_completions_url())
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        debug!(model = %self.model, prompt_chars = request.prompt.len(), "chat completion request");
        let response = http
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                429 => CompletionError::RateLimited,
                401 | 403 => CompletionError::Auth,
                code => CompletionError::Request {
                    status: code,
                    body: response.text().await.unwrap_or_default(),
                },
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Parse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(CompletionError::Empty);
        }
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn sends_model_and_temperature() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "max_tokens": 400,
                "temperature": 0.1
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "Observación generada."}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = OpenAiCompletion::new(
            format!("{}/v1/", server.uri()),
            "gpt-4o-mini",
            Some("sk-test".into()),
        );
        let text = backend
            .complete(CompletionRequest::new("hola", 400, 0.1))
            .await
            .unwrap();
        assert_eq!(text, "Observación generada.");
    }

    #[tokio::test]
    async fn rate_limit_maps_to_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let backend = OpenAiCompletion::new(server.uri(), "m", None);
        let err = backend
            .complete(CompletionRequest::new("x", 10, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::RateLimited));
    }

    #[tokio::test]
    async fn empty_choice_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let backend = OpenAiCompletion::new(server.uri(), "m", None);
        let err = backend
            .complete(CompletionRequest::new("x", 10, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::Empty));
    }

    #[test]
    fn trims_trailing_slash() {
        let backend = OpenAiCompletion::new("http://localhost:11434/v1/", "llama3", None);
        assert_eq!(
            backend.chat_completions_url(),
            "http://localhost:11434/v1/chat/completions"
        );
    }
}
