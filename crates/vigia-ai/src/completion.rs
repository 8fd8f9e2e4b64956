//! The text-completion seam: prompt in, text out.

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request failed ({status}): {body}")]
    Request { status: u16, body: String },

    #[error("rate limited")]
    RateLimited,

    #[error("authentication rejected")]
    Auth,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("empty completion")]
    Empty,

    #[error("timed out after {0} s")]
    Timeout(u64),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// One completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: Option<String>,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, max_tokens: u32, temperature: f64) -> Self {
        Self {
            system_prompt: None,
            prompt: prompt.into(),
            max_tokens,
            temperature,
        }
    }

    pub fn with_system(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Model or backend identifier for logs.
    fn id(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError>;
}
