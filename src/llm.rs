//! Completion oracle - the external text-completion service
//!
//! The refinement core depends only on `CompletionOracle`. `LlmClient` is the
//! HTTP implementation and speaks either the Ollama `/api/generate` protocol or
//! the OpenAI `/chat/completions` protocol.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const OLLAMA_CONTEXT_WINDOW: u32 = 4096;

/// Sampling and deadline settings for one completion call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl CompletionOptions {
    pub fn new(temperature: f32, max_tokens: u32, timeout: Duration) -> Self {
        Self {
            temperature,
            max_tokens,
            timeout,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OracleError {
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),

    #[error("completion request failed: {0}")]
    Transport(String),

    #[error("completion service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("completion response was malformed: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait CompletionOracle: Send + Sync {
    async fn complete(&self, prompt: &str, options: CompletionOptions) -> Result<String, OracleError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Ollama,
    OpenAi,
}

impl LlmProvider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::Ollama => "http://localhost:11434",
            LlmProvider::OpenAi => "https://api.openai.com/v1",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(LlmProvider::Ollama),
            "openai" => Ok(LlmProvider::OpenAi),
            other => Err(format!("unknown LLM provider '{}' (expected ollama or openai)", other)),
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmProvider::Ollama => write!(f, "ollama"),
            LlmProvider::OpenAi => write!(f, "openai"),
        }
    }
}

pub struct LlmClient {
    provider: LlmProvider,
    base_url: String,
    model: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(provider: LlmProvider, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, prompt: &str, options: &CompletionOptions) -> (String, serde_json::Value) {
        match self.provider {
            LlmProvider::Ollama => (
                format!("{}/api/generate", self.base_url),
                serde_json::json!({
                    "model": self.model,
                    "prompt": prompt,
                    "stream": false,
                    "options": {
                        "temperature": options.temperature,
                        "num_predict": options.max_tokens,
                        "num_ctx": OLLAMA_CONTEXT_WINDOW
                    }
                }),
            ),
            LlmProvider::OpenAi => (
                format!("{}/chat/completions", self.base_url),
                serde_json::json!({
                    "model": self.model,
                    "messages": [
                        {"role": "user", "content": prompt}
                    ],
                    "temperature": options.temperature,
                    "max_tokens": options.max_tokens
                }),
            ),
        }
    }

    fn extract_text(&self, response: &serde_json::Value) -> Result<String, OracleError> {
        let text = match self.provider {
            LlmProvider::Ollama => response["response"].as_str(),
            LlmProvider::OpenAi => response["choices"][0]["message"]["content"].as_str(),
        };
        text.map(str::to_string)
            .ok_or_else(|| OracleError::Malformed(format!("no completion text in {} response", self.provider)))
    }

    async fn send(&self, prompt: &str, options: &CompletionOptions) -> Result<String, OracleError> {
        let (url, body) = self.request_body(prompt, options);
        let mut request = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| OracleError::Malformed(e.to_string()))?;
        self.extract_text(&response_json)
    }
}

#[async_trait]
impl CompletionOracle for LlmClient {
    async fn complete(&self, prompt: &str, options: CompletionOptions) -> Result<String, OracleError> {
        debug!(
            "Calling {} model {} (temperature {}, max_tokens {})",
            self.provider, self.model, options.temperature, options.max_tokens
        );
        match tokio::time::timeout(options.timeout, self.send(prompt, &options)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => {
                warn!("Completion call failed: {}", e);
                Err(e)
            }
            Err(_) => {
                warn!("Completion call timed out after {:?}", options.timeout);
                Err(OracleError::Timeout(options.timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options() -> CompletionOptions {
        CompletionOptions::new(0.1, 300, Duration::from_secs(35))
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("Ollama".parse::<LlmProvider>(), Ok(LlmProvider::Ollama));
        assert_eq!("openai".parse::<LlmProvider>(), Ok(LlmProvider::OpenAi));
        assert!("bard".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn test_ollama_request_shape() {
        let client = LlmClient::new(LlmProvider::Ollama, "http://localhost:11434/", "qwen2.5-coder:7b");
        let (url, body) = client.request_body("Show all customers", &options());
        assert_eq!(url, "http://localhost:11434/api/generate");
        assert_eq!(body["stream"], json!(false));
        assert_eq!(body["options"]["num_predict"], json!(300));
        assert_eq!(body["prompt"], json!("Show all customers"));
    }

    #[test]
    fn test_openai_request_and_response() {
        let client = LlmClient::new(LlmProvider::OpenAi, "https://api.openai.com/v1", "gpt-4o-mini")
            .with_api_key("sk-test");
        let (url, body) = client.request_body("hi", &options());
        assert_eq!(url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(body["messages"][0]["content"], json!("hi"));

        let response = json!({"choices": [{"message": {"content": "SELECT 1;"}}]});
        assert_eq!(client.extract_text(&response).unwrap(), "SELECT 1;");
        assert!(matches!(
            client.extract_text(&json!({"error": "nope"})),
            Err(OracleError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_an_error() {
        // port 9 (discard) is not an HTTP server
        let client = LlmClient::new(LlmProvider::Ollama, "http://127.0.0.1:9", "m");
        let result = client
            .complete("x", CompletionOptions::new(0.1, 10, Duration::from_secs(5)))
            .await;
        assert!(result.is_err());
    }
}
