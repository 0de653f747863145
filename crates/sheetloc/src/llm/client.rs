use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::model::TokenUsage;
use crate::secrets::resolve_api_key;

use super::{Completion, LlmGateway};

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Blocking client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiCompatGateway {
    http: reqwest::blocking::Client,
    base_url: String,
    model: String,
    api_key: SecretString,
}

impl OpenAiCompatGateway {
    pub fn new(base_url: &str, model: &str, api_key: SecretString) -> Result<Self, LlmError> {
        let http = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key =
            resolve_api_key(config).map_err(|e| LlmError::MissingApiKey(e.to_string()))?;
        Self::new(&config.base_url, &config.model, api_key)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key.expose_secret()))
            .map_err(|e| LlmError::MissingApiKey(format!("API key is not a valid header: {}", e)))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

impl LlmGateway for OpenAiCompatGateway {
    fn complete(&self, system: &str, user: &str, timeout: Duration) -> Result<Completion, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        tracing::debug!(model = %self.model, prompt_chars = user.len(), "chat completion request");

        let map_send_error = |e: reqwest::Error| {
            if e.is_timeout() {
                LlmError::Timeout(timeout.as_secs())
            } else {
                LlmError::Network(e.to_string())
            }
        };

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .timeout(timeout)
            .json(&request)
            .send()
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response
            .json()
            .map_err(|e| LlmError::MalformedOutput(format!("invalid response body: {}", e)))?;

        let usage = chat.usage.unwrap_or_default();
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)?;

        Ok(Completion {
            content,
            usage: TokenUsage::new(usage.prompt_tokens, usage.completion_tokens),
        })
    }
}
