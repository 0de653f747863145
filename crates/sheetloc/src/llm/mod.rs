//! Boundary to the language model.
//!
//! The pipeline only ever sees [`LlmGateway::complete`]: a system prompt and a
//! user prompt go in, raw text plus token usage comes out. Turning that text
//! into typed replies is done here with [`parse_json_array`].

pub mod client;
pub mod prompts;
pub mod replies;

use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::LlmError;
use crate::model::TokenUsage;

pub use client::OpenAiCompatGateway;
pub use replies::{Keyed, ProofreadReply, ReviewReply, ReviewStatus, TranslationReply};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
}

pub trait LlmGateway: Send + Sync {
    fn complete(&self, system: &str, user: &str, timeout: Duration) -> Result<Completion, LlmError>;
}

/// Removes a surrounding markdown code fence, with or without a language tag.
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the info string (`json`, `JSON`, ...) up to the first line break.
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };

    body.trim_end().trim_end_matches("```").trim()
}

/// Parses a JSON array reply, tolerating code fences and chatter around the array.
pub fn parse_json_array<T: DeserializeOwned>(content: &str) -> Result<Vec<T>, LlmError> {
    let body = strip_code_fences(content);
    if body.is_empty() {
        return Err(LlmError::EmptyResponse);
    }

    match serde_json::from_str::<Vec<T>>(body) {
        Ok(items) => Ok(items),
        Err(first_error) => {
            let (Some(start), Some(end)) = (body.find('['), body.rfind(']')) else {
                return Err(LlmError::MalformedOutput(first_error.to_string()));
            };
            if end <= start {
                return Err(LlmError::MalformedOutput(first_error.to_string()));
            }
            serde_json::from_str::<Vec<T>>(&body[start..=end])
                .map_err(|e| LlmError::MalformedOutput(e.to_string()))
        }
    }
}
