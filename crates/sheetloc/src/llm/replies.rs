use serde::{Deserialize, Deserializer, Serialize};

use crate::model::{RetryItem, ValidationOutcome, WorkItem};

/// Anything addressed by a row key inside a chunk.
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for WorkItem {
    fn key(&self) -> &str {
        &self.key
    }
}

impl Keyed for RetryItem {
    fn key(&self) -> &str {
        &self.key
    }
}

impl Keyed for ValidationOutcome {
    fn key(&self) -> &str {
        &self.key
    }
}

/// Models sometimes emit numeric-looking keys as numbers.
fn key_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string key, got {}",
            other
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofreadReply {
    #[serde(deserialize_with = "key_from_any")]
    pub key: String,
    #[serde(default)]
    pub original: String,
    #[serde(default)]
    pub revised: String,
    #[serde(default)]
    pub changes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationReply {
    #[serde(deserialize_with = "key_from_any")]
    pub key: String,
    #[serde(default)]
    pub translated: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    #[default]
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewReply {
    #[serde(deserialize_with = "key_from_any")]
    pub key: String,
    #[serde(default)]
    pub status: ReviewStatus,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestion: String,
    #[serde(default)]
    pub reason: String,
}

impl Keyed for ProofreadReply {
    fn key(&self) -> &str {
        &self.key
    }
}

impl Keyed for TranslationReply {
    fn key(&self) -> &str {
        &self.key
    }
}

impl Keyed for ReviewReply {
    fn key(&self) -> &str {
        &self.key
    }
}
