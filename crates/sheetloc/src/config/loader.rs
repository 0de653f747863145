use std::path::Path;

use crate::config::schema::AppConfig;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<AppConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: AppConfig = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| format!("{}", e))
        .collect();

    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.pipeline.chunk_size == 0 {
        return Err(ConfigError::Validation {
            message: "pipeline.chunk_size must be at least 1".to_string(),
        });
    }

    if config.pipeline.max_retry_count == 0 {
        return Err(ConfigError::Validation {
            message: "pipeline.max_retry_count must be at least 1".to_string(),
        });
    }

    let columns = [
        ("columns.key", &config.columns.key),
        ("columns.korean", &config.columns.korean),
        ("columns.shared_comments", &config.columns.shared_comments),
        ("columns.status", &config.columns.status),
    ];
    for (name, value) in columns {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: format!("{} must not be empty", name),
            });
        }
    }

    for (code, column) in &config.languages {
        if column.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: format!("languages.{} has an empty column name", code),
            });
        }
    }

    for (language, entries) in &config.glossary {
        if !config.languages.contains_key(language) {
            return Err(ConfigError::UnknownLanguage(language.clone()));
        }

        for (source, target) in entries {
            if source.trim().is_empty() {
                return Err(ConfigError::InvalidGlossary {
                    language: language.clone(),
                    reason: "empty source term".to_string(),
                });
            }
            if target.trim().is_empty() {
                return Err(ConfigError::InvalidGlossary {
                    language: language.clone(),
                    reason: format!("empty target term for '{}'", source),
                });
            }
        }
    }

    Ok(())
}
