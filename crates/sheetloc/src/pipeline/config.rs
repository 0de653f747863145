use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::{AppConfig, ColumnConfig, Pricing, StatusValues};
use crate::model::TranslationMode;
use crate::validation::GlossaryMap;

/// Settings a pipeline run reads. Built once and shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub chunk_size: usize,
    pub max_retry_count: u32,
    pub drip_delay: Duration,
    pub llm_timeout: Duration,
    pub default_mode: TranslationMode,
    pub columns: ColumnConfig,
    pub languages: BTreeMap<String, String>,
    pub status_values: StatusValues,
    pub glossary: GlossaryMap,
    pub game_synopsis: String,
    pub tone_and_manner: String,
    pub pricing: Pricing,
}

impl PipelineConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            chunk_size: config.pipeline.chunk_size.max(1),
            max_retry_count: config.pipeline.max_retry_count.max(1),
            drip_delay: Duration::from_millis(config.pipeline.drip_delay_ms),
            llm_timeout: Duration::from_secs(config.llm.timeout_secs),
            default_mode: config.pipeline.default_mode,
            columns: config.columns.clone(),
            languages: config.languages.clone(),
            status_values: config.status_values.clone(),
            glossary: config.glossary.clone(),
            game_synopsis: config.game_synopsis.clone(),
            tone_and_manner: config.tone_and_manner.clone(),
            pricing: config.llm.pricing,
        }
    }

    pub fn language_column(&self, language: &str) -> Option<&str> {
        self.languages.get(language).map(String::as_str)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.chunk_size, 15);
        assert_eq!(config.max_retry_count, 3);
        assert_eq!(config.drip_delay, Duration::from_millis(150));
        assert_eq!(config.llm_timeout, Duration::from_secs(120));
        assert_eq!(config.language_column("ja"), Some("Japanese(ja)"));
        assert_eq!(config.language_column("fr"), None);
    }
}
