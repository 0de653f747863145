use serde::{Deserialize, Serialize};

use crate::llm::prompts::PromptSettings;
use crate::validation::Glossary;

use super::config::PipelineConfig;
use super::error::PipelineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageTarget {
    pub code: String,
    pub column: String,
}

/// Read-only snapshot of the translation context, taken once per run.
///
/// Later stages read only from here, so editing the glossary in the config
/// does not affect a run already in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub languages: Vec<LanguageTarget>,
    pub glossary: Glossary,
    pub game_synopsis: String,
    pub tone_and_manner: String,
    #[serde(default)]
    pub custom_prompt: String,
}

impl RunContext {
    pub fn snapshot(
        config: &PipelineConfig,
        target_languages: &[String],
        custom_prompt: &str,
    ) -> Result<Self, PipelineError> {
        let languages = target_languages
            .iter()
            .map(|code| {
                config
                    .language_column(code)
                    .map(|column| LanguageTarget {
                        code: code.clone(),
                        column: column.to_string(),
                    })
                    .ok_or_else(|| PipelineError::UnsupportedLanguage(code.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let glossary = Glossary::new(config.glossary.clone())?.subset(target_languages)?;

        Ok(Self {
            languages,
            glossary,
            game_synopsis: config.game_synopsis.clone(),
            tone_and_manner: config.tone_and_manner.clone(),
            custom_prompt: custom_prompt.to_string(),
        })
    }

    pub fn column_for(&self, language: &str) -> Option<&str> {
        self.languages
            .iter()
            .find(|l| l.code == language)
            .map(|l| l.column.as_str())
    }

    pub fn prompt_settings<'a>(&'a self, language: &'a str, glossary_text: &'a str) -> PromptSettings<'a> {
        PromptSettings {
            language: self.column_for(language).unwrap_or(language),
            glossary: glossary_text,
            synopsis: &self.game_synopsis,
            tone: &self.tone_and_manner,
            custom_prompt: &self.custom_prompt,
        }
    }
}
