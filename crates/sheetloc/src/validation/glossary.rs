use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ConfigError;

pub type GlossaryMap = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlossaryCheck {
    pub compliant: bool,
    pub violations: Vec<String>,
}

#[derive(Debug, Clone)]
struct LanguageGlossary {
    /// Longest source term first, ties lexicographic.
    entries: Vec<(String, String)>,
    matcher: Regex,
}

impl LanguageGlossary {
    fn new(language: &str, terms: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        // An empty alternative would match between every character.
        if terms.keys().any(|source| source.trim().is_empty()) {
            return Err(ConfigError::InvalidGlossary {
                language: language.to_string(),
                reason: "empty source term".to_string(),
            });
        }

        let mut entries: Vec<(String, String)> = terms
            .iter()
            .map(|(source, target)| (source.clone(), target.clone()))
            .collect();
        entries.sort_by(|(a, _), (b, _)| {
            b.chars()
                .count()
                .cmp(&a.chars().count())
                .then_with(|| a.cmp(b))
        });

        let alternation = entries
            .iter()
            .map(|(source, _)| regex::escape(source))
            .collect::<Vec<_>>()
            .join("|");

        let matcher = Regex::new(&alternation).map_err(|e| ConfigError::InvalidGlossary {
            language: language.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self { entries, matcher })
    }

    fn target_for(&self, source: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(s, _)| s == source)
            .map(|(_, t)| t.as_str())
    }
}

/// Read-only per-language term mapping, snapshotted once per run.
///
/// Serializes as the plain `language -> {source -> target}` map so it can be
/// stored inside a checkpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "GlossaryMap", into = "GlossaryMap")]
pub struct Glossary {
    raw: GlossaryMap,
    languages: BTreeMap<String, LanguageGlossary>,
}

impl PartialEq for Glossary {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Glossary {
    pub fn new(map: GlossaryMap) -> Result<Self, ConfigError> {
        let mut languages = BTreeMap::new();
        for (language, terms) in &map {
            if terms.is_empty() {
                continue;
            }
            languages.insert(language.clone(), LanguageGlossary::new(language, terms)?);
        }

        Ok(Self {
            raw: map,
            languages,
        })
    }

    /// Restricts the glossary to the given languages.
    pub fn subset(&self, languages: &[String]) -> Result<Self, ConfigError> {
        let map = self
            .raw
            .iter()
            .filter(|(lang, _)| languages.contains(lang))
            .map(|(lang, terms)| (lang.clone(), terms.clone()))
            .collect();
        Self::new(map)
    }

    pub fn has_terms(&self, language: &str) -> bool {
        self.languages.contains_key(language)
    }

    pub fn entries(&self, language: &str) -> &[(String, String)] {
        self.languages
            .get(language)
            .map(|g| g.entries.as_slice())
            .unwrap_or(&[])
    }

    /// Replaces every source term left in `text` with its fixed target term.
    ///
    /// Matching is a single left-to-right pass preferring the longest term, so
    /// the output does not depend on map iteration order.
    pub fn apply_postprocess(&self, text: &str, language: &str) -> String {
        let Some(glossary) = self.languages.get(language) else {
            return text.to_string();
        };

        glossary
            .matcher
            .replace_all(text, |caps: &regex::Captures| {
                let matched = &caps[0];
                glossary.target_for(matched).unwrap_or(matched).to_string()
            })
            .into_owned()
    }

    /// Every term present in `source` must show up translated in `text`.
    pub fn check_compliance(&self, text: &str, language: &str, source: &str) -> GlossaryCheck {
        let violations: Vec<String> = self
            .entries(language)
            .iter()
            .filter(|(term, target)| source.contains(term.as_str()) && !text.contains(target.as_str()))
            .map(|(term, target)| format!("glossary violation: '{}' should be '{}'", term, target))
            .collect();

        GlossaryCheck {
            compliant: violations.is_empty(),
            violations,
        }
    }

    pub fn format_for_prompt(&self, language: &str) -> String {
        let entries = self.entries(language);
        if entries.is_empty() {
            return "No fixed glossary for this language. Translate freely but keep terms consistent."
                .to_string();
        }

        entries
            .iter()
            .map(|(source, target)| format!("- {} → {}", source, target))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl TryFrom<GlossaryMap> for Glossary {
    type Error = ConfigError;

    fn try_from(map: GlossaryMap) -> Result<Self, Self::Error> {
        Glossary::new(map)
    }
}

impl From<Glossary> for GlossaryMap {
    fn from(glossary: Glossary) -> Self {
        glossary.raw
    }
}
