//! Prompt text for the three model roles: proofreader, translator, reviewer.

use crate::model::{RetryItem, ValidationOutcome, WorkItem};

const ITEM_SEPARATOR: &str = "\n\n---\n\n";

const TAG_RULES: &str = "\
   - Variable placeholders: {player_name}, {0}, {1}
   - Color markup: <color=#FF0000>, </color>
   - Line breaks: keep every \\n exactly as the two characters \\n, never as a real line break
   - Bold/italic/size markup: <b>, </b>, <i>, </i>, <size=..>, </size>
   - printf specifiers: %d, %s, %f";

/// Shared inputs of the translator and reviewer system prompts.
#[derive(Debug, Clone, Copy)]
pub struct PromptSettings<'a> {
    pub language: &'a str,
    pub glossary: &'a str,
    pub synopsis: &'a str,
    pub tone: &'a str,
    pub custom_prompt: &'a str,
}

impl PromptSettings<'_> {
    fn custom_section(&self) -> String {
        if self.custom_prompt.trim().is_empty() {
            String::new()
        } else {
            format!("\n\n## Additional instructions\n{}", self.custom_prompt.trim())
        }
    }
}

pub fn proofreader_system_prompt() -> String {
    format!(
        "You are a Korean proofreader for game text.

## Task
Fix clear spelling, spacing and word-consistency mistakes in the Korean source lines.

## Rules
1. Never edit, remove or convert formatting tags:
{TAG_RULES}
2. Leave game-specific proper nouns and intentional wording alone.
3. Only fix unambiguous mistakes.
4. If the original contains \\n, the revision must contain \\n at the same place.

## Output
Return a JSON array:
[
  {{\"key\": \"row key\", \"original\": \"current text\", \"revised\": \"corrected text\", \"changes\": \"what changed\"}}
]
Leave out rows that need no change."
    )
}

pub fn translator_system_prompt(settings: &PromptSettings<'_>) -> String {
    format!(
        "You are a professional game localization translator.

## Game synopsis
{synopsis}

## Tone and manner
{tone}

## Target language
{language}

## Glossary (fixed terms)
{glossary}{custom}

## Rules
1. Preserve every formatting tag of the source unchanged:
{TAG_RULES}
2. Always use the glossary rendering for glossary terms.
3. Match the game's world and tone so the text reads naturally.
4. Use the shared comments, when present, as context.
5. Keep terminology consistent across the sheet.

## Example
Source: \"모험가님, 환영합니다!\\n새로운 여정을 시작하세요.\"
Translation: \"Welcome, adventurer!\\nStart your new journey.\"

## Output
Return a JSON array only, no commentary:
[
  {{\"key\": \"row key\", \"translated\": \"translation\"}}
]",
        synopsis = settings.synopsis,
        tone = settings.tone,
        language = settings.language,
        glossary = settings.glossary,
        custom = settings.custom_section(),
    )
}

pub fn reviewer_system_prompt(settings: &PromptSettings<'_>) -> String {
    format!(
        "You are a game localization reviewer. Cross-check each translation strictly against its Korean source.

## Game synopsis
{synopsis}

## Tone and manner
{tone}

## Target language
{language}

## Glossary (fixed terms)
{glossary}{custom}

## Criteria
1. Tags: every formatting tag of the source is present in the translation.
2. Glossary: fixed terms use the glossary rendering.
3. Tone: the tone and manner above is kept.
4. Accuracy: the meaning of the source is conveyed.
5. Fluency: the text is natural for native readers.

## Output
Return a JSON array:
[
  {{
    \"key\": \"row key\",
    \"status\": \"pass\" or \"fail\",
    \"issues\": [\"problems found\"],
    \"suggestion\": \"proposed fix when failing\",
    \"reason\": \"short summary of why the text differs from the existing translation\"
  }}
]",
        synopsis = settings.synopsis,
        tone = settings.tone,
        language = settings.language,
        glossary = settings.glossary,
        custom = settings.custom_section(),
    )
}

pub fn proofread_user_prompt(items: &[WorkItem]) -> String {
    items
        .iter()
        .map(|item| format!("Key: {}\nKorean: {}", item.key, item.source_text))
        .collect::<Vec<_>>()
        .join(ITEM_SEPARATOR)
}

pub fn translation_user_prompt(items: &[WorkItem]) -> String {
    items
        .iter()
        .map(|item| {
            let mut block = format!("Key: {}\nKorean: {}", item.key, item.source_text);
            if !item.shared_comments.is_empty() {
                block.push_str(&format!("\nShared Comments (context): {}", item.shared_comments));
            }
            block
        })
        .collect::<Vec<_>>()
        .join(ITEM_SEPARATOR)
}

pub fn retry_user_prompt(items: &[RetryItem]) -> String {
    items
        .iter()
        .map(|item| {
            let mut block = format!("Key: {}\nKorean: {}", item.key, item.source_text);
            if !item.shared_comments.is_empty() {
                block.push_str(&format!("\nShared Comments (context): {}", item.shared_comments));
            }
            block.push_str(&format!(
                "\nPrevious translation (rejected): {}",
                item.previous_translation
            ));
            block.push_str(&format!("\nErrors: {}", item.feedback.join("; ")));
            block.push_str(
                "\nFix the errors above and translate again. Keep every formatting tag \
                 of the source ({var}, <color>, \\n, ...) exactly as it is.",
            );
            block
        })
        .collect::<Vec<_>>()
        .join(ITEM_SEPARATOR)
}

pub fn review_user_prompt(items: &[ValidationOutcome]) -> String {
    let body = items
        .iter()
        .map(|item| {
            format!(
                "Key: {}\nKorean: {}\nTranslation ({}): {}\nExisting translation: {}",
                item.key, item.source_text, item.language, item.translated_text, item.old_translation
            )
        })
        .collect::<Vec<_>>()
        .join(ITEM_SEPARATOR);

    format!(
        "{}\n\nReview each translation above and return the JSON array, including the reason for any change from the existing translation.",
        body
    )
}
