//! Structural tag preservation checks.
//!
//! A translation (or a proofreading revision) must carry exactly the same
//! structural markers as its source: placeholders, printf specifiers, rich
//! text markup and the literal `\n` / `\t` escapes the game engine expects.

use regex::Regex;
use std::sync::LazyLock;

/// Tag patterns in the order they are reported, paired with a display label.
pub const TAG_PATTERNS: &[(&str, &str)] = &[
    ("{var}", r"\{[^}]+\}"),
    ("%d/%s/%f", r"%[dsf]"),
    ("<color>", r"<color[^>]*>"),
    ("</color>", r"</color>"),
    ("<b>", r"</?b>"),
    ("<i>", r"</?i>"),
    ("<size>", r"<size=[^>]*>"),
    ("</size>", r"</size>"),
    (r"\n", r"\\n"),
    (r"\t", r"\\t"),
];

static TAG_REGEXES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    TAG_PATTERNS
        .iter()
        .map(|(label, pattern)| (*label, Regex::new(pattern).unwrap()))
        .collect()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCheck {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Rewrites real line breaks and tabs into their two-character escape form.
///
/// JSON decoding turns `\n` inside a string into an actual newline; game text
/// stores the escape literally, so both spellings are treated as the same tag.
pub fn normalize_escapes(text: &str) -> String {
    text.replace('\n', "\\n").replace('\t', "\\t")
}

fn extract_sorted(regex: &Regex, text: &str) -> Vec<String> {
    let mut tags: Vec<String> = regex
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect();
    tags.sort();
    tags
}

/// Compares tags of `source` and `translated` per pattern as multisets.
pub fn validate_tags(source: &str, translated: &str) -> TagCheck {
    let source = normalize_escapes(source);
    let translated = normalize_escapes(translated);

    let errors: Vec<String> = TAG_REGEXES
        .iter()
        .filter_map(|(label, regex)| {
            let expected = extract_sorted(regex, &source);
            let actual = extract_sorted(regex, &translated);
            (expected != actual).then(|| {
                format!(
                    "tag mismatch [{}]: source={:?}, translation={:?}",
                    label, expected, actual
                )
            })
        })
        .collect();

    TagCheck {
        valid: errors.is_empty(),
        errors,
    }
}

/// True when `revised` keeps every tag of `original`.
pub fn tags_preserved(original: &str, revised: &str) -> bool {
    validate_tags(original, revised).valid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_always_valid() {
        for text in [
            "",
            "plain",
            "안녕 {name}",
            "<color=#FF0000>위험</color>\\n%d개 남음",
            "<b>굵게</b> <i>기울임</i> <size=20>크게</size>\\t탭",
        ] {
            let check = validate_tags(text, text);
            assert!(check.valid, "{:?}", check.errors);
        }
    }

    #[test]
    fn test_placeholder_kept() {
        let check = validate_tags("안녕 {name}", "Hello {name}");
        assert!(check.valid);
        assert!(check.errors.is_empty());
    }

    #[test]
    fn test_placeholder_dropped() {
        let check = validate_tags("안녕 {name}", "Hello");
        assert!(!check.valid);
        assert_eq!(check.errors.len(), 1);
        assert!(check.errors[0].contains("{var}"));
        assert!(check.errors[0].contains("{name}"));
    }

    #[test]
    fn test_order_insensitive_count_sensitive() {
        assert!(validate_tags("{a} {b}", "{b} then {a}").valid);
        assert!(!validate_tags("{a} {a}", "{a}").valid);
    }

    #[test]
    fn test_real_newline_equals_escaped_newline() {
        assert!(validate_tags("A\\nB", "A\nB").valid);
        assert!(validate_tags("A\nB", "A\\nB").valid);
        assert!(validate_tags("A\\tB", "A\tB").valid);
    }

    #[test]
    fn test_dropped_newline_names_pattern() {
        let check = validate_tags("첫째\\n둘째", "First Second");
        assert!(!check.valid);
        assert!(check.errors[0].contains(r"[\n]"));
    }

    #[test]
    fn test_each_broken_pattern_reported_once() {
        let check = validate_tags("<color=red>%d</color>", "%s");
        assert!(!check.valid);
        // printf, <color>, </color>
        assert_eq!(check.errors.len(), 3);
    }

    #[test]
    fn test_color_attribute_must_match() {
        assert!(!validate_tags("<color=#FF0000>x</color>", "<color=#00FF00>x</color>").valid);
    }

    #[test]
    fn test_tags_preserved() {
        assert!(tags_preserved("안녕\\n친구", "안녕하세요\\n친구"));
        assert!(!tags_preserved("안녕\\n친구", "안녕 친구"));
    }
}
