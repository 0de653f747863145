//! Deterministic checks applied to LLM output. Nothing here performs I/O.

pub mod glossary;
pub mod tags;

pub use glossary::{Glossary, GlossaryCheck, GlossaryMap};
pub use tags::{normalize_escapes, tags_preserved, validate_tags, TagCheck, TAG_PATTERNS};
