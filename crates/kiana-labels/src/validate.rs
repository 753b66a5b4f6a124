// ABOUTME: Label text rules: non-empty, bounded length, letters/digits/CJK ideographs only.
// ABOUTME: Checked before any statement is built, so rejected labels never reach the database.

use thiserror::Error;

/// Default maximum label length, in characters.
pub const DEFAULT_MAX_LABEL_LENGTH: usize = 15;

/// Why a label was rejected. The messages are meant to be shown to end users.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidLabel {
    #[error("label must not be empty")]
    Empty,

    #[error("label is too long (at most {max} characters)")]
    TooLong { max: usize },

    #[error("label may only contain letters, digits, and Chinese characters")]
    InvalidCharacters,
}

/// Character-class and length rules applied to every label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelRules {
    pub max_length: usize,
}

impl Default for LabelRules {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LABEL_LENGTH,
        }
    }
}

impl LabelRules {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    /// Check `label` against the rules. Length is counted in characters.
    pub fn validate(&self, label: &str) -> Result<(), InvalidLabel> {
        if label.is_empty() {
            return Err(InvalidLabel::Empty);
        }
        if label.chars().count() > self.max_length {
            return Err(InvalidLabel::TooLong {
                max: self.max_length,
            });
        }
        if !label.chars().all(is_label_char) {
            return Err(InvalidLabel::InvalidCharacters);
        }
        Ok(())
    }
}

/// ASCII letters and digits, plus CJK unified ideographs U+4E00..=U+9FA5.
pub fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || ('\u{4e00}'..='\u{9fa5}').contains(&c)
}
