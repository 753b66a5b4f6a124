// ABOUTME: Turns "at <label>" tokens in chat text into mentions of the owner holding the label.
// ABOUTME: Pure function over a resolved scope index; unknown labels are left as plain text.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bat\s*([\x{4e00}-\x{9fa5}A-Za-z0-9]+)").expect("mention pattern is valid")
});

/// One piece of a message after substitution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    Text { text: String },
    Mention { owner_key: String },
}

/// Result of scanning one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Substitution {
    pub segments: Vec<Segment>,
    /// Whether at least one label was replaced by a mention.
    pub replaced: bool,
}

/// Replace every `at<label>` token whose label is in `resolved` with a mention.
///
/// A token starts at a word boundary, may have whitespace between `at` and the
/// label, and must be followed by whitespace or the end of the text.
pub fn substitute(text: &str, resolved: &BTreeMap<String, String>) -> Substitution {
    let mut segments = Vec::new();
    let mut replaced = false;
    let mut last = 0;

    for caps in MENTION.captures_iter(text) {
        let (Some(whole), Some(label)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let followed_by_break = text[whole.end()..]
            .chars()
            .next()
            .is_none_or(char::is_whitespace);
        if !followed_by_break {
            continue;
        }
        let Some(owner_key) = resolved.get(label.as_str()) else {
            continue;
        };

        push_text(&mut segments, &text[last..whole.start()]);
        segments.push(Segment::Mention {
            owner_key: owner_key.clone(),
        });
        replaced = true;
        last = whole.end();
    }
    push_text(&mut segments, &text[last..]);

    Substitution { segments, replaced }
}

fn push_text(segments: &mut Vec<Segment>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Segment::Text { text: prev }) = segments.last_mut() {
        prev.push_str(text);
    } else {
        segments.push(Segment::Text {
            text: text.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("Fox".to_string(), "10001".to_string()),
            ("小狐".to_string(), "10002".to_string()),
        ])
    }

    fn text(s: &str) -> Segment {
        Segment::Text { text: s.to_string() }
    }

    fn mention(owner: &str) -> Segment {
        Segment::Mention {
            owner_key: owner.to_string(),
        }
    }

    #[test]
    fn replaces_known_labels() {
        let out = substitute("hello at Fox and at小狐", &index());
        assert!(out.replaced);
        assert_eq!(
            out.segments,
            vec![text("hello "), mention("10001"), text(" and "), mention("10002")]
        );
    }

    #[test]
    fn unknown_labels_stay_as_text() {
        let out = substitute("ping at Wolf please", &index());
        assert!(!out.replaced);
        assert_eq!(out.segments, vec![text("ping at Wolf please")]);
    }

    #[test]
    fn token_must_end_at_whitespace_or_end() {
        let out = substitute("at Fox! at Foxy", &index());
        assert!(!out.replaced);
        assert_eq!(out.segments, vec![text("at Fox! at Foxy")]);
    }

    #[test]
    fn at_must_start_a_word() {
        let out = substitute("cat Fox", &index());
        assert!(!out.replaced);
    }

    #[test]
    fn empty_text_yields_no_segments() {
        let out = substitute("", &index());
        assert!(out.segments.is_empty());
        assert!(!out.replaced);
    }
}
