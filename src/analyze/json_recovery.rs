// src/analyze/json_recovery.rs
//! Bounded-effort recovery of a JSON object from model output.
//!
//! Attempts run in a fixed order and the first one yielding an object wins:
//! 1) the whole text
//! 2) the body of a fenced code block (```json ... ``` or bare ```)
//! 3) the largest balanced top-level `{...}` span, string-literal aware
//! 4) first `{` through last `}`
//!
//! Nothing is repaired or invented: if no candidate parses, recovery fails.

use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStep {
    Direct,
    FencedBlock,
    BalancedSpan,
    OuterBraces,
}

type Attempt = fn(&str) -> Vec<&str>;

const ATTEMPTS: &[(RecoveryStep, Attempt)] = &[
    (RecoveryStep::Direct, direct),
    (RecoveryStep::FencedBlock, fenced_blocks),
    (RecoveryStep::BalancedSpan, largest_balanced_span),
    (RecoveryStep::OuterBraces, outer_braces),
];

/// First JSON object recovered from `text`, with the step that found it.
pub fn recover_object(text: &str) -> Option<(Map<String, Value>, RecoveryStep)> {
    for (step, attempt) in ATTEMPTS {
        for candidate in attempt(text) {
            if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(candidate.trim()) {
                if *step != RecoveryStep::Direct {
                    tracing::debug!(target: "analysis", step = ?step, "JSON recovered after direct parse failed");
                }
                return Some((obj, *step));
            }
        }
    }
    None
}

fn direct(text: &str) -> Vec<&str> {
    vec![text]
}

fn fenced_blocks(text: &str) -> Vec<&str> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("fence regex")
    });
    re.captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect()
}

/// Top-level `{...}` spans, longest first. Braces inside string literals
/// (escapes included) do not count.
fn largest_balanced_span(text: &str) -> Vec<&str> {
    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    spans.push((start, i + 1));
                }
            }
            _ => {}
        }
    }

    spans.sort_by(|a, b| (b.1 - b.0).cmp(&(a.1 - a.0)));
    spans.into_iter().map(|(s, e)| &text[s..e]).collect()
}

fn outer_braces(text: &str) -> Vec<&str> {
    match (text.find('{'), text.rfind('}')) {
        (Some(s), Some(e)) if s < e => vec![&text[s..=e]],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_object() {
        let (obj, step) = recover_object(r#" {"a": 1} "#).unwrap();
        assert_eq!(step, RecoveryStep::Direct);
        assert_eq!(obj["a"], 1);
    }

    #[test]
    fn fenced_with_and_without_language_tag() {
        let tagged = "Here you go:\n```json\n{\"a\": [1, 2]}\n```\nThanks";
        let bare = "```\n{\"a\": [1, 2]}\n```";
        let (a, step_a) = recover_object(tagged).unwrap();
        let (b, _) = recover_object(bare).unwrap();
        assert_eq!(step_a, RecoveryStep::FencedBlock);
        assert_eq!(a, b);
    }

    #[test]
    fn prose_around_object_with_braces_in_strings() {
        let text = r#"Sure! {"note": "use } and { freely", "n": {"x": 1}} and also {"tiny": 0}"#;
        let (obj, step) = recover_object(text).unwrap();
        assert_eq!(step, RecoveryStep::BalancedSpan);
        assert_eq!(obj["n"]["x"], 1);
        assert_eq!(obj["note"], "use } and { freely");
    }

    #[test]
    fn scalars_and_arrays_are_not_objects() {
        assert!(recover_object("42").is_none());
        assert!(recover_object("[1,2,3]").is_none());
        assert!(recover_object("no json at all").is_none());
        assert!(recover_object("{ broken: json ").is_none());
    }
}
