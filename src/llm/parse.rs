//! Layered extraction of structured verdicts from model replies.
//!
//! The continuation judgment asks the summarization service for a JSON
//! verdict, but the reply is free-form text and may wrap, mangle, or omit
//! the JSON. Parsing is an ordered chain of pure strategies, tried in
//! sequence; each returns `Option` and the first success wins. Callers that
//! get `None` apply their own safe default.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Structured answer expected from the continuation judgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictReply {
    /// "merge" or "split"
    pub verdict: Verdict,
    /// Optional updated description for the merged activity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Whether an event continues the open activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Merge,
    Split,
}

/// Run the full strategy chain over a raw reply.
///
/// Strategies, in order: strict JSON parse, fenced-block extraction,
/// pattern extraction, lenient syntax repair. `None` means every strategy
/// failed and the caller should apply its safe default.
pub fn parse_verdict(reply: &str) -> Option<VerdictReply> {
    const STRATEGIES: &[fn(&str) -> Option<VerdictReply>] = &[
        parse_strict,
        parse_fenced_block,
        parse_pattern,
        parse_repaired,
    ];

    STRATEGIES.iter().find_map(|strategy| strategy(reply))
}

/// Strategy 1: the whole reply is the JSON document.
fn parse_strict(reply: &str) -> Option<VerdictReply> {
    serde_json::from_str(reply.trim()).ok()
}

/// Strategy 2: the JSON is inside a fenced code block.
fn parse_fenced_block(reply: &str) -> Option<VerdictReply> {
    let block = extract_fenced_block(reply)?;
    serde_json::from_str(block.trim()).ok()
}

/// Pull the contents of the first fenced block (```json or bare ```).
fn extract_fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip an optional language tag on the opening fence line
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

/// Strategy 3: pattern-match the verdict field (or a bare verdict word)
/// even when the surrounding JSON is broken.
fn parse_pattern(reply: &str) -> Option<VerdictReply> {
    let field = Regex::new(r#""?verdict"?\s*[:=]\s*"?(merge|split)"?"#).ok()?;
    if let Some(caps) = field.captures(&reply.to_lowercase()) {
        return Some(VerdictReply {
            verdict: verdict_from_str(&caps[1])?,
            description: None,
        });
    }

    // Replies like "MERGE" or "Split - unrelated work" with no JSON at all
    let bare = Regex::new(r"(?i)^\s*(merge|split)\b").ok()?;
    let caps = bare.captures(reply)?;
    Some(VerdictReply {
        verdict: verdict_from_str(&caps[1].to_lowercase())?,
        description: None,
    })
}

/// Strategy 4: repair common JSON mistakes (single quotes, trailing
/// commas) and retry the strict parse, on the whole reply and on any
/// fenced block.
fn parse_repaired(reply: &str) -> Option<VerdictReply> {
    let candidates = [Some(reply), extract_fenced_block(reply)];
    candidates
        .into_iter()
        .flatten()
        .find_map(|text| serde_json::from_str(&repair_json(text)).ok())
}

fn repair_json(text: &str) -> String {
    let trailing_comma = Regex::new(r",\s*([}\]])").expect("static pattern");
    let single_quoted = text.trim().replace('\'', "\"");
    trailing_comma.replace_all(&single_quoted, "$1").to_string()
}

fn verdict_from_str(s: &str) -> Option<Verdict> {
    match s {
        "merge" => Some(Verdict::Merge),
        "split" => Some(Verdict::Split),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_parse() {
        let reply = r#"{"verdict": "merge", "description": "still editing the same doc"}"#;
        let parsed = parse_verdict(reply).unwrap();
        assert_eq!(parsed.verdict, Verdict::Merge);
        assert_eq!(
            parsed.description.as_deref(),
            Some("still editing the same doc")
        );
    }

    #[test]
    fn test_fenced_block() {
        let reply = "Here is my judgment:\n```json\n{\"verdict\": \"split\"}\n```\nHope that helps!";
        let parsed = parse_verdict(reply).unwrap();
        assert_eq!(parsed.verdict, Verdict::Split);
    }

    #[test]
    fn test_fenced_block_without_language_tag() {
        let reply = "```\n{\"verdict\": \"merge\"}\n```";
        assert_eq!(parse_verdict(reply).unwrap().verdict, Verdict::Merge);
    }

    #[test]
    fn test_pattern_extraction_from_broken_json() {
        let reply = r#"{"verdict": "merge", "description": "unterminated"#;
        assert_eq!(parse_verdict(reply).unwrap().verdict, Verdict::Merge);
    }

    #[test]
    fn test_bare_word_reply() {
        assert_eq!(parse_verdict("MERGE").unwrap().verdict, Verdict::Merge);
        assert_eq!(
            parse_verdict("Split - the user changed tasks").unwrap().verdict,
            Verdict::Split
        );
    }

    #[test]
    fn test_lenient_repair() {
        let reply = r#"{'verdict': 'split', 'description': 'new task',}"#;
        let parsed = parse_verdict(reply).unwrap();
        assert_eq!(parsed.verdict, Verdict::Split);
        assert_eq!(parsed.description.as_deref(), Some("new task"));
    }

    #[test]
    fn test_unusable_reply_yields_none() {
        assert!(parse_verdict("I am not sure what you mean.").is_none());
        assert!(parse_verdict("").is_none());
    }
}
