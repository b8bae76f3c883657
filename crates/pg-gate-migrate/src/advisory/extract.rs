//! Best-effort JSON extraction from advisory replies.
//!
//! Replies are free text that may contain JSON. Three rules are tried in
//! order; the first that parses wins, otherwise the text is kept raw.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parsed advisory reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Analysis {
    Structured(Value),
    Raw(String),
}

impl Analysis {
    /// Apply the extraction rules to `text`.
    pub fn parse(text: &str) -> Self {
        parse_direct(text)
            .or_else(|| parse_fenced(text))
            .or_else(|| parse_braced(text))
            .map(Analysis::Structured)
            .unwrap_or_else(|| Analysis::Raw(text.to_string()))
    }

    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Analysis::Structured(v) => Some(v),
            Analysis::Raw(_) => None,
        }
    }

    /// Text form, for display and keyword matching.
    pub fn text(&self) -> String {
        match self {
            Analysis::Structured(v) => v.to_string(),
            Analysis::Raw(s) => s.clone(),
        }
    }
}

/// Rule 1: the whole reply is JSON.
pub fn parse_direct(text: &str) -> Option<Value> {
    serde_json::from_str(text.trim()).ok()
}

/// Rule 2: the first ```` ```json ```` fenced block.
pub fn parse_fenced(text: &str) -> Option<Value> {
    let start = text.find("```json")? + 7;
    let end = text[start..].find("```")?;
    let block = text[start..start + end].trim();
    if block.is_empty() {
        return None;
    }
    serde_json::from_str(block).ok()
}

/// Rule 3: from the first `{` to the last `}`.
pub fn parse_braced(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_direct() {
        assert_eq!(parse_direct(" {\"a\": 1} "), Some(json!({"a": 1})));
        assert_eq!(parse_direct("Sure! {\"a\": 1}"), None);
    }

    #[test]
    fn test_parse_fenced() {
        let text = "Here is the plan:\n```json\n{\"steps\": [1, 2]}\n```\nThanks";
        assert_eq!(parse_fenced(text), Some(json!({"steps": [1, 2]})));
        assert_eq!(parse_fenced("```json\n```"), None);
        assert_eq!(parse_fenced("```json\n{\"open\": true}"), None);
    }

    #[test]
    fn test_parse_braced() {
        let text = "Decision follows {\"decision\": \"APPROVE\"} end.";
        assert_eq!(parse_braced(text), Some(json!({"decision": "APPROVE"})));
        assert_eq!(parse_braced("} backwards {"), None);
        assert_eq!(parse_braced("{not json}"), None);
    }

    #[test]
    fn test_rules_applied_in_order() {
        assert_eq!(
            Analysis::parse("{\"x\": 1}"),
            Analysis::Structured(json!({"x": 1}))
        );
        // Fenced block wins over the wider brace span.
        let text = "{prefix} ```json\n{\"y\": 2}\n``` {suffix}";
        assert_eq!(Analysis::parse(text), Analysis::Structured(json!({"y": 2})));
    }

    #[test]
    fn test_falls_back_to_raw() {
        let text = "No JSON here, just prose.";
        assert_eq!(Analysis::parse(text), Analysis::Raw(text.to_string()));
        assert_eq!(Analysis::parse(text).text(), text);
    }
}
