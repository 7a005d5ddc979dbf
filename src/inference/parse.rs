//! Cleanup and JSON extraction for model replies.
//!
//! Parsing strategy:
//! 1. Drop `<think>…</think>` reasoning blocks and Markdown code fences.
//! 2. Try `serde_json::from_str` on the remaining text.
//! 3. If that fails, extract the first balanced `{…}` substring and retry.
//! 4. Otherwise report why, so the caller can surface a diagnostic.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn think_block() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").ok())
        .as_ref()
}

fn code_fence() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^```[A-Za-z]*\s*(.*?)\s*```$").ok())
        .as_ref()
}

/// Remove reasoning blocks and trim. An unterminated `<think>` means the
/// model never got to its answer, so nothing is left.
pub fn strip_think_tags(content: &str) -> String {
    let without = match think_block() {
        Some(re) => re.replace_all(content, "").to_string(),
        None => content.to_string(),
    };
    let trimmed = without.trim();
    if trimmed.starts_with("<think>") {
        return String::new();
    }
    trimmed.to_string()
}

fn strip_code_fence(content: &str) -> &str {
    code_fence()
        .and_then(|re| re.captures(content))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(content)
}

/// Find the first balanced `{…}` object in `text`, ignoring braces in strings.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return text.get(start..start + i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a model reply that should be JSON.
pub fn parse_json_reply(content: &str) -> Result<Value, String> {
    let cleaned = strip_think_tags(content);
    let text = strip_code_fence(&cleaned).trim();
    if text.is_empty() {
        return Err("empty reply".to_string());
    }

    let first_err = match serde_json::from_str::<Value>(text) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    if let Some(object) = extract_json_object(text) {
        if let Ok(value) = serde_json::from_str::<Value>(object) {
            return Ok(value);
        }
    }

    Err(first_err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_json() {
        let value = parse_json_reply(r#"{"groups": [[1, 2]]}"#).unwrap();
        assert_eq!(value, json!({"groups": [[1, 2]]}));
    }

    #[test]
    fn test_json_embedded_in_text() {
        let value = parse_json_reply(r#"Here you go: {"groups": []} hope that helps"#).unwrap();
        assert_eq!(value, json!({"groups": []}));
    }

    #[test]
    fn test_json_in_code_fence_after_thinking() {
        let reply = "<think>two of these overlap</think>\n```json\n{\"groups\": [[3, 4]]}\n```";
        let value = parse_json_reply(reply).unwrap();
        assert_eq!(value, json!({"groups": [[3, 4]]}));
    }

    #[test]
    fn test_braces_inside_strings_ignored() {
        let text = r#"x {"reason": "uses { and }", "older_id": 5} y"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"reason": "uses { and }", "older_id": 5}"#)
        );
    }

    #[test]
    fn test_garbage_is_error() {
        assert!(parse_json_reply("no json here").is_err());
        assert!(parse_json_reply("   ").is_err());
        assert!(parse_json_reply("{\"groups\": [").is_err());
    }

    #[test]
    fn test_unterminated_think_leaves_nothing() {
        assert_eq!(strip_think_tags("<think>still going"), "");
        assert_eq!(strip_think_tags("  answer  "), "answer");
    }
}
