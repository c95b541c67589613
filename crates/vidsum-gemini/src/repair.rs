//! Recovery for fenced or truncated model JSON.
//!
//! The generation endpoint occasionally wraps its JSON in a markdown fence
//! or truncates the tail of a long document. [`strip_code_fences`] handles
//! the former; [`repair_truncated`] closes unbalanced brackets and an
//! unterminated string so one reparse attempt can be made. Repair is a
//! recovery layer only: the repaired text gets exactly one reparse and is
//! never fed further.

/// Remove a leading ```` ```json ```` (or bare ```` ``` ````) fence and a
/// trailing fence, if present.
pub fn strip_code_fences(text: &str) -> &str {
    let mut text = text.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

/// Close unbalanced `{`/`[` and an unterminated string.
///
/// Returns `None` when the document is already balanced (nothing to
/// repair) or when it is too mangled to close mechanically.
pub fn repair_truncated(text: &str) -> Option<String> {
    let text = text.trim_end();
    if text.is_empty() {
        return None;
    }

    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                // A mismatched closer means the text is not merely
                // truncated; give up.
                if stack.pop() != Some(c) {
                    return None;
                }
            }
            _ => {}
        }
    }

    if stack.is_empty() && !in_string {
        return None;
    }

    let mut repaired = String::with_capacity(text.len() + stack.len() + 8);
    repaired.push_str(text);

    // A string cut off mid-escape: drop the dangling backslash first.
    if escaped {
        repaired.pop();
    }
    if in_string {
        repaired.push('"');
    }

    // A value cut off right after `:` or `,` leaves invalid JSON once the
    // brackets close; patch the seam.
    let tail: String = repaired
        .trim_end()
        .chars()
        .rev()
        .take(1)
        .collect();
    match tail.as_str() {
        ":" => repaired.push_str(" null"),
        "," => {
            while repaired.ends_with(|c: char| c.is_whitespace() || c == ',') {
                repaired.pop();
            }
        }
        _ => {}
    }

    while let Some(closer) = stack.pop() {
        repaired.push(closer);
    }

    Some(repaired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn strips_json_fence() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn balanced_document_needs_no_repair() {
        assert_eq!(repair_truncated(r#"{"a": [1, 2]}"#), None);
        assert_eq!(repair_truncated(""), None);
    }

    #[test]
    fn closes_unbalanced_brackets() {
        let repaired = repair_truncated(r#"{"a": [1, 2"#).unwrap();
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["a"][1], 2);
    }

    #[test]
    fn closes_unterminated_string() {
        let repaired = repair_truncated(r#"{"script": "and then the"#).unwrap();
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["script"], "and then the");
    }

    #[test]
    fn handles_trailing_comma_and_colon() {
        let repaired = repair_truncated(r#"{"a": 1,"#).unwrap();
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["a"], 1);

        let repaired = repair_truncated(r#"{"a":"#).unwrap();
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert!(value["a"].is_null());
    }

    #[test]
    fn string_with_escapes_is_tracked() {
        let repaired = repair_truncated(r#"{"a": "quote \" inside"#).unwrap();
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["a"], "quote \" inside");
    }

    #[test]
    fn dangling_escape_is_dropped() {
        let repaired = repair_truncated(r#"{"a": "cut \"#).unwrap();
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["a"], "cut ");
    }

    #[test]
    fn mismatched_closer_gives_up() {
        assert_eq!(repair_truncated(r#"{"a": 1]"#), None);
    }

    #[test]
    fn brackets_inside_strings_are_ignored() {
        let repaired = repair_truncated(r#"{"a": "text with { and ["#).unwrap();
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["a"], "text with { and [");
    }
}
