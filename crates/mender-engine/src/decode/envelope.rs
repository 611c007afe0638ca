//! Locating the payload inside raw model text.

use crate::scan::{find_matching_close, first_object_start};
use mender_core::FilePlan;

const PLAN_PREFIXES: &[&str] = &["// PLAN:", "/* PLAN:", "<!-- PLAN:", "# PLAN:", "PLAN:"];

/// Raw text with transport noise removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Prepared<'a> {
    pub body: &'a str,
    pub plan: Option<FilePlan>,
}

/// Strip a BOM, unwrap a JSON-carrying fence and remove the plan header.
pub(crate) fn prepare(raw: &str) -> Prepared<'_> {
    let text = raw.trim_start_matches('\u{feff}');
    let text = extract_payload_fence(text).unwrap_or(text);
    let (plan, body) = strip_plan_header(text);
    Prepared { body, plan }
}

fn starts_with_payload(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with('{') || PLAN_PREFIXES.iter().any(|prefix| trimmed.starts_with(prefix))
}

/// Body of the first fenced block that carries the envelope. Code fences in
/// other languages are left for salvage.
fn extract_payload_fence(text: &str) -> Option<&str> {
    if starts_with_payload(text) {
        return None;
    }
    let mut rest = text;
    let mut offset = 0;
    while let Some(open) = rest.find("```") {
        let after_ticks = offset + open + 3;
        let line_end = text[after_ticks..].find('\n').map(|i| after_ticks + i)?;
        let info = text[after_ticks..line_end].trim().to_ascii_lowercase();
        let body_start = line_end + 1;
        let body_end = text[body_start..]
            .find("\n```")
            .map(|i| body_start + i + 1)
            .unwrap_or(text.len());
        let body = &text[body_start..body_end];

        if info == "json" || info == "jsonc" || (info.is_empty() && starts_with_payload(body)) {
            return Some(body);
        }
        if body_end >= text.len() {
            return None;
        }
        offset = (body_end + 3).min(text.len());
        rest = &text[offset..];
    }
    None
}

/// Remove a leading `PLAN:` header line. The header's value is located by
/// brace matching since it is itself a JSON object.
pub(crate) fn strip_plan_header(text: &str) -> (Option<FilePlan>, &str) {
    let trimmed = text.trim_start();
    let Some(prefix) = PLAN_PREFIXES.iter().find(|prefix| trimmed.starts_with(**prefix)) else {
        return (None, text);
    };
    let after_prefix = &trimmed[prefix.len()..];
    let value_text = after_prefix.trim_start();
    let value_offset = after_prefix.len() - value_text.len();

    let (plan, mut rest) = match value_text
        .starts_with('{')
        .then(|| find_matching_close(value_text, 0))
        .flatten()
    {
        Some(close) => {
            let plan = serde_json::from_str::<FilePlan>(&value_text[..=close]).ok();
            (plan, &after_prefix[value_offset + close + 1..])
        }
        // Header cut off or not an object: drop the whole line.
        None => match after_prefix.find('\n') {
            Some(newline) => (None, &after_prefix[newline..]),
            None => (None, ""),
        },
    };

    let line_tail = rest.find('\n').unwrap_or(rest.len());
    let tail = rest[..line_tail].trim();
    if tail.is_empty() || tail == "-->" || tail == "*/" {
        rest = &rest[line_tail..];
    }
    (plan, rest.trim_start_matches(['\r', '\n']))
}

/// Every top-level object in `body`, in order: from each `{` to its matching
/// close, or to the end of the text for one that is cut off. Braces in
/// leading prose (`{count}`) come out as their own candidates.
pub(crate) fn payload_candidates(body: &str) -> Vec<&str> {
    let mut candidates = Vec::new();
    let mut offset = 0;
    while let Some(start) = first_object_start(&body[offset..]).map(|at| offset + at) {
        match find_matching_close(body, start) {
            Some(close) => {
                candidates.push(&body[start..=close]);
                offset = close + 1;
            }
            None => {
                candidates.push(&body[start..]);
                break;
            }
        }
    }
    candidates
}

/// From the first `{` to the end of the text; what salvage reads.
pub(crate) fn payload_tail(body: &str) -> Option<&str> {
    first_object_start(body).map(|start| &body[start..])
}

/// String-aware light clean-up: smart quotes used as JSON delimiters become
/// ASCII quotes, trailing commas before `}`/`]` are dropped and raw control
/// characters inside strings are escaped.
pub(crate) fn clean_json(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut smart_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(c);
                continue;
            }
            match c {
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' if !smart_string => {
                    in_string = false;
                    out.push(c);
                }
                '\u{201C}' | '\u{201D}' if smart_string => {
                    in_string = false;
                    smart_string = false;
                    out.push('"');
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
                '"' => out.push_str("\\\""),
                _ => out.push(c),
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '\u{201C}' | '\u{201D}' => {
                in_string = true;
                smart_string = true;
                out.push('"');
            }
            ',' => {
                let mut lookahead = chars.clone();
                let next = loop {
                    match lookahead.next() {
                        Some(ws) if ws.is_whitespace() => continue,
                        other => break other,
                    }
                };
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_header_with_nested_object_is_removed() {
        let raw = "// PLAN: {\"create\":[\"a.txt\"],\"update\":[],\"delete\":[],\"total\":1}\n{\"files\":{}}";
        let (plan, rest) = strip_plan_header(raw);
        let plan = plan.unwrap();
        assert_eq!(plan.create, vec!["a.txt"]);
        assert_eq!(plan.total, 1);
        assert_eq!(rest, "{\"files\":{}}");
    }

    #[test]
    fn html_comment_plan_header_is_removed() {
        let raw = "<!-- PLAN: {\"create\":[],\"update\":[\"b.ts\"],\"delete\":[],\"total\":1} -->\n{\"files\":{}}";
        let (plan, rest) = strip_plan_header(raw);
        assert_eq!(plan.unwrap().update, vec!["b.ts"]);
        assert_eq!(rest, "{\"files\":{}}");
    }

    #[test]
    fn truncated_plan_header_drops_its_line() {
        let (plan, rest) = strip_plan_header("PLAN: {\"create\":[\"a\n{\"files\":{}}");
        assert!(plan.is_none());
        assert_eq!(rest, "{\"files\":{}}");
    }

    #[test]
    fn json_fence_is_unwrapped_but_code_fence_is_not() {
        let raw = "Here you go:\n```json\n{\"files\":{}}\n```\nThanks";
        assert_eq!(prepare(raw).body, "{\"files\":{}}\n");

        let code = "Fix:\n```tsx\nexport const a = () => {};\n```";
        assert_eq!(prepare(code).body, code);
    }

    #[test]
    fn candidate_stops_at_matching_close() {
        let body = "Sure! {\"files\": {\"a.ts\": \"}\"}} trailing prose";
        assert_eq!(payload_candidates(body), vec!["{\"files\": {\"a.ts\": \"}\"}}"]);
        assert_eq!(payload_candidates("{\"files\": {"), vec!["{\"files\": {"]);
        assert!(payload_candidates("no json here").is_empty());
    }

    #[test]
    fn braces_in_leading_prose_do_not_hide_the_payload() {
        let body = "I renamed {count} as asked: {\"files\": {\"a.ts\": \"x\"";
        assert_eq!(
            payload_candidates(body),
            vec!["{count}", "{\"files\": {\"a.ts\": \"x\""]
        );
        assert_eq!(payload_tail(body), Some("{count} as asked: {\"files\": {\"a.ts\": \"x\""));
    }

    #[test]
    fn clean_json_is_string_aware() {
        let cleaned = clean_json("{\"a\": \"x, }\", \"b\": [1, 2, ], }");
        assert_eq!(cleaned, "{\"a\": \"x, }\", \"b\": [1, 2 ] }");
        let value: serde_json::Value = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(value["a"], "x, }");
    }

    #[test]
    fn clean_json_escapes_raw_newlines_and_smart_quotes() {
        let cleaned = clean_json("{\u{201C}files\u{201D}: {\"a.ts\": \"line1\nline2\"}}");
        let value: serde_json::Value = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(value["files"]["a.ts"], "line1\nline2");
    }
}
