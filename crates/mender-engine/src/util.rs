use crate::scan::{is_lead_surrogate, is_partial_unicode_escape};
use regex::Regex;
use std::iter::Peekable;
use std::str::Chars;
use std::sync::OnceLock;

/// Compile `pattern` once per call site. A pattern that fails to compile
/// disables the caller's check instead of panicking.
pub(crate) fn cached_regex(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// Truncate file contents for prompt safety (keep beginning + end)
pub(crate) fn truncate_content(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        content.to_string()
    } else {
        let head: String = content.chars().take(max_chars / 2).collect();
        let tail: String = content
            .chars()
            .rev()
            .take(max_chars / 2)
            .collect::<String>();
        format!(
            "{}\n\n... [truncated] ...\n\n{}",
            head,
            tail.chars().rev().collect::<String>()
        )
    }
}

/// Truncate a string for log and error messages (UTF-8 safe)
pub(crate) fn truncate_for_error(s: &str) -> String {
    const MAX_CHARS: usize = 100;
    if s.chars().count() <= MAX_CHARS {
        s.to_string()
    } else {
        format!(
            "{} [truncated]",
            s.chars().take(MAX_CHARS).collect::<String>()
        )
    }
}

/// Undo one level of JSON string escaping (`\n`, `\t`, `\"`, `\\`, `\uXXXX`).
/// Unknown escapes are kept verbatim.
pub(crate) fn unescape_json_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let Some(code) = take_hex4(&mut chars) else {
                    out.push_str("\\u");
                    continue;
                };
                if let Some(decoded) = char::from_u32(code) {
                    out.push(decoded);
                    continue;
                }
                if is_lead_surrogate(code) {
                    let mut ahead = chars.clone();
                    let low = (ahead.next() == Some('\\') && ahead.next() == Some('u'))
                        .then(|| take_hex4(&mut ahead))
                        .flatten()
                        .filter(|low| (0xDC00..=0xDFFF).contains(low));
                    if let Some(pair) =
                        low.and_then(|low| char::from_u32(0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00)))
                    {
                        out.push(pair);
                        chars = ahead;
                        continue;
                    }
                    // Low half cut off by the end of the text.
                    if is_partial_unicode_escape(chars.clone()) {
                        break;
                    }
                }
                out.push_str(&format!("\\u{code:04x}"));
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn take_hex4(chars: &mut Peekable<Chars<'_>>) -> Option<u32> {
    let hex: String = chars.clone().take(4).collect();
    if hex.len() != 4 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let code = u32::from_str_radix(&hex, 16).ok()?;
    for _ in 0..4 {
        chars.next();
    }
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_content() {
        let content = "line1\nline2\nline3\nline4\nline5";
        let truncated = truncate_content(content, 15);
        assert!(truncated.contains("truncated"));
        assert!(truncated.starts_with("line1"));
        assert!(truncated.ends_with("line5"));
    }

    #[test]
    fn test_truncate_for_error_marks_truncation() {
        let long = "a".repeat(140);
        let truncated = truncate_for_error(&long);
        assert!(truncated.ends_with(" [truncated]"), "{}", truncated);
    }

    #[test]
    fn test_unescape_json_string() {
        assert_eq!(unescape_json_string(r#"a\nb\t\"c\"\\"#), "a\nb\t\"c\"\\");
        assert_eq!(unescape_json_string(r"A\u00"), "A\\u00");
        assert_eq!(unescape_json_string(r"keep \q"), "keep \\q");
    }

    #[test]
    fn test_unescape_surrogate_pairs() {
        assert_eq!(unescape_json_string(r"smile \ud83d\ude00!"), "smile \u{1F600}!");
        assert_eq!(unescape_json_string(r"smile \ud83d"), "smile ");
        assert_eq!(unescape_json_string(r"smile \ud83d\ude"), "smile ");
        assert_eq!(unescape_json_string(r"lone \udc00 half"), "lone \\udc00 half");
    }
}
