//! Bounded walk over `"key": "value"` members of a possibly cut-off payload.
//!
//! Used where structured parsing already failed (string-scan salvage) or
//! cannot work yet (streaming progress).

use crate::decode::validate::validate_path;

const ITEM_PATH_KEYS: &[&str] = &["path", "file", "filePath", "filename", "name"];
const ITEM_CONTENT_KEYS: &[&str] = &["content", "code", "diff"];

/// A file body found in the text. `body` is still JSON-escaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileMember<'a> {
    pub path: String,
    pub body: &'a str,
    /// False when the text ends (or the scan bound is hit) inside the body.
    pub closed: bool,
}

struct StringSpan {
    end: usize,
    closed: bool,
    dangling_escape: bool,
    hit_limit: bool,
}

/// Read a string body starting just after its opening quote. Stops at the
/// closing quote, the end of the text, or after `limit` characters.
fn read_string(bytes: &[u8], start: usize, limit: usize) -> StringSpan {
    let mut chars = 0usize;
    let mut escaped = false;
    let mut i = start;
    while i < bytes.len() {
        let b = bytes[i];
        // Count characters at UTF-8 lead bytes only.
        if b & 0xC0 != 0x80 {
            if chars >= limit {
                return StringSpan {
                    end: i,
                    closed: false,
                    dangling_escape: escaped,
                    hit_limit: true,
                };
            }
            chars += 1;
        }
        if escaped {
            escaped = false;
        } else if b == b'\\' {
            escaped = true;
        } else if b == b'"' {
            return StringSpan {
                end: i,
                closed: true,
                dangling_escape: false,
                hit_limit: false,
            };
        }
        i += 1;
    }
    StringSpan {
        end: bytes.len(),
        closed: false,
        dangling_escape: escaped,
        hit_limit: false,
    }
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

fn is_path_key(key: &str) -> bool {
    validate_path(key).is_ok()
}

/// Every file body the text carries, either as `"path": "body"` or as
/// `{"path": "...", "content": "body"}` items, in encounter order.
pub(crate) fn file_members(text: &str, limit: usize) -> Vec<FileMember<'_>> {
    let bytes = text.as_bytes();
    let mut members = Vec::new();
    let mut item_path: Option<String> = None;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'"' {
            i += 1;
            continue;
        }

        let key_span = read_string(bytes, i + 1, limit);
        if !key_span.closed {
            break;
        }
        let key = &text[i + 1..key_span.end];
        let after_key = skip_whitespace(bytes, key_span.end + 1);
        if bytes.get(after_key) != Some(&b':') {
            i = key_span.end + 1;
            continue;
        }

        let value_at = skip_whitespace(bytes, after_key + 1);
        match bytes.get(value_at) {
            Some(b'"') => {
                let value_span = read_string(bytes, value_at + 1, limit);
                let mut body_end = value_span.end;
                if value_span.dangling_escape {
                    body_end -= 1;
                }
                let body = &text[value_at + 1..body_end];
                let path = if is_path_key(key) {
                    Some(key.to_string())
                } else if ITEM_CONTENT_KEYS.contains(&key) {
                    item_path.take()
                } else {
                    if ITEM_PATH_KEYS.contains(&key) && is_path_key(body) {
                        item_path = Some(body.to_string());
                    }
                    None
                };
                if let Some(path) = path {
                    members.push(FileMember {
                        path,
                        body,
                        closed: value_span.closed,
                    });
                }
                if !value_span.closed || value_span.hit_limit {
                    break;
                }
                i = value_span.end + 1;
            }
            Some(b'{') if is_path_key(key) => {
                item_path = Some(key.to_string());
                i = value_at + 1;
            }
            _ => i = value_at,
        }
    }
    members
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_path_keyed_bodies_and_cut_off_tail() {
        let text = r#"{"files": {"src/a.ts": "export const a = \"x\";", "src/b.ts": "export const b"#;
        let members = file_members(text, 10_000);
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].path, "src/a.ts");
        assert_eq!(members[0].body, r#"export const a = \"x\";"#);
        assert!(members[0].closed);
        assert_eq!(members[1].body, "export const b");
        assert!(!members[1].closed);
    }

    #[test]
    fn attributes_item_content_to_item_path() {
        let text = r#"{"changes": [{"path": "src/a.ts", "content": "export {}"}, {"path": "src/b.ts", "code": "let"#;
        let members = file_members(text, 10_000);
        let paths: Vec<&str> = members.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths, vec!["src/a.ts", "src/b.ts"]);
        assert!(!members[1].closed);
    }

    #[test]
    fn nested_content_object_under_path_key() {
        let text = r#"{"files": {"src/a.ts": {"content": "export {}"}}}"#;
        let members = file_members(text, 10_000);
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].path, "src/a.ts");
    }

    #[test]
    fn scan_stops_at_bound() {
        let text = format!(r#"{{"src/a.ts": "{}", "src/b.ts": "x"}}"#, "y".repeat(50));
        let members = file_members(&text, 10);
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].body.len(), 10);
        assert!(!members[0].closed);
    }

    #[test]
    fn dangling_escape_is_dropped_from_body() {
        let members = file_members(r#"{"a.txt": "line\"#, 100);
        assert_eq!(members[0].body, "line");
    }
}
