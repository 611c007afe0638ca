//! Per-entry validation of decoded `(path, value)` pairs.

use crate::decode::shapes::RawEntries;
use crate::sanitize::{extension_of, looks_like_code, requires_code_shape};
use crate::util::cached_regex;
use indexmap::IndexMap;
use mender_core::ignore::{is_ignored_path, normalize_path};
use mender_core::{DecoderSettings, SkipReason, SkippedEntry};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Object fields that may carry a file body, in preference order.
const CONTENT_KEYS: &[&str] = &["content", "code", "diff"];

/// Extension tokens a model sometimes emits in place of a file body.
const BARE_EXTENSION_TOKENS: &[&str] = &[
    "js", "jsx", "ts", "tsx", "mjs", "cjs", "json", "css", "scss", "html", "md", "py", "rs",
    "go", "vue", "svelte", "txt", "yaml", "yml", "toml",
];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Validated {
    pub files: IndexMap<String, String>,
    pub deleted: Vec<String>,
    pub skipped: Vec<SkippedEntry>,
}

impl Validated {
    pub fn has_entries(&self) -> bool {
        !self.files.is_empty() || !self.deleted.is_empty()
    }

    fn skip(&mut self, path: &str, reason: SkipReason) {
        tracing::debug!(path, reason = reason.label(), "dropped entry");
        self.skipped.push(SkippedEntry {
            path: path.to_string(),
            reason,
        });
    }
}

/// A key is a file path when it has a separator or a short extension.
pub(crate) fn validate_path(raw: &str) -> Result<String, SkipReason> {
    static EXT_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let path = normalize_path(raw);
    let has_extension = cached_regex(&EXT_RE, r"\.[A-Za-z0-9]{1,10}$")
        .map(|re| re.is_match(&path))
        .unwrap_or(false);
    if path.is_empty() || (!path.contains('/') && !has_extension) {
        return Err(SkipReason::NotAPath);
    }
    if path.split('/').any(|segment| segment.is_empty() || segment.contains('*')) {
        return Err(SkipReason::GlobSegment);
    }
    if is_ignored_path(&path) {
        return Err(SkipReason::Ignored);
    }
    Ok(path)
}

pub(crate) fn validate_content(
    path: &str,
    content: &str,
    settings: &DecoderSettings,
    salvaged: bool,
) -> Result<(), SkipReason> {
    let trimmed = content.trim();
    if trimmed.chars().count() < settings.min_content_chars.max(1) {
        return Err(SkipReason::TooShort);
    }
    let token = trimmed.trim_start_matches('.').to_ascii_lowercase();
    let is_own_extension = extension_of(path)
        .map(|ext| ext.eq_ignore_ascii_case(&token))
        .unwrap_or(false);
    if is_own_extension || BARE_EXTENSION_TOKENS.contains(&token.as_str()) {
        return Err(SkipReason::BareExtension);
    }
    if salvaged && requires_code_shape(path) && !looks_like_code(content) {
        return Err(SkipReason::NotCode);
    }
    Ok(())
}

enum EntryValue {
    Content(String),
    Deleted,
}

fn is_deletion(obj: &serde_json::Map<String, Value>) -> bool {
    let flag = |key: &str| obj.get(key).and_then(Value::as_bool).unwrap_or(false);
    flag("deleted")
        || flag("isDeleted")
        || obj
            .get("action")
            .and_then(Value::as_str)
            .map(|action| action.eq_ignore_ascii_case("delete"))
            .unwrap_or(false)
}

fn entry_value(value: &Value) -> Option<EntryValue> {
    match value {
        Value::String(text) => Some(EntryValue::Content(text.clone())),
        Value::Object(obj) if is_deletion(obj) => Some(EntryValue::Deleted),
        Value::Object(obj) => CONTENT_KEYS
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_str))
            .map(|text| EntryValue::Content(text.to_string())),
        _ => None,
    }
}

/// Validate structurally parsed entries.
pub(crate) fn validate_entries(entries: RawEntries, settings: &DecoderSettings) -> Validated {
    let mut out = Validated::default();
    for (raw_path, value) in entries {
        let path = match validate_path(&raw_path) {
            Ok(path) => path,
            Err(reason) => {
                out.skip(&raw_path, reason);
                continue;
            }
        };
        match entry_value(&value) {
            Some(EntryValue::Deleted) => {
                if !out.deleted.contains(&path) {
                    out.deleted.push(path);
                }
            }
            Some(EntryValue::Content(content)) => {
                match validate_content(&path, &content, settings, false) {
                    Ok(()) => {
                        out.files.insert(path, content);
                    }
                    Err(reason) => out.skip(&path, reason),
                }
            }
            None => out.skip(&path, SkipReason::UnsupportedValue),
        }
    }
    out
}

/// Validate pattern-salvaged `(path, content)` pairs. The first occurrence
/// of a path wins.
pub(crate) fn validate_salvaged(pairs: Vec<(String, String)>, settings: &DecoderSettings) -> Validated {
    let mut out = Validated::default();
    for (raw_path, content) in pairs {
        let path = match validate_path(&raw_path) {
            Ok(path) => path,
            Err(reason) => {
                out.skip(&raw_path, reason);
                continue;
            }
        };
        if out.files.contains_key(&path) {
            continue;
        }
        match validate_content(&path, &content, settings, true) {
            Ok(()) => {
                out.files.insert(path, content);
            }
            Err(reason) => out.skip(&path, reason),
        }
    }
    out
}

/// Normalise and filter `deletedFiles`.
pub(crate) fn validate_deletions(paths: Vec<String>, out: &mut Validated) {
    for raw in paths {
        match validate_path(&raw) {
            Ok(path) => {
                if !out.deleted.contains(&path) {
                    out.deleted.push(path);
                }
            }
            Err(reason) => out.skip(&raw, reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings() -> DecoderSettings {
        DecoderSettings::default()
    }

    #[test]
    fn path_rules() {
        assert_eq!(validate_path("./src/App.tsx"), Ok("src/App.tsx".to_string()));
        assert_eq!(validate_path("Dockerfile/x"), Ok("Dockerfile/x".to_string()));
        assert_eq!(validate_path("explanation"), Err(SkipReason::NotAPath));
        assert_eq!(validate_path("src//a.ts"), Err(SkipReason::GlobSegment));
        assert_eq!(validate_path("src/*.ts"), Err(SkipReason::GlobSegment));
        assert_eq!(validate_path(".git/config"), Err(SkipReason::Ignored));
        assert_eq!(validate_path("src/node_modules/x.ts"), Err(SkipReason::Ignored));
    }

    #[test]
    fn content_rules() {
        let s = settings();
        assert_eq!(validate_content("a.txt", "x", &s, false), Err(SkipReason::TooShort));
        assert_eq!(validate_content("src/a.tsx", "tsx", &s, false), Err(SkipReason::BareExtension));
        assert_eq!(validate_content("src/a.ts", ".json", &s, false), Err(SkipReason::BareExtension));
        assert_eq!(validate_content("a.txt", "hello", &s, false), Ok(()));
        assert_eq!(
            validate_content("src/a.tsx", "just words here", &s, true),
            Err(SkipReason::NotCode)
        );
        assert_eq!(validate_content("notes.md", "just words here", &s, true), Ok(()));
    }

    #[test]
    fn object_values_and_deletions() {
        let entries = vec![
            ("src/a.ts".to_string(), json!({"content": "export const a = 1;"})),
            ("src/b.ts".to_string(), json!({"code": "export const b = 2;"})),
            ("src/old.ts".to_string(), json!({"action": "delete"})),
            ("src/c.ts".to_string(), json!(42)),
            ("summary".to_string(), json!("prose")),
        ];
        let out = validate_entries(entries, &settings());
        assert_eq!(out.files.len(), 2);
        assert_eq!(out.deleted, vec!["src/old.ts"]);
        let reasons: Vec<SkipReason> = out.skipped.iter().map(|s| s.reason).collect();
        assert_eq!(reasons, vec![SkipReason::UnsupportedValue, SkipReason::NotAPath]);
    }

    #[test]
    fn salvaged_duplicates_keep_first() {
        let pairs = vec![
            ("src/a.ts".to_string(), "export const a = 1;".to_string()),
            ("src/a.ts".to_string(), "export const a = 2;".to_string()),
        ];
        let out = validate_salvaged(pairs, &settings());
        assert_eq!(out.files["src/a.ts"], "export const a = 1;");
    }
}
