//! Transport clean-up for decoded file contents.
//!
//! Only formatting artifacts are removed. Nothing here tries to repair the
//! code itself.

use crate::util::cached_regex;
use regex::Regex;
use std::sync::OnceLock;

/// Extensions whose salvaged content must pass [`looks_like_code`].
const CODE_EXTENSIONS: &[&str] = &[
    "js", "jsx", "ts", "tsx", "mjs", "cjs", "vue", "svelte", "py", "rs", "go", "java", "kt",
    "swift", "rb", "php", "html", "htm",
];

/// Heuristic gate for salvaged text: an import, an export, a function or
/// arrow definition, a class definition or a tag-like opening bracket.
pub fn looks_like_code(text: &str) -> bool {
    static CODE_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = cached_regex(
        &CODE_RE,
        r#"(?m)(^\s*import\s+[\w{*'"]|\brequire\(\s*['"]|^\s*from\s+[\w.]+\s+import\b|^\s*use\s+[\w:]+|^\s*export\s+|\bmodule\.exports\b|\bfunction\b\s*[\w$]*\s*\(|=>|\bdef\s+\w+\s*\(|\bfn\s+\w+|\bfunc\s+\w+|^\s*(?:export\s+)?(?:abstract\s+)?class\s+\w+|^\s*(?:pub\s+)?struct\s+\w+|<[A-Za-z][\w.-]*[\s/>]|<!DOCTYPE)"#,
    ) else {
        return false;
    };
    re.is_match(text)
}

/// True when salvaged content for this path has to look like code.
pub fn requires_code_shape(path: &str) -> bool {
    extension_of(path)
        .map(|ext| CODE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn extension_of(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if ext.is_empty() || (stem.is_empty() && !name.starts_with('.')) {
        return None;
    }
    Some(ext)
}

/// Remove one outer fenced block wrapper (```lang ... ```) when the whole
/// content is wrapped in it.
pub fn strip_code_fences(content: &str) -> String {
    let trimmed = content.trim();
    if !trimmed.starts_with("```") {
        return content.to_string();
    }
    let Some(first_newline) = trimmed.find('\n') else {
        return content.to_string();
    };
    let info = &trimmed[3..first_newline];
    if info.contains('`') {
        return content.to_string();
    }
    let body = &trimmed[first_newline + 1..];
    let body = match body.trim_end().strip_suffix("```") {
        Some(inner) => inner,
        // An opening fence with no closer: the response was cut off.
        None => body,
    };
    let mut out = body.trim_end_matches([' ', '\t']).to_string();
    if !out.ends_with('\n') && content.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Drop stray wrapper tags (`<file path="...">`, `</file>`, `[END FILE]`) on
/// the first or last line.
pub fn strip_marker_tags(content: &str) -> String {
    static TAG_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = cached_regex(
        &TAG_RE,
        r#"^\s*(?:</?(?:file|edit|code|content)(?:\s+[^>]*)?>|\[/?(?:END\s+)?FILE(?:\s*:[^\]]*)?\]|<<<\s*(?:END\s+)?FILE[^>]*>>>)\s*$"#,
    ) else {
        return content.to_string();
    };

    let mut lines: Vec<&str> = content.split_inclusive('\n').collect();
    if lines
        .first()
        .map(|line| re.is_match(line.trim_end_matches(['\r', '\n'])))
        .unwrap_or(false)
    {
        lines.remove(0);
    }
    if lines
        .last()
        .map(|line| re.is_match(line.trim_end_matches(['\r', '\n'])))
        .unwrap_or(false)
    {
        lines.pop();
    }
    lines.concat()
}

/// Minimal clean-up applied to every full-content file before it is committed.
pub fn sanitize_content(content: &str) -> String {
    strip_marker_tags(&strip_code_fences(content))
}

/// Keep the original file's trailing-newline convention (LF / CRLF / none).
pub fn normalize_generated_content(original: &str, content: String) -> String {
    let original_ends_newline = original.ends_with('\n');
    let mut normalized = content;

    if original_ends_newline {
        if !normalized.ends_with('\n') {
            if original.ends_with("\r\n") {
                normalized.push_str("\r\n");
            } else {
                normalized.push('\n');
            }
        }
    } else {
        while normalized.ends_with('\n') {
            let cut = if normalized.ends_with("\r\n") { 2 } else { 1 };
            normalized.truncate(normalized.len().saturating_sub(cut));
        }
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_like_code_accepts_common_shapes() {
        assert!(looks_like_code("import React from 'react';"));
        assert!(looks_like_code("export default App;"));
        assert!(looks_like_code("const f = (a) => a + 1;"));
        assert!(looks_like_code("function go() {}"));
        assert!(looks_like_code("<div className=\"x\">hi</div>"));
        assert!(looks_like_code("class Store {\n}"));
        assert!(looks_like_code("def run():\n    pass"));
    }

    #[test]
    fn looks_like_code_rejects_prose() {
        assert!(!looks_like_code("Could you tell me which file has the error?"));
        assert!(!looks_like_code("I updated the header so it renders correctly."));
    }

    #[test]
    fn strips_outer_fences_only() {
        let fenced = "```tsx\nconst a = 1;\n```\n";
        assert_eq!(strip_code_fences(fenced), "const a = 1;\n");

        let inner = "const md = `\n```js\n`;\n";
        assert_eq!(strip_code_fences(inner), inner);
    }

    #[test]
    fn strips_unterminated_fence() {
        assert_eq!(strip_code_fences("```js\nlet x = 1;"), "let x = 1;");
    }

    #[test]
    fn strips_wrapper_tags() {
        let wrapped = "<file path=\"src/a.ts\">\nexport const a = 1;\n</file>\n";
        assert_eq!(strip_marker_tags(wrapped), "export const a = 1;\n");
        let clean = "<div>\n  hi\n</div>\n";
        assert_eq!(strip_marker_tags(clean), clean);
    }

    #[test]
    fn code_shape_required_for_source_extensions() {
        assert!(requires_code_shape("src/App.tsx"));
        assert!(!requires_code_shape("README.md"));
        assert!(!requires_code_shape("package.json"));
        assert_eq!(extension_of(".gitignore"), Some("gitignore"));
        assert_eq!(extension_of("Makefile"), None);
    }

    #[test]
    fn test_normalize_generated_content_adds_newline_when_original_had() {
        let normalized = normalize_generated_content("line1\n", "line1".to_string());
        assert_eq!(normalized, "line1\n");
    }

    #[test]
    fn test_normalize_generated_content_strips_newline_when_original_missing() {
        let normalized = normalize_generated_content("line1", "line1\n\n".to_string());
        assert_eq!(normalized, "line1");
    }

    #[test]
    fn test_normalize_generated_content_preserves_crlf() {
        let normalized = normalize_generated_content("line1\r\n", "line1".to_string());
        assert_eq!(normalized, "line1\r\n");
    }
}
