//! Pattern-based salvage, used only after every structured parse failed.
//!
//! Stages run from strictest to loosest and the first one that yields a valid
//! entry wins.

use crate::decode::members::file_members;
use crate::decode::validate::{validate_path, validate_salvaged, Validated};
use crate::sanitize::looks_like_code;
use crate::util::{cached_regex, unescape_json_string};
use mender_core::{DecoderSettings, SalvageStage};
use regex::Regex;
use std::sync::OnceLock;

/// Longest key the regex stages accept as a path.
const MAX_KEY_CHARS: usize = 300;

pub(crate) struct SalvageInput<'a> {
    /// Text from the first `{`, when there is one.
    pub candidate: Option<&'a str>,
    /// The whole response after BOM removal.
    pub raw: &'a str,
}

type SalvageFn = fn(&SalvageInput<'_>, &DecoderSettings) -> Option<Vec<(String, String)>>;

const LADDER: &[(SalvageStage, SalvageFn)] = &[
    (SalvageStage::BacktickBodies, backtick_bodies),
    (SalvageStage::QuotedBodies, quoted_bodies),
    (SalvageStage::StringScan, string_scan),
    (SalvageStage::FencedBlocks, fenced_blocks),
];

pub(crate) fn run_ladder(
    input: &SalvageInput<'_>,
    settings: &DecoderSettings,
) -> Option<(SalvageStage, Validated)> {
    for (stage, extract) in LADDER {
        let Some(pairs) = extract(input, settings) else {
            continue;
        };
        let validated = validate_salvaged(pairs, settings);
        if !validated.files.is_empty() {
            tracing::info!(
                stage = stage.label(),
                files = validated.files.len(),
                skipped = validated.skipped.len(),
                "salvaged payload"
            );
            return Some((*stage, validated));
        }
        tracing::debug!(stage = stage.label(), "salvage stage produced no valid entries");
    }
    None
}

fn non_empty(pairs: Vec<(String, String)>) -> Option<Vec<(String, String)>> {
    (!pairs.is_empty()).then_some(pairs)
}

/// `"path": `body`` pairs.
fn backtick_bodies(input: &SalvageInput<'_>, _settings: &DecoderSettings) -> Option<Vec<(String, String)>> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let text = input.candidate?;
    let re = cached_regex(
        &RE,
        &format!(r#"(?s)"([^"\n\\]{{1,{MAX_KEY_CHARS}}})"\s*:\s*`(.*?)`"#),
    )?;
    non_empty(
        re.captures_iter(text)
            .map(|caps| (caps[1].to_string(), caps[2].to_string()))
            .collect(),
    )
}

/// Complete `"path": "escaped body"` pairs.
fn quoted_bodies(input: &SalvageInput<'_>, _settings: &DecoderSettings) -> Option<Vec<(String, String)>> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let text = input.candidate?;
    let re = cached_regex(
        &RE,
        &format!(r#"(?s)"([^"\n\\]{{1,{MAX_KEY_CHARS}}})"\s*:\s*"((?:[^"\\]|\\.)*)""#),
    )?;
    non_empty(
        re.captures_iter(text)
            .filter(|caps| validate_path(&caps[1]).is_ok())
            .map(|caps| (caps[1].to_string(), unescape_json_string(&caps[2])))
            .collect(),
    )
}

/// Member walk that also reads a body cut off by the end of the text.
fn string_scan(input: &SalvageInput<'_>, settings: &DecoderSettings) -> Option<Vec<(String, String)>> {
    let text = input.candidate?;
    non_empty(
        file_members(text, settings.max_string_scan_chars)
            .into_iter()
            .map(|member| (member.path, unescape_json_string(member.body)))
            .collect(),
    )
}

/// Fenced code blocks anywhere in the response, with a path taken from the
/// info string, a first-line comment or the content's shape.
fn fenced_blocks(input: &SalvageInput<'_>, _settings: &DecoderSettings) -> Option<Vec<(String, String)>> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = cached_regex(&RE, r"(?s)```([^\n`]*)\n(.*?)(?:```|\z)")?;
    non_empty(
        re.captures_iter(input.raw)
            .filter_map(|caps| {
                let info = caps[1].trim();
                let body = caps[2].to_string();
                let path = infer_block_path(info, &body)?;
                Some((path, body))
            })
            .collect(),
    )
}

fn infer_block_path(info: &str, body: &str) -> Option<String> {
    if let Some(path) = info
        .split(|c: char| c.is_whitespace() || c == ':' || c == '=')
        .map(|token| token.trim_matches(['"', '\'']))
        .find(|token| validate_path(token).is_ok())
    {
        return Some(path.to_string());
    }
    if let Some(path) = first_line_path(body) {
        return Some(path);
    }
    let lang = info
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    shape_path(&lang, body).map(str::to_string)
}

/// `// src/App.tsx`, `# File: main.py`, `<!-- index.html -->` and similar.
fn first_line_path(body: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = cached_regex(
        &RE,
        r"(?i)^\s*(?://|#|/\*|<!--|--)\s*(?:(?:file(?:name)?|path)\s*:\s*)?([\w./@-]+\.[A-Za-z0-9]{1,10})\s*(?:\*/|-->)?\s*$",
    )?;
    let first = body.lines().next()?;
    let caps = re.captures(first)?;
    let path = caps.get(1)?.as_str();
    validate_path(path).is_ok().then(|| path.to_string())
}

fn shape_path(lang: &str, body: &str) -> Option<&'static str> {
    let path = match lang {
        "html" | "htm" => "index.html",
        "css" => "src/index.css",
        "tsx" => "src/App.tsx",
        "jsx" => "src/App.jsx",
        "ts" | "typescript" => "src/index.ts",
        "js" | "javascript" => "src/index.js",
        "py" | "python" => "main.py",
        "rs" | "rust" => "src/main.rs",
        "json" if body.contains("\"dependencies\"") && !body.contains("\"files\"") => "package.json",
        _ => {
            let head = body.trim_start();
            if head.starts_with("<!DOCTYPE") || head.starts_with("<html") {
                "index.html"
            } else if looks_like_code(body) && (body.contains("from 'react'") || body.contains("from \"react\"")) {
                "src/App.tsx"
            } else {
                return None;
            }
        }
    };
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder(candidate: &str) -> Option<(SalvageStage, Validated)> {
        run_ladder(
            &SalvageInput {
                candidate: Some(candidate),
                raw: candidate,
            },
            &DecoderSettings::default(),
        )
    }

    #[test]
    fn backtick_stage_is_tried_first() {
        let text = "{\"files\": {\"src/a.ts\": `export const a = 1;\n`, \"src/b.ts\": `export const b = 2;`";
        let (stage, out) = ladder(text).unwrap();
        assert_eq!(stage, SalvageStage::BacktickBodies);
        assert_eq!(out.files.len(), 2);
        assert_eq!(out.files["src/a.ts"], "export const a = 1;\n");
    }

    #[test]
    fn quoted_stage_unescapes_bodies() {
        // A stray comma-less member breaks the JSON but not the pattern.
        let text = r#"{"files": {"src/a.ts": "export const a = \"x\";\n" "src/b.ts": "export const b = 1;"}"#;
        let (stage, out) = ladder(text).unwrap();
        assert_eq!(stage, SalvageStage::QuotedBodies);
        assert_eq!(out.files["src/a.ts"], "export const a = \"x\";\n");
    }

    #[test]
    fn string_scan_reads_cut_off_body() {
        let text = r#"{"files": {"src/a.ts": "import x from './x';\nexport default x"#;
        let (stage, out) = ladder(text).unwrap();
        assert_eq!(stage, SalvageStage::StringScan);
        assert_eq!(out.files["src/a.ts"], "import x from './x';\nexport default x");
    }

    #[test]
    fn fenced_blocks_infer_paths() {
        let raw = "Here is the fix:\n```tsx\n// src/components/Nav.tsx\nexport const Nav = () => <nav />;\n```\nand\n```html\n<!DOCTYPE html>\n<html></html>\n```";
        let out = run_ladder(
            &SalvageInput { candidate: None, raw },
            &DecoderSettings::default(),
        )
        .map(|(stage, out)| {
            assert_eq!(stage, SalvageStage::FencedBlocks);
            out
        })
        .unwrap();
        let paths: Vec<&str> = out.files.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["src/components/Nav.tsx", "index.html"]);
    }

    #[test]
    fn prose_in_code_file_is_rejected() {
        let text = r#"{"src/App.tsx": "I could not find the problem, sorry"#;
        assert!(ladder(text).is_none());
    }
}
