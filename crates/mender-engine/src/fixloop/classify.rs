use crate::util::cached_regex;
use mender_core::ignore::normalize_path;
use mender_core::{ErrorClassification, ErrorKind};
use regex::Regex;
use std::sync::OnceLock;

static UNRESOLVED_IMPORT: OnceLock<Option<Regex>> = OnceLock::new();
static UNDEFINED_REFERENCE: OnceLock<Option<Regex>> = OnceLock::new();
static SYNTAX: OnceLock<Option<Regex>> = OnceLock::new();
static TYPE: OnceLock<Option<Regex>> = OnceLock::new();
static RUNTIME: OnceLock<Option<Regex>> = OnceLock::new();
static LOCATION: OnceLock<Option<Regex>> = OnceLock::new();
static IMPORTER: OnceLock<Option<Regex>> = OnceLock::new();

fn unresolved_import(text: &str) -> Option<String> {
    let re = cached_regex(
        &UNRESOLVED_IMPORT,
        r#"(?:Failed to resolve import\s+["']([^"']+)["']|Cannot find module\s+["']([^"']+)["']|Can't resolve\s+["']([^"']+)["']|Could not resolve\s+["']([^"']+)["']|No module named\s+["']([^"']+)["']|Unable to resolve module\s+["']?([^\s"']+))"#,
    )?;
    let caps = re.captures(text)?;
    caps.iter()
        .skip(1)
        .flatten()
        .next()
        .map(|m| m.as_str().to_string())
}

fn undefined_reference(text: &str) -> Option<String> {
    let re = cached_regex(
        &UNDEFINED_REFERENCE,
        r#"(?:\b([A-Za-z_$][\w$]*) is not defined|Cannot find name\s+'([A-Za-z_$][\w$]*)'|name\s+'([A-Za-z_]\w*)'\s+is not defined|'([A-Za-z_$][\w$]*)' is not defined)"#,
    )?;
    let caps = re.captures(text)?;
    caps.iter()
        .skip(1)
        .flatten()
        .next()
        .map(|m| m.as_str().to_string())
}

fn matches(cell: &'static OnceLock<Option<Regex>>, pattern: &str, text: &str) -> bool {
    cached_regex(cell, pattern).is_some_and(|re| re.is_match(text))
}

/// `path:line:col` as printed by bundlers, compilers and stack frames.
/// Frames pointing into dependencies are skipped.
fn location(text: &str) -> Option<(String, Option<u32>, Option<u32>)> {
    let re = cached_regex(
        &LOCATION,
        r#"(?P<path>[^\s()'"`<>]+?\.[A-Za-z0-9]{1,10})(?:\?[^\s:()]*)?:(?P<line>\d+)(?::(?P<col>\d+))?"#,
    )?;
    re.captures_iter(text).find_map(|caps| {
        let path = clean_location_path(caps.name("path")?.as_str())?;
        let line = caps.name("line").and_then(|m| m.as_str().parse().ok());
        let col = caps.name("col").and_then(|m| m.as_str().parse().ok());
        Some((path, line, col))
    })
}

/// The file named in Vite's `... from "src/App.tsx"` suffix.
fn importer(text: &str) -> Option<String> {
    let re = cached_regex(&IMPORTER, r#"Failed to resolve import\s+["'][^"']+["']\s+from\s+["']([^"']+)["']"#)?;
    let caps = re.captures(text)?;
    clean_location_path(caps.get(1)?.as_str())
}

fn clean_location_path(raw: &str) -> Option<String> {
    let mut path = raw;
    if let Some(idx) = path.find("://") {
        let after_scheme = &path[idx + 3..];
        path = after_scheme.find('/').map(|slash| &after_scheme[slash..])?;
    }
    if path.contains("node_modules") || path.starts_with("node:") {
        return None;
    }
    let path = match path.find("/src/") {
        Some(idx) => &path[idx + 1..],
        None => path,
    };
    let path = normalize_path(path);
    (!path.is_empty()).then_some(path)
}

/// Classify a build or runtime error message, pulling out whatever location
/// and subject details it carries.
pub fn classify_error(message: &str, stack: Option<&str>) -> ErrorClassification {
    let combined = match stack {
        Some(stack) if !stack.trim().is_empty() => format!("{message}\n{stack}"),
        _ => message.to_string(),
    };

    let mut classification = ErrorClassification {
        message: message.trim().to_string(),
        ..ErrorClassification::default()
    };

    if let Some(bad_path) = unresolved_import(&combined) {
        classification.kind = ErrorKind::UnresolvedImport;
        classification.bad_path = Some(bad_path);
    } else if let Some(symbol) = undefined_reference(&combined) {
        classification.kind = ErrorKind::UndefinedReference;
        classification.symbol = Some(symbol);
    } else if matches(
        &SYNTAX,
        r"(?i)(SyntaxError|Unexpected token|Unterminated|Unexpected end of (?:input|file)|Parse error|Expected .+ but found|Missing semicolon)",
        &combined,
    ) {
        classification.kind = ErrorKind::Syntax;
    } else if matches(
        &TYPE,
        r"(error TS\d+|TypeError|is not assignable to|is not a function|Property '[^']+' does not exist)",
        &combined,
    ) {
        classification.kind = ErrorKind::Type;
    } else if matches(
        &RUNTIME,
        r"(RangeError|Uncaught|Unhandled|Maximum call stack|Cannot read propert|undefined is not|null is not|Error:)",
        &combined,
    ) {
        classification.kind = ErrorKind::Runtime;
    }

    if let Some((file, line, column)) = location(&combined) {
        classification.file = Some(file);
        classification.line = line;
        classification.column = column;
    } else if let Some(file) = importer(&combined) {
        classification.file = Some(file);
    }

    classification
}
