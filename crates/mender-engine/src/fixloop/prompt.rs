use super::imports::{importers_of, local_dependencies};
use crate::util::truncate_content;
use mender_core::{
    AgentAttempt, ErrorClassification, ErrorKind, FileSnapshot, FixLoopSettings, FixPrompt,
};
use std::fmt::Write as _;

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED BUILDING BLOCKS
// ═══════════════════════════════════════════════════════════════════════════════

const RESPONSE_FORMAT: &str = r#"OUTPUT (JSON object only, no prose before or after):
{
  "files": {
    "path/to/file.tsx": "<complete new file content>"
  },
  "deletedFiles": [],
  "explanation": "<one sentence>"
}"#;

const FIX_RULES: &str = r#"RULES:
- Return the COMPLETE content of every file you change. No placeholders, ellipses, or line numbers.
- Only include files that need to change.
- Fix the root cause of the error, not only the symptom.
- Keep imports consistent with files that actually exist in the project.
- Do not ask questions. If information is missing, make the most reasonable fix."#;

/// Listing every path costs little and stops the model inventing imports.
const MAX_LISTED_PATHS: usize = 200;

// ═══════════════════════════════════════════════════════════════════════════════
// PROMPTS
// ═══════════════════════════════════════════════════════════════════════════════

pub const FIX_ERROR_SYSTEM: &str = "You fix build and runtime errors in a web project.";

pub(crate) fn fix_system_prompt() -> String {
    format!("{FIX_ERROR_SYSTEM}\n\n{FIX_RULES}\n\n{RESPONSE_FORMAT}")
}

pub(crate) struct PromptInput<'a> {
    pub error: &'a ErrorClassification,
    pub stack: Option<&'a str>,
    pub target_file: &'a str,
    pub files: &'a FileSnapshot,
    pub history: &'a [AgentAttempt],
    pub settings: &'a FixLoopSettings,
}

fn push_file(out: &mut String, path: &str, content: &str, max_chars: usize) {
    let _ = write!(
        out,
        "--- {path} ---\n```\n{}\n```\n\n",
        truncate_content(content, max_chars)
    );
}

fn push_error(out: &mut String, error: &ErrorClassification, stack: Option<&str>) {
    let _ = writeln!(out, "ERROR ({}):\n{}", error.kind.label(), error.message);
    if let Some(file) = &error.file {
        let _ = write!(out, "Location: {file}");
        if let Some(line) = error.line {
            let _ = write!(out, ":{line}");
            if let Some(column) = error.column {
                let _ = write!(out, ":{column}");
            }
        }
        out.push('\n');
    }
    if let Some(bad_path) = &error.bad_path {
        let _ = writeln!(out, "Unresolved module: {bad_path}");
    }
    if let Some(symbol) = &error.symbol {
        let _ = writeln!(out, "Undefined identifier: {symbol}");
    }
    if let Some(stack) = stack.map(str::trim).filter(|s| !s.is_empty()) {
        let _ = writeln!(out, "Stack:\n{}", truncate_content(stack, 2_000));
    }
    out.push('\n');
}

/// Prior attempts, newest last. Only the last `max_history_attempts` are
/// kept and each response is truncated.
fn push_history(out: &mut String, history: &[AgentAttempt], settings: &FixLoopSettings) {
    if history.is_empty() || settings.max_history_attempts == 0 {
        return;
    }
    let skip = history.len().saturating_sub(settings.max_history_attempts);
    out.push_str("PREVIOUS ATTEMPTS (these did not work; do NOT repeat the same approach):\n");
    for attempt in &history[skip..] {
        let kind = if attempt.local { "automatic fix" } else { "model fix" };
        let changed = if attempt.changed_files.is_empty() {
            "nothing".to_string()
        } else {
            attempt.changed_files.join(", ")
        };
        let _ = writeln!(out, "Attempt {} ({kind}) changed {changed}", attempt.number);
        match &attempt.error {
            Some(error) => {
                let _ = writeln!(out, "Resulting error: {error}");
            }
            None => out.push_str("Resulting error: the original error persisted\n"),
        }
        let response = truncate_content(attempt.response.trim(), settings.max_history_response_chars);
        if !response.is_empty() {
            let _ = writeln!(out, "Response excerpt:\n{response}");
        }
        out.push('\n');
    }
}

/// Files worth showing besides the target: importers of an unresolved path
/// first, then what the target itself imports.
fn related_files<'a>(input: &PromptInput<'a>, target: &str) -> Vec<&'a str> {
    let mut related: Vec<&str> = Vec::new();
    if input.error.kind == ErrorKind::UnresolvedImport {
        if let Some(bad_path) = &input.error.bad_path {
            related.extend(importers_of(input.files, bad_path));
        }
    }
    for dependency in local_dependencies(input.files, target) {
        if let Some((path, _)) = input.files.get_key_value(&dependency) {
            related.push(path.as_str());
        }
    }

    let mut seen = Vec::new();
    related
        .into_iter()
        .filter(|path| *path != target)
        .filter(|path| {
            if seen.contains(path) {
                false
            } else {
                seen.push(*path);
                true
            }
        })
        .take(input.settings.max_related_files)
        .collect()
}

pub(crate) fn build_fix_prompt(input: &PromptInput<'_>) -> FixPrompt {
    let target = input.error.file.as_deref().unwrap_or(input.target_file);
    let target = if input.files.contains_key(target) {
        target
    } else {
        input.target_file
    };

    let mut user = String::new();
    push_error(&mut user, input.error, input.stack);

    match input.files.get(target) {
        Some(content) => {
            user.push_str("TARGET FILE:\n");
            push_file(&mut user, target, content, input.settings.target_file_max_chars);
        }
        None => {
            let _ = writeln!(user, "TARGET FILE: {target} (not found in the project)\n");
        }
    }

    let related = related_files(input, target);
    if !related.is_empty() {
        user.push_str("RELATED FILES:\n");
        for path in related {
            if let Some(content) = input.files.get(path) {
                push_file(&mut user, path, content, input.settings.related_file_max_chars);
            }
        }
    }

    if !input.files.is_empty() {
        user.push_str("PROJECT FILES:\n");
        for path in input.files.keys().take(MAX_LISTED_PATHS) {
            let _ = writeln!(user, "- {path}");
        }
        if input.files.len() > MAX_LISTED_PATHS {
            let _ = writeln!(user, "- ... {} more", input.files.len() - MAX_LISTED_PATHS);
        }
        user.push('\n');
    }

    push_history(&mut user, input.history, input.settings);
    user.push_str("Fix the error. Respond with the JSON object only.");

    FixPrompt {
        system: fix_system_prompt(),
        user,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(number: usize, response: &str) -> AgentAttempt {
        AgentAttempt {
            number,
            prompt: String::new(),
            response: response.to_string(),
            changed_files: vec!["src/App.tsx".to_string()],
            error: Some(format!("still broken {number}")),
            local: false,
        }
    }

    #[test]
    fn includes_error_target_importers_and_dependencies() {
        let files = FileSnapshot::from([
            (
                "src/App.tsx".to_string(),
                "import { Nav } from './Nav';\nimport Header from './Header';\n".to_string(),
            ),
            ("src/Nav.tsx".to_string(), "export const Nav = 1;".to_string()),
            (
                "src/pages/Home.tsx".to_string(),
                "import Header from './Header';\n".to_string(),
            ),
        ]);
        let error = ErrorClassification {
            kind: ErrorKind::UnresolvedImport,
            message: "Failed to resolve import \"./Header\"".to_string(),
            file: Some("src/App.tsx".to_string()),
            bad_path: Some("./Header".to_string()),
            ..ErrorClassification::default()
        };
        let settings = FixLoopSettings::default();
        let prompt = build_fix_prompt(&PromptInput {
            error: &error,
            stack: None,
            target_file: "src/App.tsx",
            files: &files,
            history: &[],
            settings: &settings,
        });

        assert!(prompt.system.contains("\"files\""));
        assert!(prompt.user.contains("ERROR (unresolved import)"));
        assert!(prompt.user.contains("--- src/App.tsx ---"));
        assert!(prompt.user.contains("--- src/pages/Home.tsx ---"));
        assert!(prompt.user.contains("--- src/Nav.tsx ---"));
        assert!(!prompt.user.contains("PREVIOUS ATTEMPTS"));
    }

    #[test]
    fn history_is_capped_and_truncated() {
        let settings = FixLoopSettings {
            max_history_attempts: 2,
            max_history_response_chars: 20,
            ..FixLoopSettings::default()
        };
        let history: Vec<AgentAttempt> = (1..=4)
            .map(|n| attempt(n, &"x".repeat(100)))
            .collect();
        let files = FileSnapshot::from([("src/App.tsx".to_string(), "x".to_string())]);
        let error = ErrorClassification::default();
        let prompt = build_fix_prompt(&PromptInput {
            error: &error,
            stack: None,
            target_file: "src/App.tsx",
            files: &files,
            history: &history,
            settings: &settings,
        });

        assert!(!prompt.user.contains("Attempt 2 "));
        assert!(prompt.user.contains("Attempt 3 (model fix)"));
        assert!(prompt.user.contains("still broken 4"));
        assert!(prompt.user.contains("[truncated]"));
        assert!(!prompt.user.contains(&"x".repeat(100)));
    }

    #[test]
    fn related_files_respect_limit() {
        let mut files = FileSnapshot::new();
        let mut imports = String::new();
        for i in 0..5 {
            files.insert(format!("src/m{i}.ts"), format!("export const m{i} = {i};"));
            imports.push_str(&format!("import {{ m{i} }} from './m{i}';\n"));
        }
        files.insert("src/main.ts".to_string(), imports);
        let settings = FixLoopSettings {
            max_related_files: 2,
            ..FixLoopSettings::default()
        };
        let error = ErrorClassification::default();
        let prompt = build_fix_prompt(&PromptInput {
            error: &error,
            stack: None,
            target_file: "src/main.ts",
            files: &files,
            history: &[],
            settings: &settings,
        });
        assert_eq!(prompt.user.matches("--- src/m").count(), 3);
    }
}
