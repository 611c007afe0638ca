//! Records shared between the fix loop and whoever observes it.

use crate::edit::FileSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FixState {
    #[default]
    Idle,
    Analyzing,
    LocalFix,
    AiFix,
    Fixing,
    Applying,
    Verifying,
    Success,
    Failed,
    MaxAttemptsReached,
}

impl FixState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FixState::Success | FixState::Failed | FixState::MaxAttemptsReached
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FixState::Idle => "idle",
            FixState::Analyzing => "analyzing",
            FixState::LocalFix => "local-fix",
            FixState::AiFix => "ai-fix",
            FixState::Fixing => "fixing",
            FixState::Applying => "applying",
            FixState::Verifying => "verifying",
            FixState::Success => "success",
            FixState::Failed => "failed",
            FixState::MaxAttemptsReached => "max_attempts_reached",
        }
    }
}

impl std::fmt::Display for FixState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// An import/require that points at a module that does not exist.
    UnresolvedImport,
    /// An identifier used without being declared or imported.
    UndefinedReference,
    Syntax,
    Type,
    Runtime,
    #[default]
    Unknown,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::UnresolvedImport => "unresolved import",
            ErrorKind::UndefinedReference => "undefined reference",
            ErrorKind::Syntax => "syntax error",
            ErrorKind::Type => "type error",
            ErrorKind::Runtime => "runtime error",
            ErrorKind::Unknown => "unknown error",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    /// Module specifier that failed to resolve.
    pub bad_path: Option<String>,
    /// Identifier reported as undefined.
    pub symbol: Option<String>,
}

/// One pass of the fix loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAttempt {
    pub number: usize,
    pub prompt: String,
    pub response: String,
    pub changed_files: Vec<String>,
    /// Error observed after applying; filled in later by the next attempt or
    /// by an external verification report.
    pub error: Option<String>,
    pub local: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixCompletion {
    pub state: FixState,
    pub success: bool,
    pub message: String,
    pub attempts: usize,
}

/// Messages delivered to fix-loop observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixEvent {
    StateChanged(FixState),
    Log(LogEntry),
    FileUpdated { path: String, content: String },
    Completed(FixCompletion),
}

/// Everything a run needs to know about the failure it is fixing.
#[derive(Debug, Clone, Default)]
pub struct FixRequest {
    pub error_message: String,
    pub error_stack: Option<String>,
    pub target_file: String,
    pub files: FileSnapshot,
}

/// Result of a non-model fixer: only files it changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFix {
    pub description: String,
    pub files: FileSnapshot,
}
