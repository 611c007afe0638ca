//! Edit sets, patch instructions and file snapshots.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The collaborator's view of a project: path -> content.
///
/// Operations in this workspace never mutate a snapshot they were handed; they
/// return a new one instead.
pub type FileSnapshot = BTreeMap<String, String>;

/// Batch-continuation bookkeeping emitted by models that generate large projects
/// over several responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationMeta {
    pub total_files_planned: usize,
    pub files_completed: Vec<String>,
    pub files_remaining: Vec<String>,
    pub current_batch: usize,
    pub total_batches: usize,
    pub is_complete: bool,
}

impl GenerationMeta {
    pub fn has_more(&self) -> bool {
        !self.is_complete && (!self.files_remaining.is_empty() || self.current_batch < self.total_batches)
    }
}

/// The optional header line a model emits ahead of its payload, e.g.
/// `// PLAN: {"create":["a.txt"],"update":[],"delete":[],"total":1}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilePlan {
    pub create: Vec<String>,
    pub update: Vec<String>,
    pub delete: Vec<String>,
    pub total: usize,
}

/// Which step of the decoder produced the final result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryPath {
    #[default]
    Direct,
    /// Parsed after string-aware clean-up (trailing commas, smart quotes).
    Cleaned,
    /// Parsed after appending the closers the payload was missing.
    ClosersAppended,
    /// Parsed after the full truncation repair.
    Repaired,
    /// Parsed after repairing only the `files` object.
    FilesSliceRepaired,
    /// Recovered by one of the pattern-based salvage stages.
    Salvaged(SalvageStage),
}

impl RecoveryPath {
    pub fn is_repair(self) -> bool {
        !matches!(self, RecoveryPath::Direct | RecoveryPath::Cleaned)
    }
}

/// Salvage stages, ordered from strictest to loosest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SalvageStage {
    BacktickBodies,
    QuotedBodies,
    StringScan,
    FencedBlocks,
}

impl SalvageStage {
    pub fn label(self) -> &'static str {
        match self {
            SalvageStage::BacktickBodies => "backtick_bodies",
            SalvageStage::QuotedBodies => "quoted_bodies",
            SalvageStage::StringScan => "string_scan",
            SalvageStage::FencedBlocks => "fenced_blocks",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Key has neither a path separator nor an extension.
    NotAPath,
    /// Path contains an empty or wildcard segment.
    GlobSegment,
    /// Path falls under the ignored-directory policy.
    Ignored,
    TooShort,
    /// Content is just an extension token such as `tsx`.
    BareExtension,
    /// Value was neither a string nor an object with a content field.
    UnsupportedValue,
    /// Salvaged content failed the source-code heuristic.
    NotCode,
}

impl SkipReason {
    pub fn label(self) -> &'static str {
        match self {
            SkipReason::NotAPath => "not a file path",
            SkipReason::GlobSegment => "glob-like or empty path segment",
            SkipReason::Ignored => "ignored directory",
            SkipReason::TooShort => "content too short",
            SkipReason::BareExtension => "content is a bare extension",
            SkipReason::UnsupportedValue => "unsupported value shape",
            SkipReason::NotCode => "content does not look like code",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub path: String,
    pub reason: SkipReason,
}

/// Canonical decoder output.
///
/// Serialises back into the envelope shape (`files`, `explanation`,
/// `deletedFiles`, `generationMeta`); the diagnostic fields are not serialised.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditSet {
    pub files: IndexMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deleted_files: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_meta: Option<GenerationMeta>,
    #[serde(skip)]
    pub plan: Option<FilePlan>,
    #[serde(skip)]
    pub recovery: RecoveryPath,
    #[serde(skip)]
    pub skipped: Vec<SkippedEntry>,
}

impl EditSet {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.deleted_files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Convert decoded contents into merge instructions, one per file.
    pub fn to_instructions(&self) -> IndexMap<String, PatchInstruction> {
        self.files
            .iter()
            .map(|(path, content)| (path.clone(), PatchInstruction::text(content.clone())))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchReplace {
    pub search: String,
    pub replace: String,
}

impl SearchReplace {
    pub fn new(search: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            search: search.into(),
            replace: replace.into(),
        }
    }
}

/// How one file should change.
///
/// `diff` carries either a unified diff or the full replacement text; the
/// merge step tells them apart. `replacements` are applied in order, each to
/// the first match in the already-edited content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PatchInstruction {
    pub diff: Option<String>,
    pub is_new: bool,
    pub is_deleted: bool,
    pub replacements: Vec<SearchReplace>,
}

impl PatchInstruction {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            diff: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn new_file(content: impl Into<String>) -> Self {
        Self {
            diff: Some(content.into()),
            is_new: true,
            ..Self::default()
        }
    }

    pub fn delete() -> Self {
        Self {
            is_deleted: true,
            ..Self::default()
        }
    }

    pub fn replacements(pairs: Vec<SearchReplace>) -> Self {
        Self {
            replacements: pairs,
            ..Self::default()
        }
    }
}
