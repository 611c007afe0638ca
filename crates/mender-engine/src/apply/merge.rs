use crate::apply::diff::{apply_unified_diff, looks_like_diff};
use crate::apply::replace::apply_search_replace;
use crate::sanitize::{normalize_generated_content, sanitize_content};
use indexmap::IndexMap;
use mender_core::ignore::normalize_path;
use mender_core::{EditSet, FileSnapshot, PatchInstruction};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeFailure {
    /// The diff matched nowhere, even with fuzzy matching.
    DiffRejected,
    /// None (or only some) of the search strings were found.
    SearchNotFound { missing: Vec<String> },
    /// Replacements target a file the snapshot does not have.
    MissingFile,
    /// The instruction carried no usable content.
    EmptyContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMergeError {
    pub path: String,
    pub reason: MergeFailure,
}

impl fmt::Display for FileMergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            MergeFailure::DiffRejected => write!(f, "{}: diff could not be applied", self.path),
            MergeFailure::SearchNotFound { missing } => write!(
                f,
                "{}: {} search string(s) not found",
                self.path,
                missing.len()
            ),
            MergeFailure::MissingFile => write!(f, "{}: file does not exist", self.path),
            MergeFailure::EmptyContent => write!(f, "{}: no content to write", self.path),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failed: usize,
    pub unchanged: usize,
}

/// Best-effort merged snapshot plus what happened to each file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeResult {
    pub files: FileSnapshot,
    pub stats: MergeStats,
    pub errors: Vec<FileMergeError>,
    /// Paths created, updated or deleted, in processing order.
    pub changed: Vec<String>,
}

impl MergeResult {
    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

enum Outcome {
    Created(String),
    Updated(String),
    Unchanged,
    /// The file changed, but not every part of the instruction applied.
    Partial(String, MergeFailure),
    Failed(MergeFailure),
}

/// Full content for a file that does not exist yet.
fn new_file_content(instruction: &PatchInstruction) -> Outcome {
    let Some(text) = instruction.diff.as_deref() else {
        return Outcome::Failed(MergeFailure::EmptyContent);
    };
    let content = if !instruction.is_new && looks_like_diff(text) {
        apply_unified_diff("", text).unwrap_or_else(|| sanitize_content(text))
    } else {
        sanitize_content(text)
    };
    if content.trim().is_empty() {
        return Outcome::Failed(MergeFailure::EmptyContent);
    }
    Outcome::Created(content)
}

fn changed_or_unchanged(original: &str, content: String) -> Outcome {
    if content == original {
        Outcome::Unchanged
    } else {
        Outcome::Updated(content)
    }
}

fn merge_file(original: Option<&str>, instruction: &PatchInstruction) -> Outcome {
    if !instruction.replacements.is_empty() {
        let Some(original) = original else {
            return Outcome::Failed(MergeFailure::MissingFile);
        };
        let outcome = apply_search_replace(original, &instruction.replacements);
        if outcome.applied_count == 0 {
            return Outcome::Failed(MergeFailure::SearchNotFound {
                missing: outcome.not_found,
            });
        }
        if !outcome.not_found.is_empty() {
            return Outcome::Partial(
                outcome.content,
                MergeFailure::SearchNotFound {
                    missing: outcome.not_found,
                },
            );
        }
        return changed_or_unchanged(original, outcome.content);
    }

    let original = match original {
        Some(original) if !instruction.is_new => original,
        _ => return new_file_content(instruction),
    };
    let Some(text) = instruction.diff.as_deref() else {
        return Outcome::Failed(MergeFailure::EmptyContent);
    };

    if looks_like_diff(text) {
        return match apply_unified_diff(original, text) {
            Some(content) => changed_or_unchanged(original, content),
            None => Outcome::Failed(MergeFailure::DiffRejected),
        };
    }

    let content = sanitize_content(text);
    if content.trim().is_empty() {
        return Outcome::Failed(MergeFailure::EmptyContent);
    }
    changed_or_unchanged(original, normalize_generated_content(original, content))
}

/// Merge per-file instructions into `snapshot`, returning a new snapshot.
///
/// Deletions run first. A file that fails keeps its previous content; its
/// error is recorded and the rest of the batch still applies.
pub fn merge_changes(
    snapshot: &FileSnapshot,
    instructions: &IndexMap<String, PatchInstruction>,
    deleted: &[String],
) -> MergeResult {
    let mut result = MergeResult {
        files: snapshot.clone(),
        ..MergeResult::default()
    };

    let deletions = deleted.iter().map(|p| normalize_path(p)).chain(
        instructions
            .iter()
            .filter(|(_, instruction)| instruction.is_deleted)
            .map(|(path, _)| normalize_path(path)),
    );
    for path in deletions {
        if result.files.remove(&path).is_some() {
            result.stats.deleted += 1;
            result.changed.push(path);
        } else {
            tracing::debug!(path = %path, "delete of absent file ignored");
        }
    }

    for (raw_path, instruction) in instructions {
        if instruction.is_deleted {
            continue;
        }
        let path = normalize_path(raw_path);
        let original = result.files.get(&path).map(String::as_str);
        match merge_file(original, instruction) {
            Outcome::Created(content) => {
                result.stats.created += 1;
                result.files.insert(path.clone(), content);
                result.changed.push(path);
            }
            Outcome::Updated(content) => {
                result.stats.updated += 1;
                result.files.insert(path.clone(), content);
                result.changed.push(path);
            }
            Outcome::Partial(content, reason) => {
                tracing::warn!(path = %path, "instruction applied partially");
                result.stats.updated += 1;
                result.files.insert(path.clone(), content);
                result.changed.push(path.clone());
                result.errors.push(FileMergeError { path, reason });
            }
            Outcome::Unchanged => result.stats.unchanged += 1,
            Outcome::Failed(reason) => {
                let error = FileMergeError { path, reason };
                tracing::warn!("merge failed: {error}");
                result.stats.failed += 1;
                result.errors.push(error);
            }
        }
    }

    result
}

/// Merge a decoded edit set: every entry is full content or a diff.
pub fn merge_edit_set(snapshot: &FileSnapshot, set: &EditSet) -> MergeResult {
    merge_changes(snapshot, &set.to_instructions(), &set.deleted_files)
}
