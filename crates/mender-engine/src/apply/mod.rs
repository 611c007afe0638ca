//! Applying decoded edits to a file snapshot.

pub mod diff;
mod merge;
pub mod replace;

pub use diff::{apply_unified_diff, looks_like_diff};
pub use merge::{merge_changes, merge_edit_set, FileMergeError, MergeFailure, MergeResult, MergeStats};
pub use replace::{apply_search_replace, ReplaceOutcome};

use mender_core::PatchInstruction;

/// Apply one instruction to one file's content. `None` when nothing could be
/// applied; the caller decides the fallback.
pub fn apply_instruction(original: &str, instruction: &PatchInstruction) -> Option<String> {
    if instruction.is_deleted {
        return None;
    }
    if !instruction.replacements.is_empty() {
        let outcome = apply_search_replace(original, &instruction.replacements);
        return (outcome.applied_count > 0).then_some(outcome.content);
    }
    let text = instruction.diff.as_deref()?;
    if !instruction.is_new && looks_like_diff(text) {
        apply_unified_diff(original, text)
    } else {
        Some(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mender_core::SearchReplace;

    #[test]
    fn dispatches_on_instruction_kind() {
        let replaced = apply_instruction(
            "foo foo",
            &PatchInstruction::replacements(vec![SearchReplace::new("foo", "bar")]),
        );
        assert_eq!(replaced.as_deref(), Some("bar foo"));

        let patched = apply_instruction("a\nb\n", &PatchInstruction::text("@@ -1,2 +1,2 @@\n a\n-b\n+c\n"));
        assert_eq!(patched.as_deref(), Some("a\nc\n"));

        let replaced_whole = apply_instruction("old", &PatchInstruction::new_file("fresh"));
        assert_eq!(replaced_whole.as_deref(), Some("fresh"));

        assert_eq!(apply_instruction("x", &PatchInstruction::delete()), None);
        assert_eq!(
            apply_instruction("x", &PatchInstruction::replacements(vec![SearchReplace::new("q", "r")])),
            None
        );
    }
}
