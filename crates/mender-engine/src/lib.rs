//! Decoding, repair and application of model-generated file edits, plus the
//! fix loop that drives them.

pub mod apply;
pub mod decode;
pub mod fixloop;
pub mod repair;
pub mod sanitize;
pub mod scan;

mod util;

pub use apply::{
    apply_instruction, apply_search_replace, apply_unified_diff, merge_changes, merge_edit_set,
    FileMergeError, MergeFailure, MergeResult, MergeStats,
};
pub use decode::{decode_any, decode_response, stream_status, Decoder};
pub use fixloop::{
    classify_error, create_fix_session, is_asking_question, FixDeps, FixSession, RuleBasedFixer,
};
pub use repair::{repair_truncated, Repaired};
pub use scan::{find_matching_close, is_balanced, scan, ScanReport};
