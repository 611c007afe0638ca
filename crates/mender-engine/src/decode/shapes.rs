//! Candidate payload shapes, tried in priority order.

use mender_core::GenerationMeta;
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shape {
    Files,
    FileChanges,
    Changes,
    Root,
}

/// Raw `(path, value)` pairs before validation.
pub(crate) type RawEntries = Vec<(String, Value)>;

type ShapeExtractor = fn(&Map<String, Value>) -> Option<RawEntries>;

const SHAPE_EXTRACTORS: &[(Shape, ShapeExtractor)] = &[
    (Shape::Files, files_collection),
    (Shape::FileChanges, file_changes_collection),
    (Shape::Changes, changes_collection),
    (Shape::Root, root_level),
];

fn files_collection(obj: &Map<String, Value>) -> Option<RawEntries> {
    named_collection(obj, "files")
}

fn file_changes_collection(obj: &Map<String, Value>) -> Option<RawEntries> {
    named_collection(obj, "fileChanges")
}

fn changes_collection(obj: &Map<String, Value>) -> Option<RawEntries> {
    named_collection(obj, "changes")
}

/// Envelope keys that are never file paths.
const RESERVED_KEYS: &[&str] = &[
    "files",
    "fileChanges",
    "changes",
    "explanation",
    "summary",
    "message",
    "deletedFiles",
    "deleted_files",
    "generationMeta",
    "continuation",
    "truncated",
    "plan",
];

/// Keys naming the path inside an array-shaped change item.
const ITEM_PATH_KEYS: &[&str] = &["path", "file", "filePath", "filename", "name"];

pub(crate) fn extract_entries(value: &Value) -> Option<(Shape, RawEntries)> {
    match value {
        Value::Object(obj) => SHAPE_EXTRACTORS
            .iter()
            .find_map(|(shape, extract)| extract(obj).map(|entries| (*shape, entries))),
        Value::Array(items) => Some((Shape::Changes, array_entries(items))),
        _ => None,
    }
}

fn named_collection(obj: &Map<String, Value>, key: &str) -> Option<RawEntries> {
    match obj.get(key)? {
        Value::Object(map) => Some(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        Value::Array(items) => Some(array_entries(items)),
        _ => None,
    }
}

fn array_entries(items: &[Value]) -> RawEntries {
    items
        .iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            let path = ITEM_PATH_KEYS
                .iter()
                .find_map(|key| obj.get(*key).and_then(Value::as_str))?;
            Some((path.to_string(), item.clone()))
        })
        .collect()
}

fn root_level(obj: &Map<String, Value>) -> Option<RawEntries> {
    let entries: RawEntries = obj
        .iter()
        .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    (!entries.is_empty()).then_some(entries)
}

pub(crate) fn explanation(value: &Value) -> Option<String> {
    ["explanation", "summary"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

pub(crate) fn deleted_files(value: &Value) -> Vec<String> {
    ["deletedFiles", "deleted_files"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_array))
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn declared_truncated(value: &Value) -> bool {
    value.get("truncated").and_then(Value::as_bool).unwrap_or(false)
}

/// Batch bookkeeping emitted by older prompts.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LegacyContinuation {
    #[serde(alias = "needsMore", alias = "hasMore")]
    needs_continuation: Option<bool>,
    #[serde(alias = "filesRemaining", alias = "pendingFiles")]
    remaining_files: Vec<String>,
    #[serde(alias = "filesCompleted", alias = "generatedFiles")]
    completed_files: Vec<String>,
    #[serde(alias = "currentBatch")]
    batch: usize,
    total_batches: usize,
    #[serde(alias = "totalFilesPlanned")]
    total_files: usize,
}

impl From<LegacyContinuation> for GenerationMeta {
    fn from(legacy: LegacyContinuation) -> Self {
        let is_complete = !legacy
            .needs_continuation
            .unwrap_or(!legacy.remaining_files.is_empty());
        let total_files_planned = if legacy.total_files > 0 {
            legacy.total_files
        } else {
            legacy.completed_files.len() + legacy.remaining_files.len()
        };
        GenerationMeta {
            total_files_planned,
            files_completed: legacy.completed_files,
            files_remaining: legacy.remaining_files,
            current_batch: legacy.batch,
            total_batches: legacy.total_batches,
            is_complete,
        }
    }
}

/// Canonical `generationMeta`, or the legacy `continuation` block normalised
/// into it.
pub(crate) fn generation_meta(value: &Value) -> Option<GenerationMeta> {
    if let Some(meta) = value.get("generationMeta") {
        return serde_json::from_value::<GenerationMeta>(meta.clone()).ok();
    }
    let legacy = value.get("continuation")?;
    serde_json::from_value::<LegacyContinuation>(legacy.clone())
        .ok()
        .map(GenerationMeta::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn files_shape_wins_over_root_keys() {
        let value = json!({"files": {"a.ts": "x"}, "b.ts": "y"});
        let (shape, entries) = extract_entries(&value).unwrap();
        assert_eq!(shape, Shape::Files);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "a.ts");
    }

    #[test]
    fn changes_array_items_use_path_key() {
        let value = json!({"changes": [
            {"path": "src/a.ts", "content": "export {}"},
            {"file": "src/b.ts", "diff": "@@ -1 +1 @@"},
            {"content": "orphan"}
        ]});
        let (shape, entries) = extract_entries(&value).unwrap();
        assert_eq!(shape, Shape::Changes);
        let paths: Vec<&str> = entries.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["src/a.ts", "src/b.ts"]);
    }

    #[test]
    fn root_level_skips_reserved_keys() {
        let value = json!({"explanation": "done", "src/a.ts": "x"});
        let (shape, entries) = extract_entries(&value).unwrap();
        assert_eq!(shape, Shape::Root);
        assert_eq!(entries.len(), 1);

        assert!(extract_entries(&json!({"explanation": "only prose"})).is_none());
    }

    #[test]
    fn legacy_continuation_is_normalised() {
        let value = json!({"continuation": {
            "needsContinuation": true,
            "remainingFiles": ["c.ts"],
            "completedFiles": ["a.ts", "b.ts"],
            "batch": 1,
            "totalBatches": 2
        }});
        let meta = generation_meta(&value).unwrap();
        assert!(!meta.is_complete);
        assert_eq!(meta.total_files_planned, 3);
        assert_eq!(meta.files_remaining, vec!["c.ts"]);
        assert_eq!(meta.current_batch, 1);
        assert!(meta.has_more());
    }

    #[test]
    fn canonical_generation_meta_is_read_as_is() {
        let value = json!({"generationMeta": {"totalFilesPlanned": 4, "isComplete": true}});
        let meta = generation_meta(&value).unwrap();
        assert_eq!(meta.total_files_planned, 4);
        assert!(meta.is_complete);
    }
}
