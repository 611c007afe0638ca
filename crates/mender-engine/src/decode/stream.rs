use crate::decode::envelope::prepare;
use crate::decode::members::file_members;
use mender_core::ignore::normalize_path;
use mender_core::{DecoderSettings, StreamStatus};

/// Per-file progress of a JSON envelope that is still arriving.
///
/// Paths from `known_paths` (typically the plan header) that have not shown up
/// yet are `pending`; a body cut off by the end of the text is `streaming`.
pub fn stream_status(partial_text: &str, known_paths: &[String]) -> StreamStatus {
    let prepared = prepare(partial_text);
    let mut expected: Vec<String> = known_paths.iter().map(|p| normalize_path(p)).collect();
    if let Some(plan) = &prepared.plan {
        for path in plan.create.iter().chain(plan.update.iter()) {
            let path = normalize_path(path);
            if !expected.contains(&path) {
                expected.push(path);
            }
        }
    }

    let mut status = StreamStatus::default();
    let limit = DecoderSettings::default().max_string_scan_chars;
    for member in file_members(prepared.body, limit) {
        let path = normalize_path(&member.path);
        status.streaming.retain(|p| p != &path);
        status.complete.retain(|p| p != &path);
        if member.closed {
            status.complete.push(path);
        } else {
            status.streaming.push(path);
        }
    }

    status.pending = expected
        .into_iter()
        .filter(|path| !status.streaming.contains(path) && !status.complete.contains(path))
        .collect();
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_pending_streaming_and_complete() {
        let known = vec!["src/a.ts".to_string(), "src/b.ts".to_string(), "src/c.ts".to_string()];
        let partial = r#"{"files": {"src/a.ts": "export const a = 1;", "src/b.ts": "export const"#;
        let status = stream_status(partial, &known);
        assert_eq!(status.complete, vec!["src/a.ts"]);
        assert_eq!(status.streaming, vec!["src/b.ts"]);
        assert_eq!(status.pending, vec!["src/c.ts"]);
    }

    #[test]
    fn plan_header_supplies_expected_paths() {
        let partial = "// PLAN: {\"create\":[\"a.txt\",\"b.txt\"],\"update\":[],\"delete\":[],\"total\":2}\n{\"files\":{\"a.txt\":\"hel";
        let status = stream_status(partial, &[]);
        assert_eq!(status.streaming, vec!["a.txt"]);
        assert_eq!(status.pending, vec!["b.txt"]);
        assert!(status.complete.is_empty());
    }

    #[test]
    fn nothing_received_yet() {
        let status = stream_status("", &["src/a.ts".to_string()]);
        assert_eq!(status.pending, vec!["src/a.ts"]);
    }
}
