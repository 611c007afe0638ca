use crate::util::{truncate_for_error, unescape_json_string};
use mender_core::SearchReplace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceOutcome {
    pub content: String,
    pub applied_count: usize,
    /// Search strings that matched nowhere, in instruction order.
    pub not_found: Vec<String>,
}

impl ReplaceOutcome {
    pub fn all_applied(&self) -> bool {
        self.not_found.is_empty()
    }
}

/// Undo transport escaping when a string may have arrived double-escaped:
/// literal `\n` sequences and no real newline. Only used after the pair as
/// written failed to match.
fn unescape_transport(text: &str) -> Option<String> {
    (text.contains("\\n") && !text.contains('\n')).then(|| unescape_json_string(text))
}

/// Replace the first occurrence of `search`, trying exact, line-ending
/// normalised and boundary-trimmed matches in that order.
fn replace_first(content: &mut String, search: &str, replace: &str) -> bool {
    if let Some(start) = content.find(search) {
        content.replace_range(start..start + search.len(), replace);
        return true;
    }

    // Normalize line endings when the file is CRLF but the model emitted LF.
    if search.contains('\n') && !search.contains("\r\n") && content.contains("\r\n") {
        let crlf_search = search.replace('\n', "\r\n");
        if let Some(start) = content.find(&crlf_search) {
            let crlf_replace = replace.replace("\r\n", "\n").replace('\n', "\r\n");
            content.replace_range(start..start + crlf_search.len(), &crlf_replace);
            return true;
        }
    }
    // And the reverse.
    if search.contains("\r\n") && !content.contains("\r\n") {
        let lf_search = search.replace("\r\n", "\n");
        if let Some(start) = content.find(&lf_search) {
            let lf_replace = replace.replace("\r\n", "\n");
            content.replace_range(start..start + lf_search.len(), &lf_replace);
            return true;
        }
    }

    let trimmed = search.trim();
    if !trimmed.is_empty() && trimmed.len() != search.len() {
        if let Some(start) = content.find(trimmed) {
            content.replace_range(start..start + trimmed.len(), replace);
            return true;
        }
    }

    false
}

/// Apply `{search, replace}` pairs in order. Each pair consumes only the first
/// match in the content as edited by the pairs before it.
pub fn apply_search_replace(content: &str, pairs: &[SearchReplace]) -> ReplaceOutcome {
    let mut out = content.to_string();
    let mut applied_count = 0;
    let mut not_found = Vec::new();

    for pair in pairs {
        if pair.search.is_empty() {
            not_found.push(pair.search.clone());
            continue;
        }
        let applied = replace_first(&mut out, &pair.search, &pair.replace)
            || unescape_transport(&pair.search).is_some_and(|search| {
                let replace =
                    unescape_transport(&pair.replace).unwrap_or_else(|| pair.replace.clone());
                replace_first(&mut out, &search, &replace)
            });
        if applied {
            applied_count += 1;
        } else {
            tracing::debug!(search = %truncate_for_error(&pair.search), "search string not found");
            not_found.push(pair.search.clone());
        }
    }

    ReplaceOutcome {
        content: out,
        applied_count,
        not_found,
    }
}
