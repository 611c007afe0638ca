//! Turning raw model text into an [`EditSet`].
//!
//! The pipeline tries the cheap paths first: direct parse, light clean-up,
//! appending missing closers, full truncation repair, repair of the files
//! object alone, and finally the salvage ladder.

mod envelope;
mod members;
mod salvage;
mod shapes;
mod stream;
mod validate;


pub use stream::stream_status;

use crate::repair::repair_truncated;
use crate::scan::{find_matching_close, scan};
use envelope::{clean_json, payload_candidates, payload_tail, prepare};
use mender_core::{DecodeError, DecodeMode, DecoderSettings, EditSet, MarkerDecoder, RecoveryPath};
use salvage::{run_ladder, SalvageInput};
use serde_json::Value;
use validate::{validate_deletions, validate_entries, Validated};

/// Keys whose value is the file collection, for the files-only repair.
const FILES_KEYS: &[&str] = &["\"files\"", "\"fileChanges\"", "\"changes\""];

/// Envelope decoder. Stateless apart from its settings; share it freely.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    settings: DecoderSettings,
}

struct Parsed {
    value: Value,
    recovery: RecoveryPath,
}

impl Decoder {
    pub fn new(settings: DecoderSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &DecoderSettings {
        &self.settings
    }

    /// Decode according to the configured mode: strict returns every failure,
    /// lenient logs it and returns `Ok(None)`.
    pub fn decode(&self, raw: &str) -> Result<Option<EditSet>, DecodeError> {
        self.finish(self.decode_strict(raw))
    }

    fn finish(&self, result: Result<EditSet, DecodeError>) -> Result<Option<EditSet>, DecodeError> {
        match (result, self.settings.mode) {
            (Ok(set), _) => Ok(Some(set)),
            (Err(err), DecodeMode::Strict) => Err(err),
            (Err(err), DecodeMode::Lenient) => {
                tracing::warn!(category = err.category(), "decode failed: {err}");
                Ok(None)
            }
        }
    }

    pub fn decode_strict(&self, raw: &str) -> Result<EditSet, DecodeError> {
        let raw = raw.trim_start_matches('\u{feff}');
        let prepared = prepare(raw);
        let candidates = payload_candidates(prepared.body);

        let mut parsed_without_entries = false;
        for candidate in &candidates {
            for parsed in self.parse_candidates(candidate)? {
                let mut set = self.edit_set_from(&parsed.value);
                if set.is_empty() {
                    parsed_without_entries = true;
                    continue;
                }
                set.recovery = parsed.recovery;
                set.truncated |= parsed.recovery.is_repair();
                set.plan = prepared.plan;
                tracing::debug!(
                    recovery = ?set.recovery,
                    files = set.files.len(),
                    deleted = set.deleted_files.len(),
                    skipped = set.skipped.len(),
                    "decoded envelope"
                );
                return Ok(set);
            }
        }

        let input = SalvageInput {
            candidate: payload_tail(prepared.body),
            raw,
        };
        if let Some((stage, validated)) = run_ladder(&input, &self.settings) {
            let Validated { files, deleted, skipped } = validated;
            return Ok(EditSet {
                files,
                deleted_files: deleted,
                truncated: true,
                recovery: RecoveryPath::Salvaged(stage),
                plan: prepared.plan,
                skipped,
                ..EditSet::default()
            });
        }

        if !candidates.is_empty() || parsed_without_entries {
            Err(DecodeError::NoFileEntries)
        } else {
            Err(DecodeError::NoPayload)
        }
    }

    /// Every structured parse the candidate admits, in pipeline order. Lazily
    /// evaluated so that a successful early step skips the rest.
    fn parse_candidates(&self, candidate: &str) -> Result<Steps, DecodeError> {
        if let Some(value) = parse_object(candidate) {
            return Ok(Steps::Done(Some(Parsed {
                value,
                recovery: RecoveryPath::Direct,
            })));
        }

        let cleaned = clean_json(candidate);
        if cleaned != candidate {
            if let Some(value) = parse_object(&cleaned) {
                return Ok(Steps::Done(Some(Parsed {
                    value,
                    recovery: RecoveryPath::Cleaned,
                })));
            }
        }

        if cleaned.len() > self.settings.max_repair_bytes {
            return Err(DecodeError::TooLargeToRepair {
                len: cleaned.len(),
                limit: self.settings.max_repair_bytes,
            });
        }

        Ok(Steps::Repair {
            cleaned,
            next: 0,
            max_bytes: self.settings.max_repair_bytes,
        })
    }

    fn edit_set_from(&self, value: &Value) -> EditSet {
        let mut validated = match shapes::extract_entries(value) {
            Some((shape, entries)) => {
                tracing::trace!(?shape, entries = entries.len(), "payload shape");
                validate_entries(entries, &self.settings)
            }
            None => Validated::default(),
        };
        validate_deletions(shapes::deleted_files(value), &mut validated);

        let Validated { files, deleted, skipped } = validated;
        EditSet {
            files,
            explanation: shapes::explanation(value),
            deleted_files: deleted,
            truncated: shapes::declared_truncated(value),
            generation_meta: shapes::generation_meta(value),
            skipped,
            ..EditSet::default()
        }
    }
}

/// The repair steps after direct and cleaned parses failed.
enum Steps {
    Done(Option<Parsed>),
    Repair {
        cleaned: String,
        next: usize,
        max_bytes: usize,
    },
}

impl Iterator for Steps {
    type Item = Parsed;

    fn next(&mut self) -> Option<Parsed> {
        match self {
            Steps::Done(parsed) => parsed.take(),
            Steps::Repair {
                cleaned,
                next,
                max_bytes,
            } => loop {
                let step = *next;
                *next += 1;
                let attempt = match step {
                    0 => append_closers(cleaned.as_str())
                        .map(|v| (v, RecoveryPath::ClosersAppended)),
                    1 => full_repair(cleaned.as_str(), *max_bytes)
                        .map(|v| (v, RecoveryPath::Repaired)),
                    2 => files_slice_repair(cleaned.as_str(), *max_bytes)
                        .map(|v| (v, RecoveryPath::FilesSliceRepaired)),
                    _ => return None,
                };
                if let Some((value, recovery)) = attempt {
                    return Some(Parsed { value, recovery });
                }
            },
        }
    }
}

fn parse_object(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value),
        _ => None,
    }
}

/// The cheap common case: the text stops between members and only the
/// closers are missing.
fn append_closers(text: &str) -> Option<Value> {
    let report = scan(text);
    if report.in_string() || report.mismatched > 0 || report.stack.is_empty() {
        return None;
    }
    parse_object(&format!("{text}{}", report.missing_closers()))
}

fn full_repair(text: &str, max_bytes: usize) -> Option<Value> {
    let repaired = repair_truncated(text, max_bytes).ok()?;
    if !repaired.changed {
        return None;
    }
    parse_object(&repaired.text)
}

/// Repair just the files collection, for payloads whose other members are
/// beyond saving.
fn files_slice_repair(text: &str, max_bytes: usize) -> Option<Value> {
    FILES_KEYS.iter().find_map(|key| {
        let key_at = text.find(key)?;
        let after_key = &text[key_at + key.len()..];
        let colon = after_key.find(':')?;
        let value_text = after_key[colon + 1..].trim_start();
        let value_offset = text.len() - value_text.len();
        if !value_text.starts_with('{') && !value_text.starts_with('[') {
            return None;
        }
        let slice = match find_matching_close(text, value_offset) {
            Some(close) => text[value_offset..=close].to_string(),
            None => repair_truncated(&text[value_offset..], max_bytes).ok()?.text,
        };
        let collection = parse_object(&slice)?;
        let name = key.trim_matches('"').to_string();
        let mut envelope = serde_json::Map::new();
        envelope.insert(name, collection);
        Some(Value::Object(envelope))
    })
}

/// Strict decode with default settings.
pub fn decode_response(raw: &str) -> Result<EditSet, DecodeError> {
    Decoder::default().decode_strict(raw)
}

/// Try the marker-format peer first when it recognises the text and yields
/// something, then the JSON decoder.
pub fn decode_any(
    text: &str,
    marker: Option<&dyn MarkerDecoder>,
    decoder: &Decoder,
) -> Result<Option<EditSet>, DecodeError> {
    let mut marker_error = None;
    if let Some(marker) = marker.filter(|m| m.detect(text)) {
        match marker.decode(text) {
            Ok(set) if !set.is_empty() => return Ok(Some(set)),
            Ok(_) => tracing::debug!("marker decoder produced no files; trying JSON"),
            Err(err) => {
                tracing::debug!("marker decoder failed: {err}; trying JSON");
                marker_error = Some(err);
            }
        }
    }

    let result = match (decoder.decode_strict(text), marker_error) {
        (Err(DecodeError::NoPayload), Some(err)) => Err(err),
        (result, _) => result,
    };
    decoder.finish(result)
}
