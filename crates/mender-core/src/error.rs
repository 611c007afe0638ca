use thiserror::Error;

/// Unrecoverable decode failures. Partial recovery is never reported here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("No JSON-shaped payload found in the model response")]
    NoPayload,

    #[error("The model returned no file-like entries")]
    NoFileEntries,

    #[error("Payload too large to repair safely ({len} bytes, limit {limit})")]
    TooLargeToRepair { len: usize, limit: usize },

    #[error("Marker decoder failed: {0}")]
    Marker(String),
}

impl DecodeError {
    /// Short, user-facing category for status displays.
    pub fn category(&self) -> &'static str {
        match self {
            DecodeError::NoPayload => "no_payload",
            DecodeError::NoFileEntries => "no_file_entries",
            DecodeError::TooLargeToRepair { .. } => "too_large",
            DecodeError::Marker(_) => "marker",
        }
    }
}
