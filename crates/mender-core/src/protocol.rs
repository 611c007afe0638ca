//! Contracts between the engine and its collaborators.

use crate::edit::{EditSet, FileSnapshot};
use crate::error::DecodeError;
use crate::fix::{ErrorClassification, LocalFix};
use anyhow::Result;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;

/// Progress of each expected file in a partially received response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamStatus {
    pub pending: Vec<String>,
    pub streaming: Vec<String>,
    pub complete: Vec<String>,
}

/// Peer decoder for the tag-delimited block format.
pub trait MarkerDecoder: Send + Sync {
    fn detect(&self, text: &str) -> bool;

    fn decode(&self, text: &str) -> std::result::Result<EditSet, DecodeError>;

    fn stream_status(&self, text: &str, known_paths: &[String]) -> StreamStatus;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixPrompt {
    pub system: String,
    pub user: String,
}

/// The model call. Network, retries and provider choice live behind this.
pub trait ModelClient: Send + Sync {
    fn complete<'a>(
        &'a self,
        prompt: &'a FixPrompt,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}

/// Fixes that do not need the model.
pub trait LocalFixer: Send + Sync {
    fn can_fix(&self, error: &ErrorClassification) -> bool;

    fn try_fix(
        &self,
        error: &ErrorClassification,
        target_file: &str,
        files: &FileSnapshot,
    ) -> Option<LocalFix>;
}

/// The collaborator's writable file store. It stays the single writer of record.
pub trait FileStore: Send + Sync {
    fn update_file(&self, path: &str, content: &str) -> Result<()>;

    fn delete_file(&self, path: &str) -> Result<()>;
}
