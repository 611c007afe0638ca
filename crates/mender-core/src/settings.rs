//! Tunable limits shared by the engine and the config file.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMode {
    /// Failures are returned as `DecodeError`.
    #[default]
    Strict,
    /// Failures are logged and reported as "nothing decoded".
    Lenient,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderSettings {
    pub mode: DecodeMode,
    /// Payloads above this size are never run through truncation repair.
    pub max_repair_bytes: usize,
    /// Upper bound on how far the string-scan salvage reads for one value.
    pub max_string_scan_chars: usize,
    pub min_content_chars: usize,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            mode: DecodeMode::Strict,
            max_repair_bytes: 2 * 1024 * 1024,
            max_string_scan_chars: 400_000,
            min_content_chars: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixLoopSettings {
    pub max_attempts: usize,
    pub settle_delay_ms: u64,
    pub max_history_attempts: usize,
    pub max_history_response_chars: usize,
    pub max_related_files: usize,
    pub related_file_max_chars: usize,
    pub target_file_max_chars: usize,
    pub enable_local_fix: bool,
}

impl Default for FixLoopSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            settle_delay_ms: 1_500,
            max_history_attempts: 4,
            max_history_response_chars: 1_500,
            max_related_files: 3,
            related_file_max_chars: 4_000,
            target_file_max_chars: 24_000,
            enable_local_fix: true,
        }
    }
}

impl FixLoopSettings {
    pub fn settle_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.settle_delay_ms)
    }
}
