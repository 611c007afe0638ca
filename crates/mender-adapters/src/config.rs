//! Configuration management for mender
//!
//! Stores settings in ~/.config/mender/config.toml

use anyhow::{Context, Result};
use chrono::Utc;
use mender_core::{DecoderSettings, FixLoopSettings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `tracing` filter directive used when `MENDER_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MenderConfig {
    pub decoder: DecoderSettings,
    pub fix_loop: FixLoopSettings,
    pub logging: LoggingSettings,
}

impl MenderConfig {
    fn sanitize(&mut self) {
        self.decoder.min_content_chars = self.decoder.min_content_chars.max(1);
        self.fix_loop.max_attempts = self.fix_loop.max_attempts.max(1);
        if self.logging.level.trim().is_empty() {
            self.logging.level = LoggingSettings::default().level;
        }
    }

    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("mender"))
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.toml"))
    }

    /// Load config from the default location, or return defaults
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load config from `path`. A missing file gives defaults; an unreadable
    /// one is moved aside and defaults are used.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str::<MenderConfig>(&content) {
            Ok(mut config) => {
                config.sanitize();
                config
            }
            Err(err) => {
                let backup = preserve_corrupt_config(path, &content);
                tracing::warn!(
                    path = %path.display(),
                    backup = %backup.display(),
                    "config file was corrupted ({err}); a backup was saved and defaults were loaded"
                );
                Self::default()
            }
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path().context("Could not determine config directory")?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let mut sanitized = self.clone();
        sanitized.sanitize();

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        }
        let content = toml::to_string_pretty(&sanitized).context("Failed to serialize config")?;
        write_config_atomic(path, &content)
            .with_context(|| format!("Failed to write config {}", path.display()))
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/mender/config.toml".to_string())
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config.toml".to_string());
    let corrupt_path = path.with_file_name(format!(
        "{file_name}.corrupt-{}",
        Utc::now().format("%Y%m%d%H%M%S")
    ));
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
    corrupt_path
}

fn write_config_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp_path = path.with_extension("toml.tmp");
    let mut file = fs::File::create(&tmp_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
            tracing::debug!("failed to set temp config file permissions: {e}");
        }
    }

    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mender_core::DecodeMode;
    use tempfile::tempdir;

    #[test]
    fn test_config_default() {
        let config = MenderConfig::default();
        assert_eq!(config.fix_loop.max_attempts, 3);
        assert_eq!(config.decoder.max_repair_bytes, 2 * 1024 * 1024);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_config_partial_file_fills_defaults() {
        let parsed: MenderConfig = toml::from_str(
            "[decoder]\nmode = \"lenient\"\n\n[fix_loop]\nmax_attempts = 5\n",
        )
        .unwrap();
        assert_eq!(parsed.decoder.mode, DecodeMode::Lenient);
        assert_eq!(parsed.decoder.min_content_chars, 2);
        assert_eq!(parsed.fix_loop.max_attempts, 5);
        assert_eq!(parsed.fix_loop.settle_delay_ms, 1_500);
    }

    #[test]
    fn test_config_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = MenderConfig::default();
        config.fix_loop.max_history_attempts = 2;
        config.logging.level = "mender_engine=debug".to_string();

        config.save_to(&path).unwrap();
        assert_eq!(MenderConfig::load_from(&path), config);
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        assert_eq!(
            MenderConfig::load_from(&dir.path().join("absent.toml")),
            MenderConfig::default()
        );
    }

    #[test]
    fn test_corrupt_config_is_preserved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "this is = = not toml").unwrap();

        assert_eq!(MenderConfig::load_from(&path), MenderConfig::default());
        assert!(!path.exists());
        let backups: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("config.toml.corrupt-"))
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn test_sanitize_clamps_zero_attempts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[fix_loop]\nmax_attempts = 0\n").unwrap();
        assert_eq!(MenderConfig::load_from(&path).fix_loop.max_attempts, 1);
    }
}
