//! On-disk project directories: snapshot loading and a `FileStore` that
//! writes back into them.

use anyhow::{bail, Context, Result};
use mender_core::ignore::{is_ignored_path, normalize_path};
use mender_core::{FileSnapshot, FileStore};
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Files above this size are left out of snapshots.
pub const MAX_SNAPSHOT_FILE_BYTES: u64 = 1024 * 1024;

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let key = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?
        .join("/");
    (!key.is_empty()).then_some(key)
}

/// Read every text file under `root` into a snapshot keyed by `/`-separated
/// relative path. Ignored directories are not descended into; binary,
/// oversized and non-UTF-8 files are skipped.
pub fn load_snapshot(root: &Path) -> Result<FileSnapshot> {
    let root = root
        .canonicalize()
        .with_context(|| format!("Failed to resolve project root {}", root.display()))?;
    let mut snapshot = FileSnapshot::new();

    for entry in WalkDir::new(&root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || e.file_name()
                    .to_str()
                    .is_some_and(|name| !is_ignored_path(name))
        })
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(key) = relative_key(&root, entry.path()) else {
            continue;
        };
        let too_large = entry
            .metadata()
            .map(|m| m.len() > MAX_SNAPSHOT_FILE_BYTES)
            .unwrap_or(true);
        if too_large {
            tracing::debug!(path = %key, "skipping oversized file");
            continue;
        }
        let Ok(bytes) = fs::read(entry.path()) else {
            continue;
        };
        if bytes.contains(&0) {
            continue;
        }
        match String::from_utf8(bytes) {
            Ok(content) => {
                snapshot.insert(key, content);
            }
            Err(_) => tracing::debug!(path = %key, "skipping non-UTF-8 file"),
        }
    }

    Ok(snapshot)
}

/// Writes edits under a project root. Paths that are absolute, climb out of
/// the root, go through a symlink or hit an ignored directory are refused.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let root = root
            .canonicalize()
            .with_context(|| format!("Failed to resolve project root {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, raw: &str) -> Result<PathBuf> {
        let normalized = normalize_path(raw);
        if normalized.is_empty() {
            bail!("Path is empty");
        }
        // normalize_path strips leading slashes, so check the raw input.
        let candidate = Path::new(raw.trim());
        if candidate.is_absolute() || raw.trim().starts_with('/') {
            bail!("Absolute paths are not allowed: {raw}");
        }
        let relative = Path::new(&normalized);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            bail!("Path escapes the project root: {raw}");
        }
        if is_ignored_path(&normalized) {
            bail!("Refusing to write an ignored path: {raw}");
        }

        let joined = self.root.join(relative);
        let mut check = joined.clone();
        while check != self.root {
            if fs::symlink_metadata(&check).is_ok_and(|m| m.file_type().is_symlink()) {
                bail!("Path contains symlink: {}", check.display());
            }
            if !check.pop() {
                break;
            }
        }
        Ok(joined)
    }
}

impl FileStore for DiskStore {
    fn update_file(&self, path: &str, content: &str) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        fs::write(&target, content)
            .with_context(|| format!("Failed to write {}", target.display()))
    }

    fn delete_file(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        match fs::remove_file(&target) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("Failed to delete {}", target.display())),
        }
    }
}
