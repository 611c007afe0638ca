//! Paths that never belong in an edit set.

/// Directory and file names dropped wherever they appear as a path segment.
pub const IGNORED_SEGMENTS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "bower_components",
    ".pnpm-store",
    ".yarn",
    ".npm",
    "__pycache__",
    ".venv",
    "venv",
    "target",
    "dist",
    "build",
    ".next",
    ".nuxt",
    ".svelte-kit",
    ".turbo",
    ".cache",
    "coverage",
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
];

/// Normalise a model-provided path: trims whitespace, converts backslashes and
/// drops leading `./` and `/`.
pub fn normalize_path(raw: &str) -> String {
    let mut path = raw.trim().replace('\\', "/");
    loop {
        if let Some(rest) = path.strip_prefix("./") {
            path = rest.to_string();
        } else if let Some(rest) = path.strip_prefix('/') {
            path = rest.to_string();
        } else {
            break;
        }
    }
    path
}

/// True when the path equals, sits under, or contains an ignored segment.
pub fn is_ignored_path(path: &str) -> bool {
    let normalized = normalize_path(path);
    normalized
        .split('/')
        .any(|segment| IGNORED_SEGMENTS.contains(&segment))
}
