//! Module-specifier helpers for relative JS/TS imports.

use crate::util::cached_regex;
use mender_core::FileSnapshot;
use regex::Regex;
use std::sync::OnceLock;

static SPECIFIER: OnceLock<Option<Regex>> = OnceLock::new();

pub(crate) const RESOLVABLE_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "mjs", "cjs", "json", "css", "scss", "vue", "svelte",
];

/// Module specifiers in `import ... from '...'`, `import '...'`,
/// `require('...')` and `import('...')` forms.
pub(crate) fn specifiers(content: &str) -> Vec<String> {
    let Some(re) = cached_regex(
        &SPECIFIER,
        r#"(?:\bfrom\s+|\bimport\s+|\brequire\(\s*|\bimport\(\s*)["']([^"'\n]+)["']"#,
    ) else {
        return Vec::new();
    };
    re.captures_iter(content)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

pub(crate) fn is_relative(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../")
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Resolve `specifier` against the directory of `from_file`, collapsing `.`
/// and `..` segments. `None` when the specifier climbs above the root.
pub(crate) fn resolve(from_file: &str, specifier: &str) -> Option<String> {
    let mut parts: Vec<&str> = parent_dir(from_file)
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    for segment in specifier.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

fn strip_extension(path: &str) -> &str {
    let file_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[file_start..].rfind('.') {
        Some(dot) if dot > 0 => &path[..file_start + dot],
        _ => path,
    }
}

pub(crate) fn has_extension(specifier: &str) -> bool {
    let file = specifier.rsplit('/').next().unwrap_or(specifier);
    file.rfind('.').is_some_and(|dot| dot > 0)
}

/// The snapshot file a resolved specifier points at, matched exactly first,
/// then by adding a known extension or `/index`.
pub(crate) fn find_exact(files: &FileSnapshot, resolved: &str) -> Option<String> {
    if files.contains_key(resolved) {
        return Some(resolved.to_string());
    }
    RESOLVABLE_EXTENSIONS.iter().find_map(|ext| {
        [format!("{resolved}.{ext}"), format!("{resolved}/index.{ext}")]
            .into_iter()
            .find(|candidate| files.contains_key(candidate))
    })
}

/// Like [`find_exact`], but also accepts a different letter case or a
/// different extension.
pub(crate) fn find_loose(files: &FileSnapshot, resolved: &str) -> Option<String> {
    if let Some(exact) = find_exact(files, resolved) {
        return Some(exact);
    }
    let wanted = strip_extension(resolved).to_lowercase();
    let wanted_index = format!("{wanted}/index");
    files
        .keys()
        .filter(|path| {
            path.rsplit('.')
                .next()
                .is_some_and(|ext| RESOLVABLE_EXTENSIONS.contains(&ext))
        })
        .find(|path| {
            let stem = strip_extension(path).to_lowercase();
            stem == wanted || stem == wanted_index
        })
        .cloned()
}

/// Relative specifier from `from_file` to `to_file`, always starting with
/// `./` or `../`.
pub(crate) fn relative_specifier(from_file: &str, to_file: &str) -> String {
    let from: Vec<&str> = parent_dir(from_file)
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    let to: Vec<&str> = to_file.split('/').filter(|s| !s.is_empty()).collect();
    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let ups = from.len() - common;
    let rest = to[common..].join("/");
    if ups == 0 {
        format!("./{rest}")
    } else {
        format!("{}{rest}", "../".repeat(ups))
    }
}

/// Snapshot files imported by `path` through relative specifiers, in import
/// order without duplicates.
pub(crate) fn local_dependencies(files: &FileSnapshot, path: &str) -> Vec<String> {
    let Some(content) = files.get(path) else {
        return Vec::new();
    };
    let mut out: Vec<String> = Vec::new();
    for specifier in specifiers(content).iter().filter(|s| is_relative(s)) {
        let Some(resolved) = resolve(path, specifier) else {
            continue;
        };
        if let Some(found) = find_exact(files, &resolved) {
            if found != path && !out.contains(&found) {
                out.push(found);
            }
        }
    }
    out
}

/// Files whose imports mention `specifier` verbatim.
pub(crate) fn importers_of<'a>(files: &'a FileSnapshot, specifier: &str) -> Vec<&'a str> {
    files
        .iter()
        .filter(|(_, content)| specifiers(content).iter().any(|s| s == specifier))
        .map(|(path, _)| path.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(paths: &[&str]) -> FileSnapshot {
        paths
            .iter()
            .map(|p| (p.to_string(), String::new()))
            .collect()
    }

    #[test]
    fn specifier_forms() {
        let content = "import React from 'react';\nimport './index.css';\nconst x = require(\"../x\");\nconst y = await import('./lazy');\nexport { a } from './a';\n";
        assert_eq!(
            specifiers(content),
            vec!["react", "./index.css", "../x", "./lazy", "./a"]
        );
    }

    #[test]
    fn resolve_and_relative_round_trip() {
        assert_eq!(resolve("src/App.tsx", "./components/Header").as_deref(), Some("src/components/Header"));
        assert_eq!(resolve("src/pages/Home.tsx", "../utils").as_deref(), Some("src/utils"));
        assert_eq!(resolve("App.tsx", "../outside"), None);
        assert_eq!(relative_specifier("src/App.tsx", "src/components/Header.tsx"), "./components/Header.tsx");
        assert_eq!(relative_specifier("src/pages/Home.tsx", "src/utils.ts"), "../utils.ts");
    }

    #[test]
    fn loose_lookup_handles_case_and_extension() {
        let snapshot = files(&["src/components/Header.jsx", "src/lib/index.ts"]);
        assert_eq!(
            find_exact(&snapshot, "src/components/Header").as_deref(),
            Some("src/components/Header.jsx")
        );
        assert_eq!(find_exact(&snapshot, "src/lib").as_deref(), Some("src/lib/index.ts"));
        assert_eq!(find_exact(&snapshot, "src/components/header"), None);
        assert_eq!(
            find_loose(&snapshot, "src/components/header.tsx").as_deref(),
            Some("src/components/Header.jsx")
        );
    }

    #[test]
    fn dependencies_and_importers() {
        let mut snapshot = files(&["src/a.ts", "src/b.ts"]);
        snapshot.insert(
            "src/main.ts".to_string(),
            "import { a } from './a';\nimport { b } from './b';\nimport { a as again } from './a.ts';\nimport x from 'pkg';\n".to_string(),
        );
        assert_eq!(local_dependencies(&snapshot, "src/main.ts"), vec!["src/a.ts", "src/b.ts"]);
        assert_eq!(importers_of(&snapshot, "./b"), vec!["src/main.ts"]);
    }
}
