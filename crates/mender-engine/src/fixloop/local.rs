use super::imports::{find_loose, has_extension, is_relative, relative_specifier, resolve};
use crate::util::cached_regex;
use mender_core::ignore::normalize_path;
use mender_core::{ErrorClassification, ErrorKind, FileSnapshot, LocalFix, LocalFixer};
use regex::Regex;
use std::sync::OnceLock;

const REACT_HOOKS: &[&str] = &[
    "useState",
    "useEffect",
    "useRef",
    "useMemo",
    "useCallback",
    "useContext",
    "useReducer",
    "useLayoutEffect",
    "useId",
    "useTransition",
    "useDeferredValue",
];

static REACT_IMPORT: OnceLock<Option<Regex>> = OnceLock::new();

/// Deterministic fixes for errors whose repair is obvious from the snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedFixer;

impl RuleBasedFixer {
    pub fn new() -> Self {
        Self
    }
}

impl LocalFixer for RuleBasedFixer {
    fn can_fix(&self, error: &ErrorClassification) -> bool {
        match error.kind {
            ErrorKind::UnresolvedImport => error.bad_path.as_deref().is_some_and(is_relative),
            ErrorKind::UndefinedReference => error
                .symbol
                .as_deref()
                .is_some_and(|s| s == "React" || REACT_HOOKS.contains(&s)),
            _ => false,
        }
    }

    fn try_fix(
        &self,
        error: &ErrorClassification,
        target_file: &str,
        files: &FileSnapshot,
    ) -> Option<LocalFix> {
        let file = normalize_path(error.file.as_deref().unwrap_or(target_file));
        let content = files.get(&file)?;
        let (updated, description) = match error.kind {
            ErrorKind::UnresolvedImport => {
                fix_import_path(&file, content, error.bad_path.as_deref()?, files)?
            }
            ErrorKind::UndefinedReference => add_react_import(content, error.symbol.as_deref()?)?,
            _ => return None,
        };
        if updated == *content {
            return None;
        }
        tracing::debug!(file = %file, "{description}");
        Some(LocalFix {
            description,
            files: FileSnapshot::from([(file, updated)]),
        })
    }
}

/// Point a broken relative import at the snapshot file it most likely meant.
fn fix_import_path(
    file: &str,
    content: &str,
    bad_path: &str,
    files: &FileSnapshot,
) -> Option<(String, String)> {
    let resolved = resolve(file, bad_path)?;
    let found = find_loose(files, &resolved)?;

    let mut specifier = relative_specifier(file, &found);
    if !has_extension(bad_path) {
        if let Some((stem, _)) = specifier.rsplit_once('.') {
            if !stem.ends_with('/') && !stem.ends_with('.') {
                specifier = stem.to_string();
            }
        }
        if let Some(dir) = specifier.strip_suffix("/index") {
            specifier = dir.to_string();
        }
    }
    if specifier == bad_path {
        return None;
    }

    let mut updated = content.to_string();
    for quote in ['\'', '"', '`'] {
        updated = updated.replace(
            &format!("{quote}{bad_path}{quote}"),
            &format!("{quote}{specifier}{quote}"),
        );
    }
    Some((
        updated,
        format!("Rewrote import '{bad_path}' to '{specifier}' in {file}"),
    ))
}

fn add_react_import(content: &str, symbol: &str) -> Option<(String, String)> {
    let re = cached_regex(
        &REACT_IMPORT,
        r#"(?m)^import\s+(?:(?P<default>[A-Za-z_$][\w$]*)\s*,?\s*)?(?:\{(?P<named>[^}]*)\}\s*)?from\s+(?P<quote>['"])react['"];?"#,
    )?;
    let existing = re.captures(content);

    if symbol == "React" {
        if existing
            .as_ref()
            .and_then(|c| c.name("default"))
            .is_some_and(|d| d.as_str() == "React")
        {
            return None;
        }
        let updated = match existing.as_ref() {
            Some(caps) => {
                let whole = caps.get(0)?;
                let named = caps.name("named").map(|n| n.as_str().trim()).unwrap_or("");
                let line = if named.is_empty() {
                    "import React from 'react';".to_string()
                } else {
                    format!("import React, {{ {named} }} from 'react';")
                };
                format!("{}{}{}", &content[..whole.start()], line, &content[whole.end()..])
            }
            None => format!("import React from 'react';\n{content}"),
        };
        return Some((updated, "Added missing React import".to_string()));
    }

    let description = format!("Imported {symbol} from react");
    let Some(caps) = existing else {
        return Some((
            format!("import {{ {symbol} }} from 'react';\n{content}"),
            description,
        ));
    };

    let whole = caps.get(0)?;
    let mut names: Vec<String> = caps
        .name("named")
        .map(|n| {
            n.as_str()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if names.iter().any(|n| n == symbol) {
        return None;
    }
    names.push(symbol.to_string());

    let quote = caps.name("quote").map(|q| q.as_str()).unwrap_or("'");
    let line = match caps.name("default") {
        Some(default) => format!(
            "import {}, {{ {} }} from {quote}react{quote};",
            default.as_str(),
            names.join(", ")
        ),
        None => format!("import {{ {} }} from {quote}react{quote};", names.join(", ")),
    };
    Some((
        format!("{}{}{}", &content[..whole.start()], line, &content[whole.end()..]),
        description,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classification(kind: ErrorKind) -> ErrorClassification {
        ErrorClassification {
            kind,
            ..ErrorClassification::default()
        }
    }

    #[test]
    fn can_fix_only_known_shapes() {
        let fixer = RuleBasedFixer::new();
        let mut import = classification(ErrorKind::UnresolvedImport);
        import.bad_path = Some("./Header".to_string());
        assert!(fixer.can_fix(&import));
        import.bad_path = Some("lodash".to_string());
        assert!(!fixer.can_fix(&import));

        let mut reference = classification(ErrorKind::UndefinedReference);
        reference.symbol = Some("useEffect".to_string());
        assert!(fixer.can_fix(&reference));
        reference.symbol = Some("fetchUser".to_string());
        assert!(!fixer.can_fix(&reference));
        assert!(!fixer.can_fix(&classification(ErrorKind::Syntax)));
    }

    #[test]
    fn fixes_import_with_wrong_case() {
        let files = FileSnapshot::from([
            (
                "src/App.tsx".to_string(),
                "import Header from './components/header';\nexport default Header;\n".to_string(),
            ),
            ("src/components/Header.tsx".to_string(), "export default 1;\n".to_string()),
        ]);
        let mut error = classification(ErrorKind::UnresolvedImport);
        error.bad_path = Some("./components/header".to_string());
        error.file = Some("src/App.tsx".to_string());

        let fix = RuleBasedFixer::new()
            .try_fix(&error, "src/App.tsx", &files)
            .unwrap();
        assert_eq!(
            fix.files["src/App.tsx"],
            "import Header from './components/Header';\nexport default Header;\n"
        );
    }

    #[test]
    fn fixes_import_with_wrong_extension() {
        let files = FileSnapshot::from([
            ("src/main.ts".to_string(), "import { a } from \"./util.js\";\n".to_string()),
            ("src/util.ts".to_string(), "export const a = 1;\n".to_string()),
        ]);
        let mut error = classification(ErrorKind::UnresolvedImport);
        error.bad_path = Some("./util.js".to_string());

        let fix = RuleBasedFixer::new()
            .try_fix(&error, "src/main.ts", &files)
            .unwrap();
        assert_eq!(fix.files["src/main.ts"], "import { a } from \"./util.ts\";\n");
    }

    #[test]
    fn missing_target_gives_no_fix() {
        let files = FileSnapshot::from([("src/main.ts".to_string(), "import './nowhere';\n".to_string())]);
        let mut error = classification(ErrorKind::UnresolvedImport);
        error.bad_path = Some("./nowhere".to_string());
        assert!(RuleBasedFixer::new().try_fix(&error, "src/main.ts", &files).is_none());
    }

    #[test]
    fn adds_hook_to_existing_react_import() {
        let (updated, _) = add_react_import(
            "import React from 'react';\nexport function A() { const [x] = useState(0); }\n",
            "useState",
        )
        .unwrap();
        assert!(updated.starts_with("import React, { useState } from 'react';\n"));

        let (updated, _) = add_react_import(
            "import { useEffect } from \"react\";\nuseState();\n",
            "useState",
        )
        .unwrap();
        assert!(updated.starts_with("import { useEffect, useState } from \"react\";\n"));

        assert!(add_react_import("import { useState } from 'react';\n", "useState").is_none());
    }

    #[test]
    fn adds_react_default_import() {
        let (updated, _) = add_react_import("export const A = () => <div />;\n", "React").unwrap();
        assert_eq!(updated, "import React from 'react';\nexport const A = () => <div />;\n");

        let (updated, _) = add_react_import("import { useState } from 'react';\n", "React").unwrap();
        assert_eq!(updated, "import React, { useState } from 'react';\n");
    }
}
