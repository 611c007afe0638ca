//! Unified diff parsing and application
//!
//! Model-written diffs are often sloppy: missing file headers, stale line
//! numbers, re-indented context. Application first requires exact context
//! lines near the stated position, then retries once with whitespace-tolerant
//! matching and reduced context.

/// A single line in a diff hunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    Context(String),
    Add(String),
    Remove(String),
}

/// A hunk in a unified diff. `old_start` is 0 when the header carried no
/// usable line numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffHunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<DiffLine>,
}

impl DiffHunk {
    /// (additions, removals)
    pub fn summary(&self) -> (usize, usize) {
        let adds = self.lines.iter().filter(|l| matches!(l, DiffLine::Add(_))).count();
        let removes = self.lines.iter().filter(|l| matches!(l, DiffLine::Remove(_))).count();
        (adds, removes)
    }

    fn old_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                DiffLine::Context(s) | DiffLine::Remove(s) => Some(s.as_str()),
                DiffLine::Add(_) => None,
            })
            .collect()
    }

    /// Drop up to `fuzz` context lines from each end of the hunk.
    fn trimmed_context(&self, fuzz: usize) -> DiffHunk {
        let leading = self
            .lines
            .iter()
            .take_while(|l| matches!(l, DiffLine::Context(_)))
            .count()
            .min(fuzz);
        let trailing = self
            .lines
            .iter()
            .rev()
            .take_while(|l| matches!(l, DiffLine::Context(_)))
            .count()
            .min(fuzz);
        let end = self.lines.len().saturating_sub(trailing).max(leading);
        DiffHunk {
            old_start: if self.old_start > 0 { self.old_start + leading } else { 0 },
            old_count: self.old_count.saturating_sub(leading + trailing),
            new_start: self.new_start,
            new_count: self.new_count.saturating_sub(leading + trailing),
            lines: self.lines[leading..end].to_vec(),
        }
    }
}

/// A parsed unified diff. Paths are empty when the headers were omitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifiedDiff {
    pub old_path: String,
    pub new_path: String,
    pub hunks: Vec<DiffHunk>,
}

impl UnifiedDiff {
    /// Get total additions and deletions
    pub fn stats(&self) -> (usize, usize) {
        self.hunks.iter().fold((0, 0), |acc, h| {
            let (a, r) = h.summary();
            (acc.0 + a, acc.1 + r)
        })
    }
}

/// A hunk marker plus either file markers or change lines.
pub fn looks_like_diff(text: &str) -> bool {
    let mut hunk = false;
    let mut old_marker = false;
    let mut new_marker = false;
    let mut change = false;
    for line in text.lines() {
        if line.starts_with("@@") {
            hunk = true;
        } else if line.starts_with("--- ") {
            old_marker = true;
        } else if line.starts_with("+++ ") {
            new_marker = true;
        } else if line.starts_with('+') || line.starts_with('-') {
            change = true;
        }
    }
    hunk && ((old_marker && new_marker) || change)
}

fn header_path(rest: &str, prefix: &str) -> String {
    let path = rest.split('\t').next().unwrap_or(rest).trim();
    path.strip_prefix(prefix).unwrap_or(path).to_string()
}

/// Parse a unified diff string into structured data
pub fn parse_unified_diff(diff: &str) -> Result<UnifiedDiff, String> {
    let lines: Vec<&str> = diff.lines().collect();
    let mut old_path = String::new();
    let mut new_path = String::new();
    let mut hunks = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if let Some(rest) = line.strip_prefix("--- ") {
            old_path = header_path(rest, "a/");
            i += 1;
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            new_path = header_path(rest, "b/");
            i += 1;
        } else if line.starts_with("@@") {
            hunks.push(parse_hunk(&lines, &mut i));
        } else {
            i += 1;
        }
    }

    if hunks.is_empty() {
        return Err("No hunks found in diff".to_string());
    }

    Ok(UnifiedDiff {
        old_path,
        new_path,
        hunks,
    })
}

/// Parse a single hunk from the diff
fn parse_hunk(lines: &[&str], idx: &mut usize) -> DiffHunk {
    let header = lines[*idx];

    // @@ -old_start,old_count +new_start,new_count @@; numbers may be missing
    let mut parts = header.split_whitespace().skip(1);
    let (old_start, old_count) = parts
        .next()
        .and_then(|p| p.strip_prefix('-'))
        .and_then(parse_range)
        .unwrap_or((0, 0));
    let (new_start, new_count) = parts
        .next()
        .and_then(|p| p.strip_prefix('+'))
        .and_then(parse_range)
        .unwrap_or((0, 0));

    *idx += 1;
    let mut diff_lines = Vec::new();

    while *idx < lines.len() {
        let line = lines[*idx];

        // Stop at next hunk or the next file's headers
        if line.starts_with("@@") || line.starts_with("diff ") {
            break;
        }
        if line.starts_with("--- ")
            && lines.get(*idx + 1).map(|l| l.starts_with("+++ ")).unwrap_or(false)
        {
            break;
        }

        if let Some(added) = line.strip_prefix('+') {
            diff_lines.push(DiffLine::Add(added.to_string()));
        } else if let Some(removed) = line.strip_prefix('-') {
            diff_lines.push(DiffLine::Remove(removed.to_string()));
        } else if let Some(context) = line.strip_prefix(' ') {
            diff_lines.push(DiffLine::Context(context.to_string()));
        } else if line.starts_with('\\') {
            // "\ No newline at end of file"
        } else {
            // Context line whose leading space was lost
            diff_lines.push(DiffLine::Context(line.to_string()));
        }

        *idx += 1;
    }

    // Blank lines trailing the diff text are not context.
    while matches!(diff_lines.last(), Some(DiffLine::Context(s)) if s.is_empty()) {
        diff_lines.pop();
    }

    DiffHunk {
        old_start,
        old_count,
        new_start,
        new_count,
        lines: diff_lines,
    }
}

/// Parse a range like "10,5" or "10" into (start, count)
fn parse_range(s: &str) -> Option<(usize, usize)> {
    match s.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((s.parse().ok()?, 1)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchMode {
    Exact,
    /// Whitespace-insensitive comparison, reduced context.
    Fuzzy,
}

fn squash_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn lines_match(file: &[String], at: usize, old: &[&str], mode: MatchMode) -> bool {
    if at + old.len() > file.len() {
        return false;
    }
    old.iter().zip(&file[at..]).all(|(want, have)| match mode {
        MatchMode::Exact => *want == have.as_str(),
        MatchMode::Fuzzy => squash_whitespace(want) == squash_whitespace(have),
    })
}

/// Position of `old` at or after `floor`, nearest to `expected`.
fn locate(file: &[String], old: &[&str], expected: usize, floor: usize, mode: MatchMode) -> Option<usize> {
    if old.is_empty() {
        return Some(expected.clamp(floor, file.len()));
    }
    let last = file.len().checked_sub(old.len())?;
    if floor > last {
        return None;
    }
    let expected = expected.clamp(floor, last);
    let span = (expected - floor).max(last - expected);
    (0..=span).find_map(|distance| {
        let after = expected + distance;
        if after <= last && lines_match(file, after, old, mode) {
            return Some(after);
        }
        let before = expected.checked_sub(distance)?;
        (distance > 0 && before >= floor && lines_match(file, before, old, mode)).then_some(before)
    })
}

/// Replacement lines for a hunk matched at `at`. Context lines keep the
/// file's own text so fuzzy matches do not re-indent untouched lines.
fn splice_lines(file: &[String], at: usize, hunk: &DiffHunk) -> Vec<String> {
    let mut cursor = at;
    let mut out = Vec::with_capacity(hunk.lines.len());
    for line in &hunk.lines {
        match line {
            DiffLine::Context(text) => {
                out.push(file.get(cursor).cloned().unwrap_or_else(|| text.clone()));
                cursor += 1;
            }
            DiffLine::Remove(_) => cursor += 1,
            DiffLine::Add(text) => out.push(text.clone()),
        }
    }
    out
}

fn apply_hunks(original: &str, diff: &UnifiedDiff, mode: MatchMode) -> Option<String> {
    let mut file: Vec<String> = original.lines().map(str::to_string).collect();
    let mut delta: isize = 0;
    let mut floor = 0;
    let fuzz_levels: &[usize] = match mode {
        MatchMode::Exact => &[0],
        MatchMode::Fuzzy => &[0, 1, 2],
    };

    for hunk in &diff.hunks {
        let (at, hunk) = fuzz_levels.iter().find_map(|&fuzz| {
            let hunk = if fuzz == 0 { hunk.clone() } else { hunk.trimmed_context(fuzz) };
            let expected = if hunk.old_start == 0 {
                floor
            } else {
                (hunk.old_start as isize - 1 + delta).max(0) as usize
            };
            let old = hunk.old_lines();
            // A pure insertion with no context and no line number is ambiguous.
            if old.is_empty() && hunk.old_start == 0 && !file.is_empty() {
                return None;
            }
            locate(&file, &old, expected, floor, mode).map(|at| (at, hunk))
        })?;

        let old_len = hunk.old_lines().len();
        let new_lines = splice_lines(&file, at, &hunk);
        let new_len = new_lines.len();
        file.splice(at..at + old_len, new_lines);
        delta += new_len as isize - old_len as isize;
        floor = at + new_len;
    }

    let eol = if original.contains("\r\n") { "\r\n" } else { "\n" };
    let mut out = file.join(eol);
    if !out.is_empty() && (original.ends_with('\n') || original.is_empty()) {
        out.push_str(eol);
    }
    Some(out)
}

/// Apply a unified diff to `original`. `None` means the diff could not be
/// applied, even with fuzzy matching; the caller picks the fallback.
pub fn apply_unified_diff(original: &str, diff: &str) -> Option<String> {
    let parsed = parse_unified_diff(diff).ok()?;
    if let Some(out) = apply_hunks(original, &parsed, MatchMode::Exact) {
        return Some(out);
    }
    let fuzzy = apply_hunks(original, &parsed, MatchMode::Fuzzy);
    if fuzzy.is_some() {
        tracing::debug!(path = %parsed.new_path, "diff applied with fuzzy matching");
    }
    fuzzy
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGINAL: &str = "function hello() {\n  console.log(\"old\");\n  return true;\n}\n";

    #[test]
    fn test_parse_simple_diff() {
        let diff = r#"--- a/src/example.ts
+++ b/src/example.ts
@@ -1,5 +1,6 @@
 function hello() {
-  console.log("old");
+  console.log("new");
+  console.log("extra");
   return true;
 }
"#;
        let parsed = parse_unified_diff(diff).unwrap();
        assert_eq!(parsed.old_path, "src/example.ts");
        assert_eq!(parsed.hunks.len(), 1);
        assert_eq!(parsed.stats(), (2, 1)); // 2 adds, 1 remove
    }

    #[test]
    fn test_apply_diff() {
        let diff = r#"--- a/test.ts
+++ b/test.ts
@@ -1,4 +1,5 @@
 function hello() {
-  console.log("old");
+  console.log("new");
+  console.log("extra");
   return true;
 }
"#;
        let result = apply_unified_diff(ORIGINAL, diff).unwrap();
        assert_eq!(
            result,
            "function hello() {\n  console.log(\"new\");\n  console.log(\"extra\");\n  return true;\n}\n"
        );
    }

    #[test]
    fn headerless_diff_with_stale_line_numbers() {
        let original = "a\nb\nc\nd\ne\n";
        let diff = "@@ -40,3 +40,3 @@\n c\n-d\n+D\n e\n";
        assert_eq!(apply_unified_diff(original, diff).unwrap(), "a\nb\nc\nD\ne\n");
    }

    #[test]
    fn multiple_hunks_shift_by_delta() {
        let original = "1\n2\n3\n4\n5\n6\n7\n8\n";
        let diff = "@@ -1,2 +1,3 @@\n 1\n+1.5\n 2\n@@ -7,2 +8,1 @@\n 7\n-8\n";
        assert_eq!(
            apply_unified_diff(original, diff).unwrap(),
            "1\n1.5\n2\n3\n4\n5\n6\n7\n"
        );
    }

    #[test]
    fn fuzzy_match_tolerates_reindented_context() {
        let original = "fn main() {\n\tlet x = 1;\n\tprintln!(\"{x}\");\n}\n";
        let diff = "@@ -1,4 +1,4 @@\n fn main() {\n-    let x = 1;\n+    let x = 2;\n     println!(\"{x}\");\n }\n";
        let out = apply_unified_diff(original, diff).unwrap();
        assert_eq!(out, "fn main() {\n    let x = 2;\n\tprintln!(\"{x}\");\n}\n");
    }

    #[test]
    fn fuzzy_match_drops_stale_outer_context() {
        let original = "top\nmiddle\nbottom\n";
        let diff = "@@ -1,3 +1,3 @@\n nonexistent\n-middle\n+MIDDLE\n bottom\n";
        assert_eq!(apply_unified_diff(original, diff).unwrap(), "top\nMIDDLE\nbottom\n");
    }

    #[test]
    fn unmatched_diff_returns_none() {
        let diff = "@@ -1,2 +1,2 @@\n-alpha\n-beta\n+gamma\n";
        assert_eq!(apply_unified_diff(ORIGINAL, diff), None);
        assert_eq!(apply_unified_diff(ORIGINAL, "not a diff"), None);
    }

    #[test]
    fn diff_against_empty_file_builds_content() {
        let diff = "--- /dev/null\n+++ b/new.ts\n@@ -0,0 +1,2 @@\n+export const a = 1;\n+export const b = 2;\n";
        assert_eq!(
            apply_unified_diff("", diff).unwrap(),
            "export const a = 1;\nexport const b = 2;\n"
        );
    }

    #[test]
    fn detects_diff_shape() {
        assert!(looks_like_diff("@@ -1 +1 @@\n-a\n+b\n"));
        assert!(looks_like_diff("--- a/x\n+++ b/x\n@@ -1 +1 @@\n"));
        assert!(!looks_like_diff("export const a = 1;\n"));
        assert!(!looks_like_diff("@@ decorator-ish\nplain text\n"));
    }

    #[test]
    fn crlf_file_keeps_crlf_line_endings() {
        let out = apply_unified_diff("a\r\nb\r\nc\r\n", "@@ -1,3 +1,3 @@\n a\n-b\n+B\n c\n").unwrap();
        assert_eq!(out, "a\r\nB\r\nc\r\n");
    }

    #[test]
    fn trailing_newline_follows_original() {
        let out = apply_unified_diff("a\nb", "@@ -1,2 +1,2 @@\n a\n-b\n+c\n").unwrap();
        assert_eq!(out, "a\nc");
    }
}
