//! Single-pass bracket/string scanning.
//!
//! Every repair and salvage step goes through [`Tokens`], so quote characters
//! inside strings (including escaped ones) never affect bracket counting.

use std::str::CharIndices;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// Any non-whitespace character outside a string literal.
    Bare { at: usize, ch: char },
    /// A string literal. `end` is the byte offset of the closing quote, or
    /// `None` when the input stops inside the string.
    Str {
        start: usize,
        end: Option<usize>,
        /// Offset of an escape sequence cut off by the end of input.
        dangling_escape: Option<usize>,
    },
}

pub struct Tokens<'a> {
    chars: CharIndices<'a>,
}

impl<'a> Tokens<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            chars: text.char_indices(),
        }
    }

    fn read_string(&mut self, start: usize) -> Token {
        loop {
            let Some((i, c)) = self.chars.next() else {
                return Token::Str {
                    start,
                    end: None,
                    dangling_escape: None,
                };
            };
            match c {
                '"' => {
                    return Token::Str {
                        start,
                        end: Some(i),
                        dangling_escape: None,
                    }
                }
                '\\' => {
                    let Some((_, esc)) = self.chars.next() else {
                        return Token::Str {
                            start,
                            end: None,
                            dangling_escape: Some(i),
                        };
                    };
                    if esc == 'u' {
                        let mut code = 0u32;
                        let mut digits = 0;
                        while digits < 4 {
                            match self.chars.clone().next() {
                                Some((_, h)) if h.is_ascii_hexdigit() => {
                                    self.chars.next();
                                    code = code * 16 + h.to_digit(16).unwrap_or(0);
                                    digits += 1;
                                }
                                Some(_) => break,
                                None => {
                                    return Token::Str {
                                        start,
                                        end: None,
                                        dangling_escape: Some(i),
                                    }
                                }
                            }
                        }
                        // A lead surrogate whose low half never arrived cannot be
                        // closed as is.
                        if digits == 4
                            && is_lead_surrogate(code)
                            && is_partial_unicode_escape(self.chars.clone().map(|(_, c)| c))
                        {
                            return Token::Str {
                                start,
                                end: None,
                                dangling_escape: Some(i),
                            };
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

impl Iterator for Tokens<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        loop {
            let (i, c) = self.chars.next()?;
            if c == '"' {
                return Some(self.read_string(i));
            }
            if !c.is_whitespace() {
                return Some(Token::Bare { at: i, ch: c });
            }
        }
    }
}

pub(crate) fn is_lead_surrogate(code: u32) -> bool {
    (0xD800..=0xDBFF).contains(&code)
}

/// True when `rest` runs out before completing a `\uXXXX` escape (an empty
/// rest counts).
pub(crate) fn is_partial_unicode_escape(rest: impl Iterator<Item = char>) -> bool {
    let mut rest = rest;
    for position in 0..6 {
        let Some(c) = rest.next() else {
            return true;
        };
        let fits = match position {
            0 => c == '\\',
            1 => c == 'u',
            _ => c.is_ascii_hexdigit(),
        };
        if !fits {
            return false;
        }
    }
    false
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub open_braces: usize,
    pub close_braces: usize,
    pub open_brackets: usize,
    pub close_brackets: usize,
    /// Byte offset of the opening quote of an unterminated string.
    pub open_string: Option<usize>,
    pub dangling_escape: Option<usize>,
    /// Unclosed openers in encounter order.
    pub stack: Vec<(usize, char)>,
    /// Closers that did not match the innermost opener.
    pub mismatched: usize,
}

impl ScanReport {
    pub fn in_string(&self) -> bool {
        self.open_string.is_some()
    }

    pub fn is_balanced(&self) -> bool {
        !self.in_string()
            && self.open_braces == self.close_braces
            && self.open_brackets == self.close_brackets
            && self.mismatched == 0
    }

    /// Closers for the still-open containers, innermost first.
    pub fn missing_closers(&self) -> String {
        self.stack
            .iter()
            .rev()
            .map(|(_, open)| closer_for(*open))
            .collect()
    }

    /// Innermost open container, if any.
    pub fn innermost(&self) -> Option<char> {
        self.stack.last().map(|(_, c)| *c)
    }
}

pub fn closer_for(open: char) -> char {
    if open == '[' {
        ']'
    } else {
        '}'
    }
}

pub fn scan(text: &str) -> ScanReport {
    let mut report = ScanReport::default();
    for token in Tokens::new(text) {
        match token {
            Token::Str {
                start,
                end: None,
                dangling_escape,
            } => {
                report.open_string = Some(start);
                report.dangling_escape = dangling_escape;
            }
            Token::Str { .. } => {}
            Token::Bare { at, ch } => match ch {
                '{' | '[' => {
                    if ch == '{' {
                        report.open_braces += 1;
                    } else {
                        report.open_brackets += 1;
                    }
                    report.stack.push((at, ch));
                }
                '}' | ']' => {
                    if ch == '}' {
                        report.close_braces += 1;
                    } else {
                        report.close_brackets += 1;
                    }
                    match report.stack.last() {
                        Some((_, open)) if closer_for(*open) == ch => {
                            report.stack.pop();
                        }
                        _ => report.mismatched += 1,
                    }
                }
                _ => {}
            },
        }
    }
    report
}

pub fn is_balanced(text: &str) -> bool {
    scan(text).is_balanced()
}

/// Byte offset of the closer matching the container opened at `open_at`.
pub fn find_matching_close(text: &str, open_at: usize) -> Option<usize> {
    let tail = text.get(open_at..)?;
    let first = tail.chars().next()?;
    if first != '{' && first != '[' {
        return None;
    }
    let mut stack: Vec<char> = Vec::new();
    for token in Tokens::new(tail) {
        let Token::Bare { at, ch } = token else {
            continue;
        };
        match ch {
            '{' | '[' => stack.push(ch),
            '}' | ']' => {
                if stack.last().map(|open| closer_for(*open)) == Some(ch) {
                    stack.pop();
                    if stack.is_empty() {
                        return Some(open_at + at);
                    }
                }
            }
            _ => {}
        }
    }
    None
}

/// Offset of the first `{` that is not inside a string literal.
pub fn first_object_start(text: &str) -> Option<usize> {
    Tokens::new(text).find_map(|token| match token {
        Token::Bare { at, ch: '{' } => Some(at),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn balanced_object_with_quoted_braces() {
        let text = r#"{"a": "}{]", "b": ["x\"}", {"c": 1}]}"#;
        assert!(is_balanced(text));
        assert_eq!(find_matching_close(text, 0), Some(text.len() - 1));
    }

    #[test]
    fn reports_unterminated_string() {
        let report = scan(r#"{"files": {"a.txt": "hel"#);
        assert!(report.in_string());
        assert!(!report.is_balanced());
        assert_eq!(report.missing_closers(), "}}");
    }

    #[test]
    fn reports_dangling_escape() {
        let report = scan(r#"{"a": "x\"#);
        assert!(report.in_string());
        assert_eq!(report.dangling_escape, Some(8));

        let report = scan(r#"{"a": "x\u00"#);
        assert_eq!(report.dangling_escape, Some(8));
    }

    #[test]
    fn cut_off_surrogate_pair_is_a_dangling_escape() {
        let report = scan(r#"{"a": "x\ud83d"#);
        assert_eq!(report.dangling_escape, Some(8));

        let report = scan(r#"{"a": "x\ud83d\ude"#);
        assert_eq!(report.dangling_escape, Some(8));

        let report = scan(r#"{"a": "x\ud83d\ude00"#);
        assert_eq!(report.dangling_escape, None);
        assert!(report.in_string());

        assert!(is_balanced(r#"{"a": "x\u00e9"}"#));
    }

    #[test]
    fn escaped_backslash_before_quote_closes_string() {
        let report = scan(r#"{"a": "x\\"}"#);
        assert!(report.is_balanced());
    }

    #[test]
    fn missing_closers_follow_lifo_order() {
        let report = scan(r#"{"a": [{"b": [1, 2"#);
        assert_eq!(report.missing_closers(), "]}]}");
    }

    #[test]
    fn mismatched_closer_is_counted_not_fatal() {
        let report = scan("{]");
        assert_eq!(report.mismatched, 1);
        assert!(!report.is_balanced());
        assert_eq!(report.missing_closers(), "}");
    }

    #[test]
    fn find_matching_close_on_nested_container() {
        let text = r#"{"outer": {"inner": [1, {"x": "}"}]}, "tail": 1}"#;
        let inner = text.find("{\"inner").unwrap();
        let close = find_matching_close(text, inner).unwrap();
        assert_eq!(&text[inner..=close], r#"{"inner": [1, {"x": "}"}]}"#);
    }

    #[test]
    fn first_object_start_skips_braces_in_strings() {
        let text = r#""not {this}" then {"real": 1}"#;
        assert_eq!(first_object_start(text), text.find("{\"real"));
    }

    proptest! {
        #[test]
        fn serialized_json_is_always_balanced(
            entries in proptest::collection::btree_map("[a-z/._{}\\[\\]\"\\\\]{1,12}", ".{0,40}", 0..6)
        ) {
            let text = serde_json::json!({ "files": entries, "list": [1, [2, {}]] }).to_string();
            prop_assert!(is_balanced(&text));
            prop_assert_eq!(find_matching_close(&text, 0), Some(text.len() - 1));
        }
    }
}
