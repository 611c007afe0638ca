//! Closing a cut-off envelope so it parses.
//!
//! The output is balanced outside strings; it is not guaranteed to carry
//! complete file contents. Callers surface that through `EditSet::truncated`.

use crate::scan::{scan, Token, Tokens};
use mender_core::DecodeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repaired {
    pub text: String,
    pub changed: bool,
}

type TrailingPattern = fn(&str, &[Token], Option<char>) -> Option<usize>;

/// Tried in order; the first pattern that matches cuts the text and the rest
/// are skipped.
const TRAILING_PATTERNS: &[(&str, TrailingPattern)] = &[
    ("trailing_comma", trailing_comma),
    ("key_without_value", key_without_value),
    ("partial_key", partial_key),
    ("partial_literal", partial_literal),
];

/// Close an unterminated string, drop a dangling partial member, then append
/// closers for every open container in LIFO order.
pub fn repair_truncated(input: &str, max_bytes: usize) -> Result<Repaired, DecodeError> {
    if input.len() > max_bytes {
        return Err(DecodeError::TooLargeToRepair {
            len: input.len(),
            limit: max_bytes,
        });
    }

    let report = scan(input);
    if report.is_balanced() {
        return Ok(Repaired {
            text: input.to_string(),
            changed: false,
        });
    }

    let mut text = input.to_string();
    if report.in_string() {
        if let Some(at) = report.dangling_escape {
            text.truncate(at);
        }
        text.push('"');
    }

    let report = scan(&text);
    let tokens: Vec<Token> = Tokens::new(&text).collect();
    for (name, pattern) in TRAILING_PATTERNS {
        if let Some(cut) = pattern(&text, &tokens, report.innermost()) {
            tracing::debug!(pattern = *name, cut, "stripped dangling tail");
            text.truncate(cut);
            break;
        }
    }

    let report = scan(&text);
    text.push_str(&report.missing_closers());

    Ok(Repaired {
        changed: text != input,
        text,
    })
}

/// Where to cut so that the member starting after `sep` disappears: at a
/// separating comma, or just after an opening brace/bracket.
fn cut_before_member(sep: Option<&Token>) -> Option<usize> {
    match sep {
        Some(Token::Bare { at, ch: ',' }) => Some(*at),
        Some(Token::Bare { at, ch: '{' }) | Some(Token::Bare { at, ch: '[' }) => Some(at + 1),
        _ => None,
    }
}

fn trailing_comma(_text: &str, tokens: &[Token], _innermost: Option<char>) -> Option<usize> {
    match tokens.last()? {
        Token::Bare { at, ch: ',' } => Some(*at),
        _ => None,
    }
}

fn key_without_value(_text: &str, tokens: &[Token], innermost: Option<char>) -> Option<usize> {
    if innermost != Some('{') {
        return None;
    }
    let [.., sep, Token::Str { .. }, Token::Bare { ch: ':', .. }] = tokens else {
        return None;
    };
    cut_before_member(Some(sep))
}

fn partial_key(_text: &str, tokens: &[Token], innermost: Option<char>) -> Option<usize> {
    if innermost != Some('{') {
        return None;
    }
    let [.., sep, Token::Str { .. }] = tokens else {
        return None;
    };
    cut_before_member(Some(sep))
}

fn partial_literal(text: &str, tokens: &[Token], innermost: Option<char>) -> Option<usize> {
    let is_literal_char = |token: &Token| {
        matches!(token, Token::Bare { ch, .. } if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '+' | '.'))
    };
    let run = tokens.iter().rev().take_while(|t| is_literal_char(t)).count();
    if run == 0 {
        return None;
    }
    let first = tokens.len() - run;
    let Token::Bare { at: literal_start, .. } = tokens[first] else {
        return None;
    };
    let literal = text[literal_start..].trim();
    if serde_json::from_str::<serde_json::Value>(literal).is_ok() {
        return None;
    }

    let before = first.checked_sub(1).map(|i| &tokens[i]);
    match before {
        Some(Token::Bare { ch: ':', .. }) if innermost == Some('{') => {
            // "key": <partial> -> drop the whole member
            let sep = first.checked_sub(3).map(|i| &tokens[i]);
            cut_before_member(sep)
        }
        other => cut_before_member(other),
    }
}
