use crate::sanitize::looks_like_code;

const QUESTION_PHRASES: &[&str] = &[
    "could you",
    "can you",
    "would you",
    "do you want",
    "should i",
    "please provide",
    "please share",
    "please clarify",
    "which file",
    "what file",
    "what do you",
    "i need more",
    "need more information",
    "need more context",
    "let me know",
];

/// True when a response reads as a clarifying question and carries nothing
/// that could be applied.
pub fn is_asking_question(response: &str) -> bool {
    let text = response.trim();
    if text.is_empty() || text.contains("```") || text.contains("\"files\"") {
        return false;
    }
    if looks_like_code(text) {
        return false;
    }

    let lower = text.to_lowercase();
    let ends_with_question = text.ends_with('?');
    let has_phrase = QUESTION_PHRASES.iter().any(|p| lower.contains(p));
    ends_with_question || (has_phrase && text.contains('?'))
}
