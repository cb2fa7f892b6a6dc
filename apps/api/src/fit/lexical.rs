//! Lexical overlap between an attribute label and the candidate narrative.

use std::collections::HashSet;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "as", "at", "by", "for", "from", "in", "into", "of", "on", "or", "the",
    "to", "with", "within", "across",
];

/// Lowercase tokens, keeping `+` and `#` so "C++" and "C#" survive. Stopwords removed.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '+' || c == '#'))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Fraction of the label's distinct tokens present in the narrative, in [0, 1].
/// A label with no content tokens scores 0.
pub fn lexical_overlap(label: &str, narrative_tokens: &HashSet<String>) -> f64 {
    let label_tokens: HashSet<String> = tokenize(label).into_iter().collect();
    if label_tokens.is_empty() {
        return 0.0;
    }
    let hits = label_tokens
        .iter()
        .filter(|t| narrative_tokens.contains(*t))
        .count();
    hits as f64 / label_tokens.len() as f64
}

pub fn token_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}
