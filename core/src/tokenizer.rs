use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Tokens shorter than this (in characters) are never indexed nor searched.
pub const MIN_TERM_LEN: usize = 3;

lazy_static! {
    static ref RE: Regex = Regex::new(r"\p{L}+").expect("valid regex");
}

/// Normalize raw text into index terms: lowercase, NFD with combining marks
/// removed, non-letters treated as separators, short tokens dropped.
pub fn normalize(text: &str) -> Vec<String> {
    let folded: String = text
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();
    RE.find_iter(&folded)
        .map(|m| m.as_str())
        .filter(|token| token.chars().count() >= MIN_TERM_LEN)
        .map(str::to_string)
        .collect()
}

/// Normalize a list of query or page terms, keeping first-seen order and
/// dropping duplicates. A raw term may expand into several tokens.
pub fn normalize_terms<I, S>(terms: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for raw in terms {
        for token in normalize(raw.as_ref()) {
            if seen.insert(token.clone()) {
                out.push(token);
            }
        }
    }
    out
}

/// Unique terms of a page's text, as crawl workers put them in a `PageRecord`.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    normalize(text).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_diacritics_and_short_tokens() {
        let t = normalize("Ação é boa, ok?");
        assert_eq!(t, vec!["acao".to_string(), "boa".to_string()]);
    }

    #[test]
    fn dedups_terms() {
        let t = normalize_terms(["Cat", "CAT", "dog-house"]);
        assert_eq!(t, vec!["cat", "dog", "house"]);
    }
}
