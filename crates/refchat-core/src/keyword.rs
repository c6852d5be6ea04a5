//! Keyword tokenization and scoring.
//!
//! Tokens are maximal runs of alphanumeric characters, lower-cased, so
//! punctuation never participates in a match and `"Gamma,"` matches the
//! query `gamma`.
//!
//! # Scoring rule
//!
//! `score(chunk) = Σ tf(t, chunk)` over the *distinct* tokens `t` of the
//! query, where `tf` is the number of occurrences of `t` among the chunk's
//! tokens. Repeating a word in the query does not change the score. Chunks
//! scoring 0 are not matches.

use std::collections::HashMap;

/// Split `text` into lower-cased alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Distinct query tokens in first-seen order.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for token in tokenize(query) {
        if !terms.contains(&token) {
            terms.push(token);
        }
    }
    terms
}

/// Score `text` against pre-tokenized, de-duplicated query terms.
pub fn score(terms: &[String], text: &str) -> u32 {
    if terms.is_empty() {
        return 0;
    }
    let mut freq: HashMap<String, u32> = HashMap::new();
    for token in tokenize(text) {
        *freq.entry(token).or_insert(0) += 1;
    }
    terms.iter().filter_map(|t| freq.get(t)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_strips_punctuation_and_case() {
        assert_eq!(
            tokenize("Alpha, BETA; gamma-ray!"),
            vec!["alpha", "beta", "gamma", "ray"]
        );
        assert!(tokenize("... --- !!!").is_empty());
    }

    #[test]
    fn tokenize_keeps_non_ascii_letters() {
        assert_eq!(tokenize("Grüße aus Köln"), vec!["grüße", "aus", "köln"]);
    }

    #[test]
    fn query_terms_are_distinct() {
        assert_eq!(query_terms("rust Rust RUST cargo"), vec!["rust", "cargo"]);
    }

    #[test]
    fn score_counts_term_frequency() {
        let terms = query_terms("gamma delta");
        assert_eq!(score(&terms, "Gamma gamma. Delta."), 3);
        assert_eq!(score(&terms, "nothing here"), 0);
    }

    #[test]
    fn repeated_query_words_do_not_inflate_score() {
        let once = query_terms("gamma");
        let thrice = query_terms("gamma gamma gamma");
        assert_eq!(score(&once, "gamma"), score(&thrice, "gamma"));
    }
}
