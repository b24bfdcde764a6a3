//! Text tokenization shared by the simulated indexes and the pair scorer.
//!
//! ```ascii
//! text ─► lowercase ─► NFKD, strip combining marks ─► split non-alnum
//!      ─► drop short tokens ─► drop stop words ─► Porter2 stem
//! ```

use rust_stemmers::{Algorithm, Stemmer};
use unicode_normalization::UnicodeNormalization;

/// Tokenizer options.
#[derive(Debug, Clone)]
pub struct TokenizerConfig {
    /// Apply Porter2 stemming.
    pub enable_stemming: bool,
    /// Stemmer language.
    pub stemmer_algorithm: Algorithm,
    /// Drop common English stop words.
    pub enable_stop_words: bool,
    /// Tokens shorter than this are dropped.
    pub min_token_length: usize,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            enable_stemming: true,
            stemmer_algorithm: Algorithm::English,
            enable_stop_words: true,
            min_token_length: 2,
        }
    }
}

impl TokenizerConfig {
    /// Lowercase + split only.
    pub fn minimal() -> Self {
        Self {
            enable_stemming: false,
            stemmer_algorithm: Algorithm::English,
            enable_stop_words: false,
            min_token_length: 2,
        }
    }
}

// Sorted for binary search.
const ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "all", "also", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "could",
    "did", "do", "does", "for", "from", "had", "has", "have", "he", "if", "in", "is", "it", "its",
    "just", "may", "might", "must", "no", "not", "of", "on", "or", "our", "out", "should", "so",
    "than", "that", "the", "their", "then", "there", "they", "this", "to", "too", "up", "very",
    "was", "we", "were", "what", "when", "where", "which", "who", "will", "with", "would", "you",
    "your",
];

fn is_stop_word(word: &str) -> bool {
    ENGLISH_STOP_WORDS.binary_search(&word).is_ok()
}

/// Tokenize `text` with `config`.
pub fn tokenize(text: &str, config: &TokenizerConfig) -> Vec<String> {
    let normalized: String = text
        .to_lowercase()
        .nfkd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect();

    let tokens = normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty() && s.chars().count() >= config.min_token_length)
        .filter(|s| !config.enable_stop_words || !is_stop_word(s));

    if config.enable_stemming {
        let stemmer = Stemmer::create(config.stemmer_algorithm);
        tokens.map(|t| stemmer.stem(t).into_owned()).collect()
    } else {
        tokens.map(str::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_words_sorted() {
        let mut sorted = ENGLISH_STOP_WORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, ENGLISH_STOP_WORDS);
    }

    #[test]
    fn test_tokenize_default_stems_and_filters() {
        let tokens = tokenize("The Running of the Servers", &TokenizerConfig::default());
        assert_eq!(tokens, vec!["run", "server"]);
    }

    #[test]
    fn test_tokenize_strips_accents() {
        let tokens = tokenize("Café résumé", &TokenizerConfig::minimal());
        assert_eq!(tokens, vec!["cafe", "resume"]);
    }

    #[test]
    fn test_tokenize_minimal_keeps_stop_words() {
        let tokens = tokenize("the cat", &TokenizerConfig::minimal());
        assert_eq!(tokens, vec!["the", "cat"]);
    }
}
