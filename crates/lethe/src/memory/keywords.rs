//! Keyword extraction
//!
//! Clustering, reforging and proposal analysis all compare memories by the
//! salient terms in their content. The engine only depends on the
//! [`KeywordExtractor`] trait; [`StopwordExtractor`] is the default.

use std::collections::HashSet;

/// Turns free text into an ordered set of salient, lower-case terms.
pub trait KeywordExtractor: Send + Sync {
    /// Extract keywords in order of first appearance, without duplicates
    fn extract(&self, text: &str) -> Vec<String>;
}

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do",
    "does", "did", "will", "would", "could", "should", "may", "might", "must", "this", "that",
    "these", "those", "it", "its", "they", "them", "their", "we", "you", "your", "our", "i",
    "me", "my", "he", "she", "his", "her", "not", "no", "yes", "what", "which", "who", "when",
    "where", "why", "how", "all", "each", "every", "both", "few", "more", "most", "other",
    "some", "such", "than", "too", "very", "just", "also", "only", "then", "there", "here",
    "now", "about", "into", "over", "after", "before", "between", "under", "again", "further",
    "once", "during", "while", "because", "still", "within", "without",
];

/// Stop-word filtering extractor.
///
/// Splits on non-alphanumeric characters and keeps unique words of at least
/// `min_word_length` characters that are not stop words.
#[derive(Debug, Clone)]
pub struct StopwordExtractor {
    stop_words: HashSet<&'static str>,
    min_word_length: usize,
    max_keywords: usize,
}

impl Default for StopwordExtractor {
    fn default() -> Self {
        Self::new(4, 20)
    }
}

impl StopwordExtractor {
    pub fn new(min_word_length: usize, max_keywords: usize) -> Self {
        Self {
            stop_words: STOP_WORDS.iter().copied().collect(),
            min_word_length,
            max_keywords,
        }
    }
}

impl KeywordExtractor for StopwordExtractor {
    fn extract(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        text.split(|c: char| !c.is_alphanumeric())
            .map(str::to_lowercase)
            .filter(|word| {
                word.chars().count() >= self.min_word_length
                    && !self.stop_words.contains(word.as_str())
                    && seen.insert(word.clone())
            })
            .take(self.max_keywords)
            .collect()
    }
}
