//! Text analysis: unicode word segmentation, lowercasing, stop words.
//!
//! One analyzer serves both the inverted index and cluster keyword
//! extraction, so a query term and an indexed term always normalize the same
//! way.

use ahash::AHashSet;
use lazy_static::lazy_static;
use unicode_segmentation::UnicodeSegmentation;

lazy_static! {
    /// English stop words excluded from indexing and keyword extraction.
    pub static ref STOP_WORDS: AHashSet<&'static str> = [
        "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can",
        "did", "do", "does", "for", "from", "had", "has", "have", "he", "her",
        "his", "how", "i", "if", "in", "into", "is", "it", "its", "just",
        "me", "my", "no", "not", "of", "on", "or", "our", "she", "so", "some",
        "such", "than", "that", "the", "their", "them", "then", "there",
        "these", "they", "this", "to", "was", "we", "were", "what", "when",
        "where", "which", "while", "who", "why", "will", "with", "would",
        "you", "your",
    ]
    .into_iter()
    .collect();
}

/// Tokenize text into lowercase unicode words, stop words removed.
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words()
        .map(|word| word.to_lowercase())
        .filter(|word| !STOP_WORDS.contains(word.as_str()))
        .collect()
}

/// Tokenize without stop-word removal. Used for document length statistics
/// kept comparable across configurations.
pub fn tokenize_all(text: &str) -> Vec<String> {
    text.unicode_words().map(|word| word.to_lowercase()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_lowercases_and_drops_stop_words() {
        let tokens = tokenize("The Quick Brown Fox and the Lazy Dog");
        assert_eq!(tokens, vec!["quick", "brown", "fox", "lazy", "dog"]);
    }

    #[test]
    fn test_tokenize_handles_punctuation() {
        let tokens = tokenize("error-handling, retries; time-outs!");
        assert_eq!(tokens, vec!["error", "handling", "retries", "time", "outs"]);
    }

    #[test]
    fn test_tokenize_all_keeps_stop_words() {
        assert_eq!(tokenize_all("the fox").len(), 2);
        assert_eq!(tokenize("the fox").len(), 1);
    }
}
