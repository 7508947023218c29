//! Cluster keyword extraction.
//!
//! Names clusters from their member documents, independently of the
//! clustering algorithm: terms longer than three characters, lowercased,
//! stop words removed, ranked by member-document frequency. Three tiers are
//! produced — a detailed list for metadata, a score-annotated list, and a
//! short visualization label.

use ahash::{AHashMap, AHashSet};

use crate::lexical::analyzer::tokenize;

/// Terms this short or shorter are ignored.
const MIN_TERM_LENGTH: usize = 3;

/// Terms in the detailed and scored tiers.
const DETAILED_KEYWORDS: usize = 10;

/// Terms joined into the short visualization label.
const SHORT_LABEL_KEYWORDS: usize = 3;

/// Fallback label for clusters whose members yield no usable terms.
const EMPTY_LABEL: &str = "unlabeled";

/// The three keyword tiers extracted for one cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterKeywords {
    /// Detailed term list for metadata.
    pub detailed: Vec<String>,
    /// Terms with their member-document frequency share, descending.
    pub scored: Vec<(String, f32)>,
    /// Short visualization label, top terms joined by `", "`.
    pub short_label: String,
}

/// Extract keyword tiers from the member documents of one cluster.
pub fn extract_keywords(member_texts: &[&str]) -> ClusterKeywords {
    let mut document_frequency: AHashMap<String, usize> = AHashMap::new();

    for text in member_texts {
        let terms: AHashSet<String> = tokenize(text)
            .into_iter()
            .filter(|term| term.chars().count() > MIN_TERM_LENGTH)
            .collect();
        for term in terms {
            *document_frequency.entry(term).or_insert(0) += 1;
        }
    }

    let member_count = member_texts.len().max(1) as f32;
    let mut ranked: Vec<(String, f32)> = document_frequency
        .into_iter()
        .map(|(term, frequency)| (term, frequency as f32 / member_count))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked.truncate(DETAILED_KEYWORDS);

    let detailed: Vec<String> = ranked.iter().map(|(term, _)| term.clone()).collect();
    let short_label = if detailed.is_empty() {
        EMPTY_LABEL.to_string()
    } else {
        detailed
            .iter()
            .take(SHORT_LABEL_KEYWORDS)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    };

    ClusterKeywords {
        detailed,
        scored: ranked,
        short_label,
    }
}
