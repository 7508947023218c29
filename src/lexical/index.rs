//! In-memory inverted index with BM25 scoring.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{CartographError, Result};
use crate::lexical::analyzer::tokenize;

/// BM25 parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f32,
    /// Length normalization.
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

/// A scored lexical hit.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    /// Entry id.
    pub id: String,
    /// BM25 score.
    pub score: f32,
}

/// Inverted index over a fixed entry set.
///
/// Postings map each term to `(entry ordinal, term frequency)` pairs in
/// insertion order; per-entry token counts and the collection average feed
/// BM25 length normalization. The index is rebuilt wholesale on any id-set
/// change, together with its vector sibling.
#[derive(Debug, Clone, Default)]
pub struct LexicalIndex {
    ids: Vec<String>,
    postings: AHashMap<String, Vec<(u32, u32)>>,
    entry_lengths: Vec<u32>,
    avg_entry_length: f32,
    params: Bm25Params,
}

impl LexicalIndex {
    /// Build an index over `(id, text)` entries.
    pub fn build(entries: &[(String, String)]) -> Result<Self> {
        Self::build_with_params(entries, Bm25Params::default())
    }

    /// Build with explicit BM25 parameters.
    pub fn build_with_params(entries: &[(String, String)], params: Bm25Params) -> Result<Self> {
        let mut ids = Vec::with_capacity(entries.len());
        let mut postings: AHashMap<String, Vec<(u32, u32)>> = AHashMap::new();
        let mut entry_lengths = Vec::with_capacity(entries.len());

        for (ordinal, (id, text)) in entries.iter().enumerate() {
            if id.is_empty() {
                return Err(CartographError::index("empty entry id"));
            }
            let tokens = tokenize(text);
            entry_lengths.push(tokens.len() as u32);

            let mut frequencies: AHashMap<String, u32> = AHashMap::new();
            for token in tokens {
                *frequencies.entry(token).or_insert(0) += 1;
            }
            for (term, frequency) in frequencies {
                postings
                    .entry(term)
                    .or_default()
                    .push((ordinal as u32, frequency));
            }
            ids.push(id.clone());
        }

        // Postings must be ordinal-sorted for deterministic accumulation.
        for list in postings.values_mut() {
            list.sort_by_key(|(ordinal, _)| *ordinal);
        }

        let avg_entry_length = if entry_lengths.is_empty() {
            0.0
        } else {
            entry_lengths.iter().sum::<u32>() as f32 / entry_lengths.len() as f32
        };

        Ok(Self {
            ids,
            postings,
            entry_lengths,
            avg_entry_length,
            params,
        })
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Search with BM25, returning the top `k` entries in descending score
    /// order. Ties break by insertion order.
    pub fn search(&self, query: &str, k: usize) -> Vec<LexicalHit> {
        if k == 0 || self.ids.is_empty() {
            return Vec::new();
        }

        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Vec::new();
        }

        let total = self.ids.len() as f32;
        let mut scores: AHashMap<u32, f32> = AHashMap::new();

        for term in &query_terms {
            let Some(list) = self.postings.get(term) else {
                continue;
            };
            let df = list.len() as f32;
            let idf = (1.0 + (total - df + 0.5) / (df + 0.5)).ln();

            for &(ordinal, tf) in list {
                let tf = tf as f32;
                let entry_len = self.entry_lengths[ordinal as usize] as f32;
                let norm = if self.avg_entry_length > 0.0 {
                    entry_len / self.avg_entry_length
                } else {
                    1.0
                };
                let tf_component = (tf * (self.params.k1 + 1.0))
                    / (tf + self.params.k1 * (1.0 - self.params.b + self.params.b * norm));
                *scores.entry(ordinal).or_insert(0.0) += idf * tf_component;
            }
        }

        let mut hits: Vec<(u32, f32)> = scores.into_iter().collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(k);

        hits.into_iter()
            .map(|(ordinal, score)| LexicalHit {
                id: self.ids[ordinal as usize].clone(),
                score,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(texts: &[(&str, &str)]) -> Vec<(String, String)> {
        texts
            .iter()
            .map(|(id, text)| (id.to_string(), text.to_string()))
            .collect()
    }

    #[test]
    fn test_term_frequency_ranks_higher() {
        let index = LexicalIndex::build(&entries(&[
            ("d1", "rust rust rust language"),
            ("d2", "rust language tutorial"),
            ("d3", "python language tutorial"),
        ]))
        .unwrap();

        let hits = index.search("rust", 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "d1");
        assert_eq!(hits[1].id, "d2");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_rare_terms_outweigh_common_ones() {
        let index = LexicalIndex::build(&entries(&[
            ("d1", "storage engine compaction"),
            ("d2", "storage engine flush"),
            ("d3", "storage engine merge"),
            ("d4", "quorum election storage"),
        ]))
        .unwrap();

        // "quorum" is rarer than "storage", so d4 wins a mixed query.
        let hits = index.search("storage quorum", 1);
        assert_eq!(hits[0].id, "d4");
    }

    #[test]
    fn test_ties_break_by_insertion_order() {
        let index = LexicalIndex::build(&entries(&[
            ("d1", "identical text body"),
            ("d2", "identical text body"),
        ]))
        .unwrap();

        let hits = index.search("identical body", 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "d1");
        assert!((hits[0].score - hits[1].score).abs() < 1e-6);
    }

    #[test]
    fn test_unmatched_and_empty_queries() {
        let index = LexicalIndex::build(&entries(&[("d1", "some body")])).unwrap();
        assert!(index.search("zebra", 10).is_empty());
        assert!(index.search("", 10).is_empty());
        assert!(index.search("the and of", 10).is_empty());
    }

    #[test]
    fn test_idf_stays_positive_for_ubiquitous_terms() {
        let index = LexicalIndex::build(&entries(&[
            ("d1", "shared token alpha"),
            ("d2", "shared token beta"),
            ("d3", "shared token gamma"),
        ]))
        .unwrap();

        let hits = index.search("shared", 10);
        assert_eq!(hits.len(), 3);
        for hit in hits {
            assert!(hit.score > 0.0);
        }
    }

    #[test]
    fn test_empty_id_rejected() {
        assert!(LexicalIndex::build(&entries(&[("", "text")])).is_err());
    }
}
