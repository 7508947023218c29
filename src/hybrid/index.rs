//! The hybrid index tying vector and lexical retrieval to one entry set.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::document::Metadata;
use crate::error::{CartographError, Result};
use crate::lexical::index::{LexicalHit, LexicalIndex};
use crate::vector::index::{FlatVectorIndex, VectorHit};

/// One indexed entry: id, text, vector, and carried metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridEntry {
    /// Entry id, shared by both sub-indices.
    pub id: String,
    /// Text indexed on the lexical side.
    pub text: String,
    /// Vector indexed on the vector side.
    pub vector: Vec<f32>,
    /// Metadata returned with hits.
    #[serde(default)]
    pub metadata: Metadata,
}

/// Vector and lexical sub-indices built over the identical id set.
///
/// Both sides are rebuilt together on any id-set change; a build stamps both
/// with the same epoch, and searching a side whose sibling carries a
/// different epoch is an error rather than a silently stale answer.
#[derive(Debug, Clone, Default)]
pub struct HybridIndex {
    entries: Vec<HybridEntry>,
    by_id: AHashMap<String, usize>,
    vector_index: FlatVectorIndex,
    lexical_index: LexicalIndex,
    vector_epoch: u64,
    lexical_epoch: u64,
}

impl HybridIndex {
    /// Build both sub-indices from one entry set.
    pub fn build(entries: Vec<HybridEntry>) -> Result<Self> {
        let mut by_id = AHashMap::with_capacity(entries.len());
        for (ordinal, entry) in entries.iter().enumerate() {
            if by_id.insert(entry.id.clone(), ordinal).is_some() {
                return Err(CartographError::consistency(format!(
                    "duplicate entry id '{}'",
                    entry.id
                )));
            }
        }

        let ids: Vec<String> = entries.iter().map(|entry| entry.id.clone()).collect();
        let vectors: Vec<Vec<f32>> = entries.iter().map(|entry| entry.vector.clone()).collect();
        let vector_index = FlatVectorIndex::build(ids, vectors)?;

        let texts: Vec<(String, String)> = entries
            .iter()
            .map(|entry| (entry.id.clone(), entry.text.clone()))
            .collect();
        let lexical_index = LexicalIndex::build(&texts)?;

        Ok(Self {
            entries,
            by_id,
            vector_index,
            lexical_index,
            vector_epoch: 1,
            lexical_epoch: 1,
        })
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dimensionality of the vector side (0 when empty).
    pub fn dimension(&self) -> usize {
        self.vector_index.dimension()
    }

    /// The entry for an id, if present.
    pub fn entry(&self, id: &str) -> Option<&HybridEntry> {
        self.by_id.get(id).map(|ordinal| &self.entries[*ordinal])
    }

    /// All entry ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.id.as_str())
    }

    /// Search the vector side.
    pub fn vector_search(&self, query: &[f32], k: usize, min_score: f32) -> Result<Vec<VectorHit>> {
        self.check_siblings()?;
        self.vector_index.search(query, k, min_score)
    }

    /// Search the lexical side.
    pub fn lexical_search(&self, query: &str, k: usize) -> Result<Vec<LexicalHit>> {
        self.check_siblings()?;
        Ok(self.lexical_index.search(query, k))
    }

    fn check_siblings(&self) -> Result<()> {
        if self.vector_epoch != self.lexical_epoch {
            return Err(CartographError::index(
                "vector and lexical sides were not rebuilt together",
            ));
        }
        Ok(())
    }

    #[cfg(test)]
    fn desync_for_test(&mut self) {
        self.vector_epoch += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries() -> Vec<HybridEntry> {
        vec![
            HybridEntry {
                id: "a".to_string(),
                text: "rust search library".to_string(),
                vector: vec![1.0, 0.0],
                metadata: Metadata::new(),
            },
            HybridEntry {
                id: "b".to_string(),
                text: "python data tools".to_string(),
                vector: vec![0.0, 1.0],
                metadata: Metadata::new(),
            },
        ]
    }

    #[test]
    fn test_both_sides_cover_the_same_ids() {
        let index = HybridIndex::build(entries()).unwrap();

        let vector_hits = index.vector_search(&[1.0, 0.0], 10, f32::MIN).unwrap();
        let lexical_hits = index.lexical_search("rust library", 10).unwrap();

        assert_eq!(vector_hits.len(), 2);
        assert_eq!(lexical_hits.len(), 1);
        assert_eq!(vector_hits[0].id, "a");
        assert_eq!(lexical_hits[0].id, "a");
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut dup = entries();
        dup[1].id = "a".to_string();
        assert!(HybridIndex::build(dup).is_err());
    }

    #[test]
    fn test_stale_sibling_is_an_error() {
        let mut index = HybridIndex::build(entries()).unwrap();
        index.desync_for_test();

        assert!(index.vector_search(&[1.0, 0.0], 10, 0.0).is_err());
        assert!(index.lexical_search("rust", 10).is_err());
    }

    #[test]
    fn test_entry_lookup() {
        let index = HybridIndex::build(entries()).unwrap();
        assert_eq!(index.entry("b").map(|e| e.text.as_str()), Some("python data tools"));
        assert!(index.entry("zzz").is_none());
    }
}
