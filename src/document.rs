//! Core data model: documents, chunks, and typed metadata.
//!
//! A [`Document`] is the unit of ingestion; a [`Chunk`] is an overlapping
//! passage derived from one document. Chunk ids are a pure function of the
//! parent id and the chunk position, so re-chunking the same text yields the
//! same ids. Metadata is a typed scalar map rather than arbitrary JSON: the
//! derived fields written after clustering (cluster id, probability,
//! keywords) all fit the closed scalar set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single typed metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// A string value.
    String(String),
    /// A numeric value.
    Number(f64),
    /// A boolean value.
    Bool(bool),
    /// An explicit null.
    Null,
}

impl MetadataValue {
    /// The string payload, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The numeric payload, if this is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Number(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Number(value as f64)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

/// Typed metadata attached to documents and chunks.
///
/// A `BTreeMap` keeps serialized output stable across runs.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A document as ingested. The id is stable for the dataset lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable document id.
    pub id: String,
    /// Full document text.
    pub text: String,
    /// Typed metadata; gains derived cluster fields after clustering.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// Create a new document with empty metadata.
    pub fn new<I: Into<String>, T: Into<String>>(id: I, text: T) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    /// Add a metadata entry (builder style).
    pub fn with_metadata<K: Into<String>, V: Into<MetadataValue>>(mut self, key: K, value: V) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// An overlapping passage derived from one parent document.
///
/// Every chunk's `parent_id` references exactly one [`Document`]; the
/// chunk-to-parent map maintained by the chunker is a total function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Derived id, `{parent_id}_chunk_{position}`.
    pub id: String,
    /// Id of the parent document.
    pub parent_id: String,
    /// Ordinal of this chunk within its parent.
    pub position: usize,
    /// Passage text.
    pub text: String,
    /// Typed metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Chunk {
    /// Create a chunk with the derived id for (`parent_id`, `position`).
    pub fn new<T: Into<String>>(parent_id: &str, position: usize, text: T) -> Self {
        Self {
            id: chunk_id(parent_id, position),
            parent_id: parent_id.to_string(),
            position,
            text: text.into(),
            metadata: Metadata::new(),
        }
    }
}

/// Derived chunk id: `{parent_id}_chunk_{position}`.
///
/// Deterministic, so re-chunking identical input is idempotent.
pub fn chunk_id(parent_id: &str, position: usize) -> String {
    format!("{parent_id}_chunk_{position}")
}
