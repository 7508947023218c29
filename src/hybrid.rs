//! Hybrid retrieval: vector and lexical sub-indices over one id set.
//!
//! A [`index::HybridIndex`] owns both retrieval sides and only ever rebuilds
//! them together; [`fusion`] combines their ranked candidate lists into a
//! single deterministic ranking.

pub mod fusion;
pub mod index;
