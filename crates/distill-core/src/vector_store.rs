//! Dimension-gated in-memory vector index.
//!
//! A [`VectorStore`] maps string ids to fixed-length vectors and answers
//! cosine-similarity queries by brute-force linear scan. There is no
//! approximate index.
//!
//! # State machine
//!
//! ```text
//! Uninitialized ──initialize(d)──▶ Initialized(d)
//!                                   │  initialize(d)  → no-op
//!                                   │  initialize(d2) → ConfigError::DimensionMismatch
//! ```
//!
//! The transition is one way. Switching embedding models means building a
//! fresh store (and purging the persisted vectors of the old model).
//!
//! # Concurrency
//!
//! The store holds no locks. Mutation takes `&mut self` and search takes
//! `&self`; a caller that shares a store across tasks must serialize
//! writers against readers itself. A reader racing a writer behind a
//! caller-provided lock that allows it may observe a partially applied
//! batch of inserts; the pipeline accepts this.

use std::collections::HashMap;

use crate::embedding::cosine_similarity;
use crate::error::{ConfigError, ValidationError};

/// Failure modes of [`VectorStore`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VectorStoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// A single similarity-search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    /// Cosine similarity in `[-1, 1]`. Not clamped.
    pub score: f64,
}

impl VectorHit {
    /// Cosine distance, `1 - score`.
    pub fn distance(&self) -> f64 {
        1.0 - self.score
    }
}

#[derive(Debug)]
struct Entry {
    id: String,
    vector: Vec<f32>,
}

/// In-memory id → vector map with linear-scan cosine search.
#[derive(Debug, Default)]
pub struct VectorStore {
    dims: Option<usize>,
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already initialized to `dims`.
    pub fn with_dimensions(dims: usize) -> Result<Self, ConfigError> {
        let mut store = Self::new();
        store.initialize(dims)?;
        Ok(store)
    }

    /// Fix the store's dimensionality.
    ///
    /// Idempotent for the same `dims`. Any other value after initialization
    /// is a configuration error; vectors are never padded or truncated to
    /// a new size.
    pub fn initialize(&mut self, dims: usize) -> Result<(), ConfigError> {
        if dims == 0 {
            return Err(ConfigError::ZeroDimensions);
        }
        match self.dims {
            None => {
                self.dims = Some(dims);
                Ok(())
            }
            Some(existing) if existing == dims => Ok(()),
            Some(existing) => Err(ConfigError::DimensionMismatch {
                existing,
                requested: dims,
            }),
        }
    }

    /// The initialized dimensionality, if any.
    pub fn dimensions(&self) -> Option<usize> {
        self.dims
    }

    pub fn is_initialized(&self) -> bool {
        self.dims.is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Insert or overwrite the vector for `id`.
    ///
    /// An overwritten id keeps its original insertion position for
    /// tie-breaking.
    pub fn insert(&mut self, id: &str, vector: Vec<f32>) -> Result<(), VectorStoreError> {
        self.checked_dims(vector.len())?;

        match self.index.get(id) {
            Some(&slot) => self.entries[slot].vector = vector,
            None => {
                self.index.insert(id.to_string(), self.entries.len());
                self.entries.push(Entry {
                    id: id.to_string(),
                    vector,
                });
            }
        }
        Ok(())
    }

    /// Remove the vector for `id`. Returns whether it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(slot) = self.index.remove(id) else {
            return false;
        };
        self.entries.remove(slot);
        for entry in &self.entries[slot..] {
            if let Some(i) = self.index.get_mut(&entry.id) {
                *i -= 1;
            }
        }
        true
    }

    /// Return the `limit` most similar vectors to `query`, best first.
    ///
    /// Ties keep insertion order. An empty store returns an empty vector.
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<VectorHit>, VectorStoreError> {
        self.checked_dims(query.len())?;

        let mut hits: Vec<VectorHit> = self
            .entries
            .iter()
            .map(|e| VectorHit {
                id: e.id.clone(),
                score: cosine_similarity(query, &e.vector),
            })
            .collect();

        // sort_by is stable: equal scores stay in insertion order.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    fn checked_dims(&self, len: usize) -> Result<usize, VectorStoreError> {
        let dims = self.dims.ok_or(ConfigError::Uninitialized)?;
        if len != dims {
            return Err(ValidationError::VectorLength {
                expected: dims,
                actual: len,
            }
            .into());
        }
        Ok(dims)
    }
}
