//! The plugin contract a benchmark harness drives.
//!
//! A harness constructs a backend with a fixed dimension, opens a session
//! with [`VectorDb::init`], and then calls the insert, search and optimize
//! operations inside that session. The session releases the connection
//! when it goes out of scope, whichever way the scope is left.

use crate::error::Result;
use crate::vector::Similarity;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// Distance metric requested by a benchmark case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricType {
    L2,
    IP,
    #[serde(rename = "COSINE")]
    Cosine,
}

impl MetricType {
    pub fn similarity(&self) -> Similarity {
        match self {
            MetricType::L2 => Similarity::Euclidean,
            MetricType::IP => Similarity::DotProduct,
            MetricType::Cosine => Similarity::Cosine,
        }
    }
}

/// Search-time filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// Only match documents whose id is strictly greater than the value
    IdGreaterThan(i64),
}

pub trait VectorDb {
    /// Acquire the connection if none is held. Reuses a held connection.
    fn connect(&mut self) -> Result<()>;

    /// Release the connection. Does nothing when not connected.
    fn disconnect(&mut self);

    /// Connect and return a guard that disconnects when dropped.
    fn init(&mut self) -> Result<Session<'_, Self>>
    where
        Self: Sized,
    {
        self.connect()?;
        Ok(Session { db: self })
    }

    /// Whether the harness must L2-normalize vectors for cosine cases.
    fn need_normalize_cosine(&self) -> bool;

    /// Insert `embeddings[i]` under `ids[i]`. Returns the number inserted.
    fn insert_embeddings(&mut self, embeddings: &[Vec<f32>], ids: &[i64]) -> Result<usize>;

    /// Ids of the `k` nearest neighbours of `query`, best first.
    fn search_embedding(&self, query: &[f32], k: usize, filter: Option<&Filter>) -> Result<Vec<i64>>;

    /// Build whatever the backend needs before searching.
    fn optimize(&mut self) -> Result<()>;

    fn optimize_with_size(&mut self, _data_size: usize) -> Result<()> {
        Ok(())
    }

    fn ready_to_load(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Scoped connection returned by [`VectorDb::init`].
pub struct Session<'a, D: VectorDb> {
    db: &'a mut D,
}

impl<D: VectorDb> Deref for Session<'_, D> {
    type Target = D;

    fn deref(&self) -> &D {
        self.db
    }
}

impl<D: VectorDb> DerefMut for Session<'_, D> {
    fn deref_mut(&mut self) -> &mut D {
        self.db
    }
}

impl<D: VectorDb> Drop for Session<'_, D> {
    fn drop(&mut self) {
        self.db.disconnect();
    }
}
