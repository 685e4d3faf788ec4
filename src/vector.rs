//! This is the vector math module
//! Provide L2 normalization, dot product, euclidean distance and the
//! Atlas similarity scores built on them

use crate::error::{Error, Result};

/// L2 Normalization
/// norm_vec = vec / ||vec||
/// Zero vector cannot be normalized
pub fn l2_norm(vector: &[f32]) -> Result<Vec<f32>> {
    if vector.is_empty() {
        return Err(Error::InvalidVector("cannot normalize an empty vector"));
    }

    let norm = vector.iter()
        .map(|x| x * x)
        .sum::<f32>()
        .sqrt();

    if norm == 0.0 {
        return Err(Error::InvalidVector("cannot normalize a zero vector"));
    }

    Ok(vector.iter().map(|x| x / norm).collect())
}

/// Dot Product
/// dot_prod = sum(a[i] * b[i]) for i = 0..a.len()
/// Can only process vectors with same dimensions
pub fn dot_product(left: &[f32], right: &[f32]) -> Result<f32> {
    check_dimensions(left, right)?;

    Ok(left.iter()
        .zip(right.iter())
        .map(|(x, y)| x * y)
        .sum())
}

/// Euclidean Distance
/// dist = sqrt(sum((a[i] - b[i])^2))
pub fn euclidean_distance(left: &[f32], right: &[f32]) -> Result<f32> {
    check_dimensions(left, right)?;

    Ok(left.iter()
        .zip(right.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt())
}

fn check_dimensions(left: &[f32], right: &[f32]) -> Result<()> {
    if left.len() != right.len() {
        return Err(Error::DimensionMismatch { expected: left.len(), actual: right.len() });
    }
    Ok(())
}

/// Similarity functions understood by a `vectorSearch` index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Similarity {
    Euclidean,
    DotProduct,
    Cosine,
}

impl Similarity {
    /// Name used in index definitions.
    pub fn as_str(&self) -> &'static str {
        match self {
            Similarity::Euclidean => "euclidean",
            Similarity::DotProduct => "dotProduct",
            Similarity::Cosine => "cosine",
        }
    }

    pub fn parse(name: &str) -> Option<Similarity> {
        match name {
            "euclidean" => Some(Similarity::Euclidean),
            "dotProduct" => Some(Similarity::DotProduct),
            "cosine" => Some(Similarity::Cosine),
            _ => None,
        }
    }

    /// Score in the range Atlas reports through `vectorSearchScore`.
    /// Higher is always more similar.
    ///
    /// * cosine: `(1 + cos(a, b)) / 2`
    /// * dotProduct: `(1 + a·b) / 2`
    /// * euclidean: `1 / (1 + |a - b|)`
    pub fn score(&self, stored: &[f32], query: &[f32]) -> Result<f32> {
        match self {
            Similarity::Cosine => {
                let cos = dot_product(&l2_norm(stored)?, &l2_norm(query)?)?;
                Ok((1.0 + cos) / 2.0)
            }
            Similarity::DotProduct => Ok((1.0 + dot_product(stored, query)?) / 2.0),
            Similarity::Euclidean => Ok(1.0 / (1.0 + euclidean_distance(stored, query)?)),
        }
    }
}
