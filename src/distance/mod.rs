//! Distance metrics for vector similarity computation

pub mod cosine;
pub mod euclidean;
pub mod ip;

pub use cosine::{cosine_distance, cosine_similarity};
pub use euclidean::euclidean_distance;
pub use ip::inner_product_distance;

use serde::{Deserialize, Serialize};

/// Similarity metric selected per VECTOR field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorMetric {
    /// Euclidean distance
    L2,
    /// Inner product distance (1 - dot)
    Ip,
    /// Cosine distance (1 - cosine similarity)
    Cosine,
}

impl VectorMetric {
    /// Compute the distance between two vectors. Smaller is closer
    /// for all three metrics.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            VectorMetric::L2 => euclidean_distance(a, b),
            VectorMetric::Ip => inner_product_distance(a, b),
            VectorMetric::Cosine => cosine_distance(a, b),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VectorMetric::L2 => "L2",
            VectorMetric::Ip => "IP",
            VectorMetric::Cosine => "COSINE",
        }
    }
}
