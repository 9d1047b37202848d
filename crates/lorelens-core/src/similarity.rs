//! Vector similarity functions used to score query vectors against document chunks.

use serde::{Deserialize, Serialize};

/// Default exponent applied to the norm ratio when the query is the shorter vector.
pub const DEFAULT_QUERY_BOOST_FACTOR: f32 = 1.2;

/// How a single query vector is compared to a single chunk vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Similarity {
    /// Plain cosine similarity.
    Cosine,
    /// Squared cosine scaled by the norm ratio; see [`length_normalized_similarity`].
    LengthNormalized { query_boost_factor: f32 },
}

impl Default for Similarity {
    fn default() -> Self {
        Similarity::LengthNormalized {
            query_boost_factor: DEFAULT_QUERY_BOOST_FACTOR,
        }
    }
}

impl Similarity {
    pub fn score(&self, query: &[f32], chunk: &[f32]) -> f32 {
        match *self {
            Similarity::Cosine => cosine_similarity(query, chunk),
            Similarity::LengthNormalized { query_boost_factor } => {
                length_normalized_similarity(query, chunk, query_boost_factor)
            }
        }
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Dot product over the product of norms. Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    cosine_with_norms(a, b, norm(a), norm(b))
}

fn cosine_with_norms(a: &[f32], b: &[f32], norm_a: f32, norm_b: f32) -> f32 {
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (norm_a * norm_b)
}

/// `cos² · (min(|q|,|d|) / max(|q|,|d|))^e` where `e` is `query_boost_factor`
/// when the query is shorter than the document vector and `1` otherwise.
///
/// Squaring drops the sign of the cosine, so opposed vectors score like aligned
/// ones of the same angle magnitude. Returns 0.0 if either vector has zero magnitude.
pub fn length_normalized_similarity(query: &[f32], doc: &[f32], query_boost_factor: f32) -> f32 {
    let norm_q = norm(query);
    let norm_d = norm(doc);
    if norm_q == 0.0 || norm_d == 0.0 {
        return 0.0;
    }
    let cos = cosine_with_norms(query, doc, norm_q, norm_d);
    let direction = cos * cos;
    let ratio = norm_q.min(norm_d) / norm_q.max(norm_d);
    let exponent = if norm_q < norm_d { query_boost_factor } else { 1.0 };
    direction * ratio.powf(exponent)
}

/// Blends the best and the mean of `scores`: `max · max_weight + avg · (1 - max_weight)`.
/// Returns 0.0 for an empty slice.
pub fn blend(scores: &[f32], max_weight: f32) -> f32 {
    if scores.is_empty() {
        return 0.0;
    }
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let avg = scores.iter().sum::<f32>() / scores.len() as f32;
    max * max_weight + avg * (1.0 - max_weight)
}
