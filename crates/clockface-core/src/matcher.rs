//! Nearest-neighbour identity matching by cosine distance.

use crate::types::{Embedding, EmployeeId};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("embedding dimension mismatch: expected {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("zero-norm or non-finite embedding cannot be compared")]
    DegenerateVector,
    #[error("cannot aggregate an empty set of embeddings")]
    EmptyAggregate,
}

/// Reject vectors that cannot yield a meaningful distance: any NaN or
/// infinite component, or a zero norm.
pub fn ensure_comparable(embedding: &Embedding) -> Result<(), MatchError> {
    if !embedding.is_finite() || embedding.norm() == 0.0 {
        return Err(MatchError::DegenerateVector);
    }
    Ok(())
}

/// Cosine distance `1 - cos(a, b)`, in [0, 2]. Lower = more similar.
///
/// Zero-norm and non-finite inputs are rejected instead of producing NaN.
pub fn cosine_distance(a: &Embedding, b: &Embedding) -> Result<f32, MatchError> {
    if !a.is_finite() || !b.is_finite() {
        return Err(MatchError::DegenerateVector);
    }
    if a.dim() != b.dim() {
        return Err(MatchError::DimensionMismatch {
            expected: a.dim(),
            found: b.dim(),
        });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.values.iter().zip(b.values.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(MatchError::DegenerateVector);
    }

    let similarity = (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0);
    Ok((1.0 - similarity) as f32)
}

/// Display similarity for a distance, clamped to [-1, 1].
///
/// An empty gallery yields an infinite distance, which maps to -1.
pub fn similarity_from_distance(distance: f32) -> f32 {
    (1.0 - distance).clamp(-1.0, 1.0)
}

/// Result of matching a probe against a gallery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestMatch {
    /// Accepted identity, only set when `distance < threshold`.
    pub employee_id: Option<EmployeeId>,
    /// Distance of the closest candidate, reported even on rejection.
    /// `f32::INFINITY` when the gallery is empty.
    pub distance: f32,
}

impl BestMatch {
    pub fn none() -> Self {
        Self {
            employee_id: None,
            distance: f32::INFINITY,
        }
    }

    pub fn similarity(&self) -> f32 {
        similarity_from_distance(self.distance)
    }
}

/// Strategy for comparing a probe embedding against a gallery of enrolled identities.
pub trait Matcher {
    fn find_best_match(
        &self,
        probe: &Embedding,
        candidates: &BTreeMap<EmployeeId, Embedding>,
        threshold: f32,
    ) -> Result<BestMatch, MatchError>;
}

/// Cosine distance matcher.
///
/// Scans the whole gallery in ascending employee id order. Only a strictly
/// closer candidate replaces the current best, so ties go to the lowest id.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn find_best_match(
        &self,
        probe: &Embedding,
        candidates: &BTreeMap<EmployeeId, Embedding>,
        threshold: f32,
    ) -> Result<BestMatch, MatchError> {
        if candidates.is_empty() {
            return Ok(BestMatch::none());
        }
        ensure_comparable(probe)?;

        let mut best_dist = f32::INFINITY;
        let mut best_id: Option<EmployeeId> = None;

        for (id, candidate) in candidates {
            let dist = cosine_distance(probe, candidate)?;
            if best_id.is_none() || dist < best_dist {
                best_dist = dist;
                best_id = Some(*id);
            }
        }

        tracing::debug!(
            best = ?best_id,
            distance = best_dist,
            threshold,
            gallery = candidates.len(),
            "matcher scanned gallery"
        );

        Ok(BestMatch {
            employee_id: best_id.filter(|_| best_dist < threshold),
            distance: best_dist,
        })
    }
}
