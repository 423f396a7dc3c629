//! Multi-sample enrollment: one representative vector per employee.

use crate::matcher::MatchError;
use crate::types::Embedding;

/// Elementwise mean of an employee's enrolled embeddings.
///
/// A single sample is returned unchanged. The mean is accumulated in f64,
/// so averaging identical samples reproduces them exactly. The result carries
/// the model version of the first sample.
pub fn aggregate(samples: &[Embedding]) -> Result<Embedding, MatchError> {
    let (first, rest) = samples.split_first().ok_or(MatchError::EmptyAggregate)?;
    if rest.is_empty() {
        return Ok(first.clone());
    }

    let dim = first.dim();
    let mut sums = vec![0.0f64; dim];
    for sample in samples {
        if sample.dim() != dim {
            return Err(MatchError::DimensionMismatch {
                expected: dim,
                found: sample.dim(),
            });
        }
        for (sum, v) in sums.iter_mut().zip(sample.values.iter()) {
            *sum += f64::from(*v);
        }
    }

    let n = samples.len() as f64;
    Ok(Embedding {
        values: sums.into_iter().map(|s| (s / n) as f32).collect(),
        model_version: first.model_version.clone(),
    })
}
