//! The dashboard's own per-client trust-score service: a sigma-based
//! z-score, distinct from the orchestrator's `1/(1+d)` formula in
//! `federated_learning::aggregator::trust_score`. Both are kept as
//! separate implementations rather than reconciled into one.

const STD_DEV_FLOOR: f32 = 0.001;
const DEVIATION_SCALE: f32 = 5.0;
const FLAG_THRESHOLD: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrustAssessment {
    pub score: f32,
    pub deviation: f32,
    pub is_flagged: bool,
}

/// `deviation = |client_distance - mean(distances)| / stddev(distances)`
/// (stddev floored at 0.001); `score = clamp(1 - deviation / 5, 0, 1)`;
/// flagged when `deviation > 2.0`. If `distances` is empty, returns a
/// perfect, unflagged score -- there is nothing to compare against.
pub fn compute_trust_score(client_distance: f32, distances: &[f32]) -> TrustAssessment {
    if distances.is_empty() {
        return TrustAssessment {
            score: 1.0,
            deviation: 0.0,
            is_flagged: false,
        };
    }

    let mean = distances.iter().sum::<f32>() / distances.len() as f32;
    let variance = distances.iter().map(|d| (d - mean).powi(2)).sum::<f32>() / distances.len() as f32;
    let std_dev = variance.sqrt().max(STD_DEV_FLOOR);

    let deviation = (client_distance - mean).abs() / std_dev;
    let score = (1.0 - deviation / DEVIATION_SCALE).clamp(0.0, 1.0);
    let is_flagged = deviation > FLAG_THRESHOLD;

    TrustAssessment {
        score: round4(score),
        deviation: round4(deviation),
        is_flagged,
    }
}

fn round4(value: f32) -> f32 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_distances_yields_perfect_unflagged_score() {
        let result = compute_trust_score(0.5, &[]);
        assert_eq!(result.score, 1.0);
        assert!(!result.is_flagged);
    }

    #[test]
    fn typical_client_is_not_flagged() {
        let distances = [0.1, 0.12, 0.11, 0.09];
        let result = compute_trust_score(0.11, &distances);
        assert!(!result.is_flagged);
        assert!(result.score > 0.5);
    }

    #[test]
    fn outlier_client_is_flagged() {
        let distances = [0.1, 0.12, 0.11, 0.09, 5.0];
        let result = compute_trust_score(5.0, &distances);
        assert!(result.is_flagged);
    }
}
