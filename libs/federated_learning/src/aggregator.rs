//! Drives flatten/unflatten (C1) and the Weiszfeld geometric median (C2)
//! over a list of client body updates, and reports per-client Euclidean
//! distances to the resulting median.

use crate::weiszfeld::{euclidean, geometric_median};
use rayon::prelude::*;
use tensor::{flatten, unflatten, NamedTensorMap, TensorError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregatorError {
    #[error("aggregator received no client updates")]
    EmptyInput,
    #[error(transparent)]
    Shape(#[from] TensorError),
}

/// Default Weiszfeld parameters per spec.
pub const DEFAULT_MAX_ITER: u32 = 100;
pub const DEFAULT_EPS: f32 = 1e-5;

/// Stateless except for `last_iterations`, which records the iteration
/// count of the most recent `aggregate` call. Not reentrant: a single
/// instance must not be shared across concurrent aggregation calls.
pub struct Aggregator {
    max_iter: u32,
    eps: f32,
    last_iterations: Option<u32>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Aggregator {
            max_iter: DEFAULT_MAX_ITER,
            eps: DEFAULT_EPS,
            last_iterations: None,
        }
    }
}

impl Aggregator {
    pub fn new(max_iter: u32, eps: f32) -> Self {
        Aggregator {
            max_iter,
            eps,
            last_iterations: None,
        }
    }

    pub fn last_iterations(&self) -> Option<u32> {
        self.last_iterations
    }

    /// Flatten every update with the first update's key order, run the
    /// Weiszfeld solver, and unflatten the resulting median back into a
    /// named-tensor map.
    #[tracing::instrument(skip(self, updates), fields(n = updates.len()))]
    pub fn aggregate(&mut self, updates: &[NamedTensorMap]) -> Result<NamedTensorMap, AggregatorError> {
        let Some(reference) = updates.first() else {
            return Err(AggregatorError::EmptyInput);
        };

        if updates.len() == 1 {
            self.last_iterations = Some(0);
            return Ok(reference.clone());
        }

        tensor::assert_shapes_match(updates)?;
        let keys: Vec<String> = reference.keys().cloned().collect();
        let shapes: Vec<Vec<usize>> = keys.iter().map(|k| reference[k].shape.clone()).collect();

        let points: Vec<Vec<f32>> = updates
            .par_iter()
            .map(|u| flatten(u, &keys))
            .collect::<Result<_, _>>()?;

        let result = geometric_median(&points, self.max_iter, self.eps);
        self.last_iterations = Some(result.iterations);

        Ok(unflatten(&result.median, &keys, &shapes)?)
    }

    /// Euclidean distance of each client's flattened update to `median`, in
    /// input order. Empty input yields an empty distance list; a single
    /// input yields a zero distance.
    pub fn compute_distances(
        &self,
        updates: &[NamedTensorMap],
        median: &NamedTensorMap,
    ) -> Result<Vec<f32>, AggregatorError> {
        if updates.is_empty() {
            return Ok(Vec::new());
        }
        if updates.len() == 1 {
            return Ok(vec![0.0]);
        }

        let keys: Vec<String> = median.keys().cloned().collect();
        let median_flat = flatten(median, &keys)?;

        updates
            .par_iter()
            .map(|u| flatten(u, &keys).map(|flat| euclidean(&flat, &median_flat)))
            .collect::<Result<_, _>>()
            .map_err(AggregatorError::from)
    }
}

/// `trust_i = 1 / (1 + d_i)`; flagged when `trust_i < 0.3`. This is the
/// orchestrator's own formula; the dashboard-facade service uses a
/// different, sigma-based one (see `dashboard_facade::trust`).
pub fn trust_score(distance: f32) -> (f32, bool) {
    let score = 1.0 / (1.0 + distance);
    (score, score < 0.3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensor::Tensor;

    fn body_with(p: [f32; 2]) -> NamedTensorMap {
        let mut m = NamedTensorMap::new();
        m.insert("p".to_string(), Tensor::new(vec![2], p.to_vec()).unwrap());
        m
    }

    #[test]
    fn empty_input_errors() {
        let mut agg = Aggregator::default();
        assert!(matches!(agg.aggregate(&[]), Err(AggregatorError::EmptyInput)));
    }

    #[test]
    fn single_input_is_returned_unchanged() {
        let mut agg = Aggregator::default();
        let update = body_with([1.0, 2.0]);
        let result = agg.aggregate(&[update.clone()]).unwrap();
        assert_eq!(result, update);
        assert_eq!(agg.last_iterations(), Some(0));
    }

    #[test]
    fn known_geometric_median_scenario() {
        let mut agg = Aggregator::default();
        let updates = vec![
            body_with([0.0, 0.0]),
            body_with([1.0, 0.0]),
            body_with([0.0, 1.0]),
        ];
        let median = agg.aggregate(&updates).unwrap();
        let p = &median["p"].data;
        assert!((p[0] - 0.3113).abs() < 0.01);
        assert!((p[1] - 0.3113).abs() < 0.01);
    }

    #[test]
    fn identical_points_have_near_zero_distances() {
        let mut agg = Aggregator::default();
        let updates = vec![body_with([5.0, 5.0]); 3];
        let median = agg.aggregate(&updates).unwrap();
        let distances = agg.compute_distances(&updates, &median).unwrap();
        assert!(distances.iter().all(|&d| d <= 1e-3));
    }

    #[test]
    fn distances_are_finite_and_same_length() {
        let mut agg = Aggregator::default();
        let updates = vec![body_with([0.0, 0.0]), body_with([3.0, 4.0]), body_with([-1.0, 2.0])];
        let median = agg.aggregate(&updates).unwrap();
        let distances = agg.compute_distances(&updates, &median).unwrap();
        assert_eq!(distances.len(), updates.len());
        assert!(distances.iter().all(|d| d.is_finite() && *d >= 0.0));
    }

    #[test]
    fn trust_score_matches_scenario() {
        let (score, flagged) = trust_score(0.1);
        assert!((score - 0.909).abs() < 0.01);
        assert!(!flagged);

        let (score, flagged) = trust_score(5.0);
        assert!((score - 0.167).abs() < 0.01);
        assert!(flagged);
    }

    #[test]
    fn shape_mismatch_is_reported() {
        let mut agg = Aggregator::default();
        let mut mismatched = NamedTensorMap::new();
        mismatched.insert("p".to_string(), Tensor::new(vec![3], vec![1.0, 2.0, 3.0]).unwrap());
        let updates = vec![body_with([0.0, 0.0]), mismatched];
        assert!(matches!(agg.aggregate(&updates), Err(AggregatorError::Shape(_))));
    }
}
