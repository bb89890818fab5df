//! Iterative geometric-median solver (Weiszfeld's algorithm) over a matrix
//! of flattened client update vectors.

/// Result of a Weiszfeld run: the geometric median and how many iterations
/// it took to converge (or the iteration cap if it never did).
#[derive(Debug, Clone, PartialEq)]
pub struct WeiszfeldResult {
    pub median: Vec<f32>,
    pub iterations: u32,
}

/// Inverse-distance weighted fixed point iteration, starting from the
/// column-wise arithmetic mean. `points` is row-major: `points[i]` is the
/// i-th client's D-dimensional vector.
pub fn geometric_median(points: &[Vec<f32>], max_iter: u32, eps: f32) -> WeiszfeldResult {
    assert!(!points.is_empty(), "geometric_median requires at least one point");

    if points.len() == 1 {
        return WeiszfeldResult {
            median: points[0].clone(),
            iterations: 0,
        };
    }

    let dim = points[0].len();
    let mut y = column_mean(points, dim);

    for t in 1..=max_iter {
        let distances: Vec<f32> = points.iter().map(|p| euclidean(&y, p)).collect();
        let weights: Vec<f32> = distances
            .iter()
            .map(|&d| if d > 1e-12 { 1.0 / d } else { 1e12 })
            .collect();

        let weight_sum: f32 = weights.iter().sum();
        let mut next = vec![0.0f32; dim];
        for (point, &w) in points.iter().zip(weights.iter()) {
            for (acc, &v) in next.iter_mut().zip(point.iter()) {
                *acc += w * v;
            }
        }
        for v in next.iter_mut() {
            *v /= weight_sum;
        }

        let shift = euclidean(&next, &y);
        y = next;
        if shift < eps {
            return WeiszfeldResult {
                median: y,
                iterations: t,
            };
        }
    }

    WeiszfeldResult {
        median: y,
        iterations: max_iter,
    }
}

fn column_mean(points: &[Vec<f32>], dim: usize) -> Vec<f32> {
    let mut mean = vec![0.0f32; dim];
    for point in points {
        for (acc, &v) in mean.iter_mut().zip(point.iter()) {
            *acc += v;
        }
    }
    let n = points.len() as f32;
    for v in mean.iter_mut() {
        *v /= n;
    }
    mean
}

pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
