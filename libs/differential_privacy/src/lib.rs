//! Gaussian mechanism for (epsilon, delta)-differential privacy over named
//! tensor maps: per-tensor L2 clipping, calibrated noise injection, and an
//! advanced-composition privacy accountant for multi-round budgets.

use rand::thread_rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tensor::{NamedTensorMap, Tensor};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DpError {
    #[error("epsilon must be positive, got {0}")]
    InvalidEpsilon(f64),
    #[error("delta must be in (0, 1), got {0}")]
    InvalidDelta(f64),
}

/// Configuration for the Gaussian mechanism. Mirrors the constructor
/// arguments of the per-round DP post-processing step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DpConfig {
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default = "default_delta")]
    pub delta: f64,
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f64,
    #[serde(default = "default_max_grad_norm")]
    pub max_grad_norm: f32,
}

fn default_epsilon() -> f64 {
    1.0
}
fn default_delta() -> f64 {
    1e-5
}
fn default_sensitivity() -> f64 {
    1.0
}
fn default_max_grad_norm() -> f32 {
    1.0
}

impl Default for DpConfig {
    fn default() -> Self {
        DpConfig {
            epsilon: default_epsilon(),
            delta: default_delta(),
            sensitivity: default_sensitivity(),
            max_grad_norm: default_max_grad_norm(),
        }
    }
}

impl DpConfig {
    pub fn validate(&self) -> Result<(), DpError> {
        if self.epsilon <= 0.0 {
            return Err(DpError::InvalidEpsilon(self.epsilon));
        }
        if self.delta <= 0.0 || self.delta >= 1.0 {
            return Err(DpError::InvalidDelta(self.delta));
        }
        Ok(())
    }
}

/// Cumulative privacy loss after composing the mechanism over several
/// rounds, via the advanced composition theorem (Dwork, Rothblum, Vadhan
/// 2010). Rounded to the documented precision for stable comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositionAccounting {
    pub epsilon_total: f64,
    pub delta_total: f64,
    pub num_rounds: u32,
    pub sigma: f64,
}

/// The Gaussian mechanism: per-tensor L2 clipping followed by calibrated
/// IID Gaussian noise, with a fixed single-round sigma computed at
/// construction time.
pub struct GaussianMechanism {
    config: DpConfig,
    sigma: f64,
}

impl GaussianMechanism {
    pub fn new(config: DpConfig) -> Result<Self, DpError> {
        config.validate()?;
        let sigma = compute_sigma(config.sensitivity, config.delta, config.epsilon);
        Ok(GaussianMechanism { config, sigma })
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn config(&self) -> &DpConfig {
        &self.config
    }

    /// Rescale each tensor independently so its L2 norm does not exceed
    /// `max_grad_norm`. Tensors already within bound are left unscaled.
    pub fn clip(&self, map: &NamedTensorMap) -> NamedTensorMap {
        let mut out = NamedTensorMap::new();
        for (key, tensor) in map {
            let norm = tensor.l2_norm();
            let factor = (self.config.max_grad_norm / (norm + 1e-12)).min(1.0);
            let data: Vec<f32> = tensor.data.iter().map(|v| v * factor).collect();
            out.insert(
                key.clone(),
                Tensor::new(tensor.shape.clone(), data).expect("shape preserved"),
            );
        }
        out
    }

    /// Add IID N(0, sigma^2) noise to every element of every tensor.
    pub fn add_noise(&self, map: &NamedTensorMap) -> NamedTensorMap {
        let mut rng = thread_rng();
        let normal = Normal::new(0.0f32, self.sigma as f32).expect("sigma > 0");
        let mut out = NamedTensorMap::new();
        for (key, tensor) in map {
            let data: Vec<f32> = tensor
                .data
                .iter()
                .map(|v| v + normal.sample(&mut rng))
                .collect();
            out.insert(
                key.clone(),
                Tensor::new(tensor.shape.clone(), data).expect("shape preserved"),
            );
        }
        out
    }

    /// Clip then add noise: the standard Gaussian-mechanism pipeline.
    #[tracing::instrument(skip(self, map), fields(sigma = self.sigma))]
    pub fn apply(&self, map: &NamedTensorMap) -> NamedTensorMap {
        self.add_noise(&self.clip(map))
    }

    /// Advanced-composition privacy loss after `num_rounds` invocations of
    /// this mechanism. Matches the source formula verbatim, including its
    /// additive (not tightened) correction term -- see design notes.
    pub fn privacy_spent(&self, num_rounds: u32) -> CompositionAccounting {
        let t = num_rounds as f64;
        let eps = self.config.epsilon;
        let delta_prime = self.config.delta;

        let eps_total =
            eps * (2.0 * t * (1.0 / delta_prime).ln()).sqrt() + t * eps * (eps.exp() - 1.0);
        let delta_total = t * self.config.delta + delta_prime;

        CompositionAccounting {
            epsilon_total: round_to(eps_total, 6),
            delta_total: round_to(delta_total, 10),
            num_rounds,
            sigma: round_to(self.sigma, 6),
        }
    }
}

fn compute_sigma(sensitivity: f64, delta: f64, epsilon: f64) -> f64 {
    sensitivity * (2.0 * (1.25 / delta).ln()).sqrt() / epsilon
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// Tracks a client's remaining (epsilon, delta) budget across rounds, and
/// estimates how many further rounds it can sustain -- grounded on the
/// teacher's own budget-tracking accountant.
pub struct DpAccountant {
    mechanism: GaussianMechanism,
    rounds_spent: u32,
}

impl DpAccountant {
    pub fn new(mechanism: GaussianMechanism) -> Self {
        DpAccountant {
            mechanism,
            rounds_spent: 0,
        }
    }

    pub fn record_round(&mut self) -> CompositionAccounting {
        self.rounds_spent += 1;
        self.mechanism.privacy_spent(self.rounds_spent)
    }

    pub fn current_spend(&self) -> CompositionAccounting {
        self.mechanism.privacy_spent(self.rounds_spent)
    }

    /// Estimate how many additional rounds can run before `epsilon_total`
    /// exceeds `total_epsilon_budget`, by linear search from the current
    /// round count (the composition bound grows faster than linearly, so
    /// this is a conservative one-sided estimate, not an exact inverse).
    pub fn rounds_until_budget_exhausted(&self, total_epsilon_budget: f64) -> u32 {
        let mut rounds = self.rounds_spent;
        loop {
            let spend = self.mechanism.privacy_spent(rounds);
            if spend.epsilon_total > total_epsilon_budget {
                return rounds.saturating_sub(self.rounds_spent);
            }
            rounds += 1;
            if rounds > 100_000 {
                return rounds - self.rounds_spent;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with(key: &str, data: Vec<f32>) -> NamedTensorMap {
        let mut m = NamedTensorMap::new();
        m.insert(key.to_string(), Tensor::new(vec![data.len()], data).unwrap());
        m
    }

    #[test]
    fn rejects_invalid_epsilon() {
        let cfg = DpConfig {
            epsilon: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            GaussianMechanism::new(cfg),
            Err(DpError::InvalidEpsilon(_))
        ));
    }

    #[test]
    fn rejects_invalid_delta() {
        let cfg = DpConfig {
            delta: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            GaussianMechanism::new(cfg),
            Err(DpError::InvalidDelta(_))
        ));
    }

    #[test]
    fn sigma_matches_known_value() {
        let cfg = DpConfig {
            epsilon: 1.0,
            delta: 1e-5,
            sensitivity: 1.0,
            max_grad_norm: 1.0,
        };
        let mech = GaussianMechanism::new(cfg).unwrap();
        assert!((mech.sigma() - 4.823).abs() < 1e-3);
    }

    #[test]
    fn clip_scales_down_to_max_norm() {
        let mech = GaussianMechanism::new(DpConfig {
            max_grad_norm: 1.0,
            ..Default::default()
        })
        .unwrap();
        let map = map_with("t", vec![3.0, 4.0]);
        let clipped = mech.clip(&map);
        let norm = clipped["t"].l2_norm();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn clip_leaves_small_tensors_untouched() {
        let mech = GaussianMechanism::new(DpConfig {
            max_grad_norm: 10.0,
            ..Default::default()
        })
        .unwrap();
        let map = map_with("t", vec![0.1, 0.2]);
        let clipped = mech.clip(&map);
        assert_eq!(clipped["t"].data, vec![0.1, 0.2]);
    }

    #[test]
    fn composition_is_monotonic_in_rounds() {
        let mech = GaussianMechanism::new(DpConfig::default()).unwrap();
        let a = mech.privacy_spent(1);
        let b = mech.privacy_spent(10);
        assert!(b.epsilon_total >= a.epsilon_total);
    }

    #[test]
    fn accountant_tracks_rounds() {
        let mech = GaussianMechanism::new(DpConfig::default()).unwrap();
        let mut acct = DpAccountant::new(mech);
        let first = acct.record_round();
        let second = acct.record_round();
        assert_eq!(first.num_rounds, 1);
        assert_eq!(second.num_rounds, 2);
        assert!(second.epsilon_total >= first.epsilon_total);
    }
}
