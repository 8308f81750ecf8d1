//! Summary statistics of a belief.
//!
//! Position components are averaged linearly. Heading is a circular quantity: its mean is
//! `atan2(Σ wᵢ sin φᵢ, Σ wᵢ cos φᵢ)` and heading deviations are wrapped to `(-π, π]` before they
//! enter the covariance, so particles at 179° and -179° average to 180° and not to 0°.
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::particle::{Belief, Particle, effective_sample_size};
use crate::{FilterError, FilterResult, Pose2D, angle_difference};

/// How the point estimate of the belief is formed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ParticleAveragingStrategy {
    /// Weighted mean with circular heading.
    #[default]
    WeightedAverage,
    /// Mean that ignores the weights.
    UnweightedAverage,
    /// Pose of the most heavily weighted particle.
    HighestWeight,
}
impl ParticleAveragingStrategy {
    /// Point estimate and covariance of `particles` with normalized `weights`.
    ///
    /// The covariance is always the weighted covariance of the belief about the point estimate.
    pub fn estimate(&self, particles: &[Particle], weights: &[f64]) -> (Pose2D, Matrix3<f64>) {
        let mean = match self {
            ParticleAveragingStrategy::WeightedAverage => weighted_mean(particles, weights),
            ParticleAveragingStrategy::UnweightedAverage => {
                let uniform = vec![1.0 / particles.len() as f64; particles.len()];
                weighted_mean(particles, &uniform)
            }
            ParticleAveragingStrategy::HighestWeight => particles
                .iter()
                .zip(weights.iter())
                .fold((Pose2D::default(), f64::NEG_INFINITY), |best, (p, &w)| {
                    if w > best.1 { (p.pose, w) } else { best }
                })
                .0,
        };
        (mean, weighted_covariance(particles, weights, &mean))
    }
}

/// Weighted mean pose with circular heading. `weights` must sum to one.
pub fn weighted_mean(particles: &[Particle], weights: &[f64]) -> Pose2D {
    let (mut x, mut y, mut sin, mut cos) = (0.0, 0.0, 0.0, 0.0);
    for (particle, &w) in particles.iter().zip(weights.iter()) {
        x += w * particle.pose.x;
        y += w * particle.pose.y;
        sin += w * particle.pose.phi.sin();
        cos += w * particle.pose.phi.cos();
    }
    Pose2D::new(x, y, sin.atan2(cos))
}

/// Weighted covariance of `(x, y, phi)` about `mean`, with wrapped heading deviations.
pub fn weighted_covariance(
    particles: &[Particle],
    weights: &[f64],
    mean: &Pose2D,
) -> Matrix3<f64> {
    let mut covariance = Matrix3::zeros();
    for (particle, &w) in particles.iter().zip(weights.iter()) {
        let d = Vector3::new(
            particle.pose.x - mean.x,
            particle.pose.y - mean.y,
            angle_difference(particle.pose.phi, mean.phi),
        );
        covariance += w * d * d.transpose();
    }
    covariance
}

/// Snapshot of the belief after a step
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StatsSnapshot {
    /// Point estimate according to the configured averaging strategy
    pub mean: Pose2D,
    /// Covariance of `(x, y, phi)` about `mean`
    pub covariance: Matrix3<f64>,
    pub effective_sample_size: f64,
    pub particle_count: usize,
}
impl StatsSnapshot {
    /// Statistics of `belief` without modifying it.
    pub fn from_belief(
        belief: &Belief,
        strategy: ParticleAveragingStrategy,
    ) -> FilterResult<StatsSnapshot> {
        if belief.is_empty() {
            return Err(FilterError::EmptyBelief);
        }
        let weights = belief.normalized_weights()?;
        let (mean, covariance) = strategy.estimate(belief.particles(), &weights);
        Ok(StatsSnapshot {
            mean,
            covariance,
            effective_sample_size: effective_sample_size(&weights),
            particle_count: belief.len(),
        })
    }
    /// Trace of the covariance (m² + rad²).
    pub fn trace(&self) -> f64 {
        self.covariance.trace()
    }
    /// Root of the summed position variances (m).
    pub fn position_std(&self) -> f64 {
        (self.covariance[(0, 0)] + self.covariance[(1, 1)]).max(0.0).sqrt()
    }
    pub fn heading_std(&self) -> f64 {
        self.covariance[(2, 2)].max(0.0).sqrt()
    }
}

/// Variance of the normalized weights, `Σ (wᵢ - 1/N)² / N`.
pub fn weight_variance(weights: &[f64]) -> f64 {
    if weights.is_empty() {
        return 0.0;
    }
    let n = weights.len() as f64;
    weights.iter().map(|w| (w - 1.0 / n).powi(2)).sum::<f64>() / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::PI;

    #[test]
    fn heading_mean_is_circular() {
        let belief = Belief::from_poses(&[
            Pose2D::from_degrees(0.0, 0.0, 179.0),
            Pose2D::from_degrees(0.0, 0.0, -179.0),
            Pose2D::from_degrees(0.0, 0.0, 180.0),
        ])
        .unwrap();
        let stats =
            StatsSnapshot::from_belief(&belief, ParticleAveragingStrategy::WeightedAverage)
                .unwrap();
        assert_approx_eq!(stats.mean.phi.abs(), PI, 1e-9);
        // Deviations are ±1° and 0°, so the heading variance is 2/3 deg².
        let expected = 2.0 / 3.0 * (1.0_f64).to_radians().powi(2);
        assert_approx_eq!(stats.covariance[(2, 2)], expected, 1e-12);
    }

    #[test]
    fn weighted_mean_and_covariance() {
        let belief = Belief::from_particles(vec![
            Particle::new(Pose2D::new(0.0, 0.0, 0.0), (0.25_f64).ln()),
            Particle::new(Pose2D::new(4.0, 2.0, 0.0), (0.75_f64).ln()),
        ])
        .unwrap();
        let stats =
            StatsSnapshot::from_belief(&belief, ParticleAveragingStrategy::default()).unwrap();
        assert_approx_eq!(stats.mean.x, 3.0, 1e-12);
        assert_approx_eq!(stats.mean.y, 1.5, 1e-12);
        assert_approx_eq!(stats.covariance[(0, 0)], 0.25 * 9.0 + 0.75 * 1.0, 1e-12);
        assert_approx_eq!(stats.covariance[(0, 1)], 0.25 * 4.5 + 0.75 * 0.5, 1e-12);
        assert_approx_eq!(stats.covariance[(0, 1)], stats.covariance[(1, 0)], 1e-15);
        assert_approx_eq!(stats.effective_sample_size, 1.0 / (0.0625 + 0.5625), 1e-12);
        assert_eq!(stats.particle_count, 2);
    }

    #[test]
    fn averaging_strategies_differ() {
        let belief = Belief::from_particles(vec![
            Particle::new(Pose2D::new(0.0, 0.0, 0.0), (0.2_f64).ln()),
            Particle::new(Pose2D::new(1.0, 0.0, 0.0), (0.8_f64).ln()),
        ])
        .unwrap();
        let unweighted =
            StatsSnapshot::from_belief(&belief, ParticleAveragingStrategy::UnweightedAverage)
                .unwrap();
        assert_approx_eq!(unweighted.mean.x, 0.5, 1e-12);
        let highest =
            StatsSnapshot::from_belief(&belief, ParticleAveragingStrategy::HighestWeight).unwrap();
        assert_approx_eq!(highest.mean.x, 1.0, 1e-12);
        assert_approx_eq!(highest.covariance[(0, 0)], 0.2, 1e-12);
    }

    #[test]
    fn degenerate_and_empty_beliefs_fail() {
        assert_eq!(
            StatsSnapshot::from_belief(&Belief::new(), ParticleAveragingStrategy::default()),
            Err(FilterError::EmptyBelief)
        );
        let belief =
            Belief::from_particles(vec![Particle::new(Pose2D::default(), f64::NEG_INFINITY)])
                .unwrap();
        assert_eq!(
            StatsSnapshot::from_belief(&belief, ParticleAveragingStrategy::default()),
            Err(FilterError::DegenerateWeights)
        );
    }

    #[test]
    fn weight_variance_vanishes_for_uniform_weights() {
        assert_approx_eq!(weight_variance(&[0.25; 4]), 0.0, 1e-15);
        assert!(weight_variance(&[1.0, 0.0]) > 0.0);
    }
}
