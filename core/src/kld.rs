//! KLD-sampling: adaptive particle count during resampling.
//!
//! Particles are drawn one at a time from the weighted belief and dropped into a histogram over
//! `(x, y, phi)` with fixed bin sizes. After each draw the number of particles needed so that the
//! Kullback-Leibler divergence between the sample-based and the true posterior stays below `ε`
//! with probability `1 - δ` is recomputed from the number of occupied bins `k`:
//!
//! $$
//! n_{req} = \frac{k-1}{2\varepsilon}\left(1 - \frac{2}{9(k-1)} + \sqrt{\frac{2}{9(k-1)}}\, z_{1-\delta}\right)^3
//! $$
//!
//! Drawing stops once at least `max(n_req, min_particles, k · min_samples_per_bin)` particles were
//! drawn, or at `max_particles`. The bound is zero for `k ≤ 1`.
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use std::collections::HashSet;

use crate::particle::{Belief, Particle};
use crate::resampling::{cumulative_weights, systematic_resample};
use crate::{FilterError, FilterResult, Pose2D};

/// How particles are drawn during KLD-sampling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KldSelection {
    /// Independent draws from the weight distribution.
    Multinomial,
    /// `max_particles` systematic selections consumed in random order.
    #[default]
    Systematic,
}

/// KLD-sampling parameters
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KldConfig {
    /// Maximum KL divergence `ε` between sample and true posterior
    pub epsilon: f64,
    /// Probability `δ` that the bound is exceeded; `z` is the `1 - δ` standard normal quantile
    pub delta: f64,
    pub min_particles: usize,
    pub max_particles: usize,
    /// Histogram bin size for x and y (m)
    pub bin_size_xy: f64,
    /// Histogram bin size for heading (rad)
    pub bin_size_phi: f64,
    /// Lower bound on particles per occupied bin
    pub min_samples_per_bin: usize,
    pub selection: KldSelection,
}
impl Default for KldConfig {
    fn default() -> Self {
        KldConfig {
            epsilon: 0.01,
            delta: 0.01,
            min_particles: 100,
            max_particles: 5000,
            bin_size_xy: 0.2,
            bin_size_phi: 5.0_f64.to_radians(),
            min_samples_per_bin: 1,
            selection: KldSelection::default(),
        }
    }
}
impl KldConfig {
    pub fn validate(&self) -> FilterResult<()> {
        if self.min_particles == 0 {
            return Err(FilterError::Configuration(
                "KLD min_particles must be at least 1".to_string(),
            ));
        }
        if self.min_particles > self.max_particles {
            return Err(FilterError::Configuration(format!(
                "KLD min_particles ({}) exceeds max_particles ({})",
                self.min_particles, self.max_particles
            )));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(FilterError::Configuration(format!(
                "KLD epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        if !(self.delta > 0.0 && self.delta < 1.0) {
            return Err(FilterError::Configuration(format!(
                "KLD delta must lie in (0, 1), got {}",
                self.delta
            )));
        }
        if !(self.bin_size_xy.is_finite() && self.bin_size_xy > 0.0)
            || !(self.bin_size_phi.is_finite() && self.bin_size_phi > 0.0)
        {
            return Err(FilterError::Configuration(format!(
                "KLD bin sizes must be positive, got ({}, {})",
                self.bin_size_xy, self.bin_size_phi
            )));
        }
        Ok(())
    }
    /// Histogram bin of `pose`.
    pub fn bin(&self, pose: &Pose2D) -> (i64, i64, i64) {
        (
            (pose.x / self.bin_size_xy).floor() as i64,
            (pose.y / self.bin_size_xy).floor() as i64,
            (pose.phi / self.bin_size_phi).floor() as i64,
        )
    }
    /// Particles required for `occupied_bins` bins, clipped to `[min_particles, max_particles]`.
    pub fn required_particles(&self, occupied_bins: usize) -> usize {
        let z = standard_normal_quantile(1.0 - self.delta);
        self.required_with_quantile(occupied_bins, z)
    }
    fn required_with_quantile(&self, occupied_bins: usize, z: f64) -> usize {
        let bound = kld_sample_bound(occupied_bins, self.epsilon, z).ceil() as usize;
        bound
            .max(occupied_bins.saturating_mul(self.min_samples_per_bin))
            .clamp(self.min_particles, self.max_particles)
    }
}

/// Unclipped KLD sample bound for `k` occupied bins (Wilson-Hilferty approximation).
pub fn kld_sample_bound(k: usize, epsilon: f64, z: f64) -> f64 {
    if k <= 1 {
        return 0.0;
    }
    let dof = (k - 1) as f64;
    let a = 2.0 / (9.0 * dof);
    let b = 1.0 - a + a.sqrt() * z;
    dof / (2.0 * epsilon) * b * b * b
}

/// Quantile function of the standard normal distribution.
///
/// Rational approximation by P. J. Acklam, relative error below 1.2e-9 on `(0, 1)`. Returns
/// `±inf` at the end points and NaN outside `[0, 1]`.
pub fn standard_normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if p.is_nan() || !(0.0..=1.0).contains(&p) {
        return f64::NAN;
    }
    if p == 0.0 {
        return f64::NEG_INFINITY;
    }
    if p == 1.0 {
        return f64::INFINITY;
    }
    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };
    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

/// Outcome of one KLD resampling pass
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KldOutcome {
    pub particle_count: usize,
    pub occupied_bins: usize,
}

/// Resample `belief` with KLD-sampling; the new weights are uniform.
///
/// # Errors
/// Fails without modifying the belief when the weights cannot be normalized.
pub fn kld_resample<R: Rng + ?Sized>(
    belief: &mut Belief,
    config: &KldConfig,
    rng: &mut R,
) -> FilterResult<KldOutcome> {
    config.validate()?;
    let weights = belief.normalized_weights()?;
    let z = standard_normal_quantile(1.0 - config.delta);

    let draws: Vec<usize> = match config.selection {
        KldSelection::Multinomial => {
            let cdf = cumulative_weights(&weights);
            (0..config.max_particles)
                .map(|_| {
                    let u = rng.random::<f64>();
                    cdf.partition_point(|&c| c <= u).min(cdf.len() - 1)
                })
                .collect()
        }
        KldSelection::Systematic => {
            let mut selections = systematic_resample(&weights, config.max_particles, rng);
            selections.shuffle(rng);
            selections
        }
    };
    let mut source = draws.into_iter();

    let mut bins = HashSet::new();
    let mut selected: Vec<Pose2D> = Vec::with_capacity(config.min_particles);
    let mut required = config.min_particles;
    while selected.len() < required {
        let Some(index) = source.next() else {
            break;
        };
        let pose = belief.particles()[index].pose;
        if bins.insert(config.bin(&pose)) {
            required = config.required_with_quantile(bins.len(), z);
        }
        selected.push(pose);
    }

    let log_weight = -(selected.len() as f64).ln();
    let outcome = KldOutcome {
        particle_count: selected.len(),
        occupied_bins: bins.len(),
    };
    belief.replace_particles(
        selected
            .into_iter()
            .map(|pose| Particle::new(pose, log_weight))
            .collect(),
    );
    log::debug!(
        "KLD resampling kept {} particles in {} bins",
        outcome.particle_count,
        outcome.occupied_bins
    );
    Ok(outcome)
}
