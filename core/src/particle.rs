//! Particles, the belief they form, and the ways a belief is seeded.
//!
//! A [`Belief`] is the population of (pose, log-weight) pairs maintained by the filter. It is
//! mutated in place by every filter step: prediction replaces the poses, weighting adds
//! log-likelihoods to the log-weights, and resampling replaces the population. Every mutating
//! operation first computes its result into a scratch buffer and only commits it once the whole
//! population has been processed without error, so a failure never leaves a partially updated
//! belief behind.
//!
//! Prediction consumes randomness per particle. Each particle draws from its own `StdRng`
//! sub-stream whose seed is derived from a per-step stream seed and the particle index. The result
//! is therefore identical whether the particles are processed sequentially or in parallel.
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use std::f64::consts::PI;
use std::fmt::{self, Debug, Display};

use crate::motion::MotionModel;
use crate::observation::{MapCapability, ObservationModel};
use crate::{FilterError, FilterResult, Pose2D};

/// One pose hypothesis and the logarithm of its importance weight.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub pose: Pose2D,
    pub log_weight: f64,
}
impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("x", &self.pose.x)
            .field("y", &self.pose.y)
            .field("phi_deg", &self.pose.phi.to_degrees())
            .field("log_weight", &self.log_weight)
            .finish()
    }
}
impl Particle {
    pub fn new(pose: Pose2D, log_weight: f64) -> Particle {
        Particle { pose, log_weight }
    }
}

/// Axis-aligned region of pose space, used for uniform seeding and as admissible bounds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Region {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    /// Lower heading bound (rad)
    pub min_phi: f64,
    /// Upper heading bound (rad)
    pub max_phi: f64,
}
impl Default for Region {
    fn default() -> Self {
        Region {
            min_x: 0.0,
            max_x: 10.0,
            min_y: 0.0,
            max_y: 10.0,
            min_phi: -PI,
            max_phi: PI,
        }
    }
}
impl Region {
    /// Region covering `[min_x, max_x] x [min_y, max_y]` with any heading.
    pub fn new(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> Region {
        Region {
            min_x,
            max_x,
            min_y,
            max_y,
            min_phi: -PI,
            max_phi: PI,
        }
    }
    pub fn validate(&self) -> FilterResult<()> {
        let bounds = [
            (self.min_x, self.max_x, "x"),
            (self.min_y, self.max_y, "y"),
            (self.min_phi, self.max_phi, "phi"),
        ];
        for (low, high, axis) in bounds {
            if !low.is_finite() || !high.is_finite() || low > high {
                return Err(FilterError::Configuration(format!(
                    "invalid {} bounds [{}, {}]",
                    axis, low, high
                )));
            }
        }
        Ok(())
    }
    /// Whether the position of `pose` lies inside the region (heading is not checked).
    pub fn contains(&self, pose: &Pose2D) -> bool {
        pose.x >= self.min_x && pose.x <= self.max_x && pose.y >= self.min_y && pose.y <= self.max_y
    }
}

/// Distribution used to draw initial particle poses.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PoseSampler {
    /// Uniform over a region of pose space.
    Uniform { region: Region },
    /// Independent Gaussians around a mean pose.
    Gaussian {
        mean: Pose2D,
        std_xy: f64,
        std_phi: f64,
    },
}
impl PoseSampler {
    pub fn validate(&self) -> FilterResult<()> {
        match self {
            PoseSampler::Uniform { region } => region.validate(),
            PoseSampler::Gaussian {
                mean,
                std_xy,
                std_phi,
            } => {
                if !mean.is_finite() {
                    return Err(FilterError::Configuration(
                        "Gaussian seeding mean must be finite".to_string(),
                    ));
                }
                let usable = |value: f64| value.is_finite() && value >= 0.0;
                if !(usable(*std_xy) && usable(*std_phi)) {
                    return Err(FilterError::Configuration(format!(
                        "Gaussian seeding deviations must be finite and non-negative, got ({}, {})",
                        std_xy, std_phi
                    )));
                }
                Ok(())
            }
        }
    }
    /// Draw one pose.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Pose2D {
        match self {
            PoseSampler::Uniform { region } => Pose2D::new(
                uniform_between(region.min_x, region.max_x, rng),
                uniform_between(region.min_y, region.max_y, rng),
                uniform_between(region.min_phi, region.max_phi, rng),
            ),
            PoseSampler::Gaussian {
                mean,
                std_xy,
                std_phi,
            } => {
                let n_x: f64 = StandardNormal.sample(rng);
                let n_y: f64 = StandardNormal.sample(rng);
                let n_phi: f64 = StandardNormal.sample(rng);
                Pose2D::new(
                    mean.x + n_x * std_xy,
                    mean.y + n_y * std_xy,
                    mean.phi + n_phi * std_phi,
                )
            }
        }
    }
}

fn uniform_between<R: Rng + ?Sized>(low: f64, high: f64, rng: &mut R) -> f64 {
    low + (high - low) * rng.random::<f64>()
}

/// How a new belief is populated at session creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Seeding {
    /// `count` particles drawn from `sampler`, with uniform weights.
    Sampled { sampler: PoseSampler, count: usize },
    /// An explicit particle list, used as given.
    Explicit { particles: Vec<Particle> },
}
impl Seeding {
    pub fn uniform(region: Region, count: usize) -> Seeding {
        Seeding::Sampled {
            sampler: PoseSampler::Uniform { region },
            count,
        }
    }
    pub fn gaussian(mean: Pose2D, std_xy: f64, std_phi: f64, count: usize) -> Seeding {
        Seeding::Sampled {
            sampler: PoseSampler::Gaussian {
                mean,
                std_xy,
                std_phi,
            },
            count,
        }
    }
    /// Build the belief described by this seeding.
    pub fn build<R: Rng + ?Sized>(&self, rng: &mut R) -> FilterResult<Belief> {
        match self {
            Seeding::Sampled { sampler, count } => {
                let mut belief = Belief::new();
                belief.seed(*count, sampler, rng)?;
                Ok(belief)
            }
            Seeding::Explicit { particles } => Belief::from_particles(particles.clone()),
        }
    }
}

/// The weighted particle population representing the current pose distribution.
#[derive(Clone, Default, PartialEq)]
pub struct Belief {
    particles: Vec<Particle>,
    parallel: bool,
}
impl Debug for Belief {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let max_log_weight = self.max_log_weight();
        let min_log_weight = self
            .particles
            .iter()
            .map(|p| p.log_weight)
            .fold(f64::INFINITY, f64::min);
        f.debug_struct("Belief")
            .field("num_particles", &self.particles.len())
            .field(
                "log_weight_range",
                &format_args!("[{:.4e}, {:.4e}]", min_log_weight, max_log_weight),
            )
            .field("parallel", &self.parallel)
            .finish()
    }
}
impl Belief {
    /// Empty belief; populate it with [`Belief::seed`] before filtering.
    pub fn new() -> Belief {
        Belief::default()
    }
    /// Belief made of the given particles. The log-weights are kept as given.
    pub fn from_particles(particles: Vec<Particle>) -> FilterResult<Belief> {
        if particles.is_empty() {
            return Err(FilterError::EmptyBelief);
        }
        // -inf is a valid zero weight, +inf is not
        let invalid = |p: &&Particle| {
            !p.pose.is_finite() || p.log_weight.is_nan() || p.log_weight == f64::INFINITY
        };
        if let Some(bad) = particles.iter().find(invalid) {
            return Err(FilterError::Configuration(format!(
                "explicit particle is not finite: {}",
                bad
            )));
        }
        Ok(Belief {
            particles,
            parallel: false,
        })
    }
    /// Belief made of the given poses with uniform weights.
    pub fn from_poses(poses: &[Pose2D]) -> FilterResult<Belief> {
        let log_weight = -(poses.len() as f64).ln();
        Belief::from_particles(poses.iter().map(|&pose| Particle::new(pose, log_weight)).collect())
    }
    /// Process particles with rayon when `parallel` is set. Results are identical either way.
    pub fn with_parallelism(mut self, parallel: bool) -> Belief {
        self.parallel = parallel;
        self
    }
    pub fn set_parallel(&mut self, parallel: bool) {
        self.parallel = parallel;
    }
    pub fn is_parallel(&self) -> bool {
        self.parallel
    }
    pub fn len(&self) -> usize {
        self.particles.len()
    }
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }
    pub fn iter(&self) -> std::slice::Iter<'_, Particle> {
        self.particles.iter()
    }
    pub fn poses(&self) -> Vec<Pose2D> {
        self.particles.iter().map(|p| p.pose).collect()
    }
    pub fn log_weights(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.log_weight).collect()
    }
    pub fn max_log_weight(&self) -> f64 {
        self.particles
            .iter()
            .map(|p| p.log_weight)
            .fold(f64::NEG_INFINITY, f64::max)
    }
    /// Replace the population with `n` particles drawn from `sampler`, with uniform weights.
    pub fn seed<R: Rng + ?Sized>(
        &mut self,
        n: usize,
        sampler: &PoseSampler,
        rng: &mut R,
    ) -> FilterResult<()> {
        if n == 0 {
            return Err(FilterError::Configuration(
                "cannot seed a belief with zero particles".to_string(),
            ));
        }
        sampler.validate()?;
        let log_weight = -(n as f64).ln();
        self.particles = (0..n)
            .map(|_| Particle::new(sampler.sample(rng), log_weight))
            .collect();
        Ok(())
    }
    /// Replace the population with `n` particles drawn uniformly from the admissible part of
    /// `region` (rejection sampling against [`MapCapability::is_admissible`]).
    ///
    /// # Errors
    /// Returns [`FilterError::Configuration`] when fewer than `n` admissible poses are found within
    /// `max_attempts_per_particle * n` draws.
    pub fn seed_free_space<M, R>(
        &mut self,
        n: usize,
        region: &Region,
        map: &M,
        max_attempts_per_particle: usize,
        rng: &mut R,
    ) -> FilterResult<()>
    where
        M: MapCapability + ?Sized,
        R: Rng + ?Sized,
    {
        if n == 0 {
            return Err(FilterError::Configuration(
                "cannot seed a belief with zero particles".to_string(),
            ));
        }
        region.validate()?;
        let sampler = PoseSampler::Uniform { region: *region };
        let max_attempts = max_attempts_per_particle.max(1).saturating_mul(n);
        let log_weight = -(n as f64).ln();
        let mut particles = Vec::with_capacity(n);
        let mut attempts = 0usize;
        while particles.len() < n {
            if attempts >= max_attempts {
                return Err(FilterError::Configuration(format!(
                    "found only {} admissible poses out of {} requested after {} attempts",
                    particles.len(),
                    n,
                    attempts
                )));
            }
            attempts += 1;
            let pose = sampler.sample(rng);
            if map.is_admissible(&pose) {
                particles.push(Particle::new(pose, log_weight));
            }
        }
        log::debug!(
            "Seeded {} particles in free space ({} draws, acceptance {:.2})",
            n,
            attempts,
            n as f64 / attempts as f64
        );
        self.particles = particles;
        Ok(())
    }

    /// Sample the next pose of every particle without modifying the belief.
    ///
    /// Particle `i` draws from a sub-stream seeded by `(stream_seed, i)`.
    pub fn predict_poses<MM: MotionModel>(
        &self,
        action: &MM::Action,
        motion_model: &MM,
        stream_seed: u64,
    ) -> FilterResult<Vec<Pose2D>> {
        let propagate = |(index, particle): (usize, &Particle)| -> FilterResult<Pose2D> {
            let mut rng = StdRng::seed_from_u64(substream_seed(stream_seed, index as u64));
            motion_model.sample_next(&particle.pose, action, &mut rng)
        };
        if self.parallel {
            self.particles.par_iter().enumerate().map(propagate).collect()
        } else {
            self.particles.iter().enumerate().map(propagate).collect()
        }
    }
    /// Replace every particle's pose with a sample from the motion model.
    ///
    /// The sub-stream seed is drawn from `rng`. Nothing is modified when any particle fails.
    pub fn apply_motion<MM: MotionModel, R: Rng + ?Sized>(
        &mut self,
        action: &MM::Action,
        motion_model: &MM,
        rng: &mut R,
    ) -> FilterResult<()> {
        let poses = self.predict_poses(action, motion_model, rng.random())?;
        for (particle, pose) in self.particles.iter_mut().zip(poses) {
            particle.pose = pose;
        }
        Ok(())
    }
    /// Log-weights that would result from weighting `poses` (one per particle) with `observation`.
    ///
    /// # Errors
    /// - [`FilterError::InvalidObservation`] when the model fails or returns `+inf`/NaN.
    /// - [`FilterError::DegenerateWeights`] when every resulting log-weight is `-inf`.
    pub fn score_poses<OM, M>(
        &self,
        poses: &[Pose2D],
        observation: &OM::Observation,
        observation_model: &OM,
        map: &M,
    ) -> FilterResult<Vec<f64>>
    where
        OM: ObservationModel<M>,
        M: Sync + ?Sized,
    {
        if poses.len() != self.particles.len() {
            return Err(FilterError::InvalidObservation(format!(
                "expected {} poses to score, got {}",
                self.particles.len(),
                poses.len()
            )));
        }
        let score = |(particle, pose): (&Particle, &Pose2D)| -> FilterResult<f64> {
            let log_likelihood = observation_model.log_likelihood(pose, observation, map)?;
            if log_likelihood.is_nan() || log_likelihood == f64::INFINITY {
                return Err(FilterError::InvalidObservation(format!(
                    "log-likelihood {} at {} is not a valid probability",
                    log_likelihood, pose
                )));
            }
            Ok(particle.log_weight + log_likelihood)
        };
        let log_weights: Vec<f64> = if self.parallel {
            self.particles.par_iter().zip(poses.par_iter()).map(score).collect::<FilterResult<_>>()?
        } else {
            self.particles.iter().zip(poses.iter()).map(score).collect::<FilterResult<_>>()?
        };
        let max_log_weight = log_weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !max_log_weight.is_finite() {
            return Err(FilterError::DegenerateWeights);
        }
        Ok(log_weights)
    }
    /// Add the observation log-likelihood of each particle to its log-weight.
    ///
    /// All likelihoods are computed before anything is written; on error the belief is unchanged.
    pub fn apply_observation<OM, M>(
        &mut self,
        observation: &OM::Observation,
        observation_model: &OM,
        map: &M,
    ) -> FilterResult<()>
    where
        OM: ObservationModel<M>,
        M: Sync + ?Sized,
    {
        let poses = self.poses();
        let log_weights = self.score_poses(&poses, observation, observation_model, map)?;
        self.set_log_weights(&log_weights);
        Ok(())
    }
    /// Replace poses and log-weights together. Both slices must match the population size.
    pub(crate) fn commit(&mut self, poses: Vec<Pose2D>, log_weights: Vec<f64>) {
        debug_assert_eq!(poses.len(), self.particles.len());
        debug_assert_eq!(log_weights.len(), self.particles.len());
        let updates = poses.into_iter().zip(log_weights);
        for (particle, (pose, log_weight)) in self.particles.iter_mut().zip(updates) {
            particle.pose = pose;
            particle.log_weight = log_weight;
        }
    }
    fn set_log_weights(&mut self, log_weights: &[f64]) {
        for (particle, &log_weight) in self.particles.iter_mut().zip(log_weights.iter()) {
            particle.log_weight = log_weight;
        }
    }
    /// Linear weights summing to one, computed without modifying the belief.
    ///
    /// # Errors
    /// - [`FilterError::EmptyBelief`] for an empty population.
    /// - [`FilterError::DegenerateWeights`] when the sum of exponentials is zero or not finite.
    pub fn normalized_weights(&self) -> FilterResult<Vec<f64>> {
        if self.particles.is_empty() {
            return Err(FilterError::EmptyBelief);
        }
        let max_log_weight = self.max_log_weight();
        if !max_log_weight.is_finite() {
            return Err(FilterError::DegenerateWeights);
        }
        let mut weights: Vec<f64> = self
            .particles
            .iter()
            .map(|p| (p.log_weight - max_log_weight).exp())
            .collect();
        let sum: f64 = weights.iter().sum();
        if !(sum > 0.0 && sum.is_finite()) {
            return Err(FilterError::DegenerateWeights);
        }
        for weight in &mut weights {
            *weight /= sum;
        }
        Ok(weights)
    }
    /// Normalize the log-weights in place so that their exponentials sum to one, and return the
    /// linear weights.
    pub fn normalize(&mut self) -> FilterResult<Vec<f64>> {
        let weights = self.normalized_weights()?;
        for (particle, &weight) in self.particles.iter_mut().zip(weights.iter()) {
            particle.log_weight = weight.ln();
        }
        Ok(weights)
    }
    /// Effective sample size `1 / Σ wᵢ²` of the normalized weights; between 1 and N.
    pub fn effective_sample_size(&self) -> FilterResult<f64> {
        let weights = self.normalized_weights()?;
        Ok(effective_sample_size(&weights))
    }
    /// Replace the population by copies of the particles at `indices`, with uniform weights.
    pub fn resample_from_indices(&mut self, indices: &[usize]) -> FilterResult<()> {
        if indices.is_empty() {
            return Err(FilterError::EmptyBelief);
        }
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.particles.len()) {
            return Err(FilterError::Configuration(format!(
                "resampling index {} out of range for {} particles",
                bad,
                self.particles.len()
            )));
        }
        let log_weight = -(indices.len() as f64).ln();
        self.particles = indices
            .iter()
            .map(|&i| Particle::new(self.particles[i].pose, log_weight))
            .collect();
        Ok(())
    }
    pub(crate) fn replace_particles(&mut self, particles: Vec<Particle>) {
        self.particles = particles;
    }
}

/// Effective sample size `1 / Σ wᵢ²` of weights that already sum to one.
pub fn effective_sample_size(weights: &[f64]) -> f64 {
    let sum_of_squares: f64 = weights.iter().map(|w| w * w).sum();
    if sum_of_squares > 0.0 {
        1.0 / sum_of_squares
    } else {
        0.0
    }
}

/// Seed of the random sub-stream for `index` within the stream `stream_seed` (SplitMix64 mixing).
pub fn substream_seed(stream_seed: u64, index: u64) -> u64 {
    let mut z = stream_seed
        .wrapping_add(index.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::{GaussianOdometryModel, OdometryAction};
    use assert_approx_eq::assert_approx_eq;

    /// Map returning a fixed log-likelihood per pose, keyed on the sign of x.
    struct SignMap;
    impl MapCapability for SignMap {
        type Observation = (f64, f64);
        fn log_likelihood(&self, pose: &Pose2D, observation: &(f64, f64)) -> FilterResult<f64> {
            Ok(if pose.x < 0.0 { observation.0 } else { observation.1 })
        }
        fn is_admissible(&self, pose: &Pose2D) -> bool {
            pose.x > 5.0
        }
    }

    fn two_sided_belief() -> Belief {
        Belief::from_poses(&[
            Pose2D::new(-1.0, 0.0, 0.0),
            Pose2D::new(-2.0, 0.0, 0.0),
            Pose2D::new(1.0, 0.0, 0.0),
            Pose2D::new(2.0, 0.0, 0.0),
        ])
        .unwrap()
    }

    #[test]
    fn seeded_belief_has_uniform_normalized_weights() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut belief = Belief::new();
        let sampler = PoseSampler::Uniform {
            region: Region::default(),
        };
        belief.seed(250, &sampler, &mut rng).unwrap();
        assert_eq!(belief.len(), 250);
        assert!(belief.iter().all(|p| Region::default().contains(&p.pose)));
        let weights = belief.normalized_weights().unwrap();
        assert_approx_eq!(weights.iter().sum::<f64>(), 1.0, 1e-9);
        assert_approx_eq!(belief.effective_sample_size().unwrap(), 250.0, 1e-6);
    }

    #[test]
    fn seeding_with_zero_particles_fails() {
        let mut rng = StdRng::seed_from_u64(1);
        let sampler = PoseSampler::Uniform {
            region: Region::default(),
        };
        let result = Belief::new().seed(0, &sampler, &mut rng);
        assert!(matches!(result, Err(FilterError::Configuration(_))));
        let bad_region = Region::new(1.0, 0.0, 0.0, 1.0);
        let result = Belief::new().seed(10, &PoseSampler::Uniform { region: bad_region }, &mut rng);
        assert!(matches!(result, Err(FilterError::Configuration(_))));
    }

    #[test]
    fn explicit_particles_must_have_usable_weights() {
        let pose = Pose2D::new(1.0, 2.0, 0.0);
        for log_weight in [f64::NAN, f64::INFINITY] {
            let result = Belief::from_particles(vec![
                Particle::new(pose, log_weight),
                Particle::new(pose, 0.0),
            ]);
            assert!(matches!(result, Err(FilterError::Configuration(_))));
        }
        let belief = Belief::from_particles(vec![
            Particle::new(pose, f64::NEG_INFINITY),
            Particle::new(pose, 0.0),
        ])
        .unwrap();
        assert_approx_eq!(belief.normalized_weights().unwrap()[1], 1.0, 1e-12);
    }

    #[test]
    fn gaussian_seeding_is_centered_on_the_mean() {
        let mut rng = StdRng::seed_from_u64(8);
        let belief = Seeding::gaussian(Pose2D::new(3.0, -2.0, 0.5), 0.2, 0.05, 5000)
            .build(&mut rng)
            .unwrap();
        let n = belief.len() as f64;
        let mean_x = belief.iter().map(|p| p.pose.x).sum::<f64>() / n;
        let mean_y = belief.iter().map(|p| p.pose.y).sum::<f64>() / n;
        assert_approx_eq!(mean_x, 3.0, 0.02);
        assert_approx_eq!(mean_y, -2.0, 0.02);
    }

    #[test]
    fn free_space_seeding_only_keeps_admissible_poses() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut belief = Belief::new();
        belief
            .seed_free_space(100, &Region::default(), &SignMap, 50, &mut rng)
            .unwrap();
        assert_eq!(belief.len(), 100);
        assert!(belief.iter().all(|p| p.pose.x > 5.0));
        let nowhere = Region::new(0.0, 1.0, 0.0, 1.0);
        let result = belief.seed_free_space(10, &nowhere, &SignMap, 5, &mut rng);
        assert!(matches!(result, Err(FilterError::Configuration(_))));
        assert_eq!(belief.len(), 100);
    }

    #[test]
    fn normalize_sums_to_one_and_bounds_ess() {
        let mut belief = Belief::from_particles(vec![
            Particle::new(Pose2D::default(), -1000.0),
            Particle::new(Pose2D::default(), -1001.0),
            Particle::new(Pose2D::default(), -1010.0),
            Particle::new(Pose2D::default(), f64::NEG_INFINITY),
        ])
        .unwrap();
        let weights = belief.normalize().unwrap();
        assert_approx_eq!(weights.iter().sum::<f64>(), 1.0, 1e-9);
        assert_eq!(weights[3], 0.0);
        assert!(weights[0] > weights[1] && weights[1] > weights[2]);
        let ess = belief.effective_sample_size().unwrap();
        assert!(ess >= 1.0 && ess <= belief.len() as f64);
        assert_approx_eq!(belief.max_log_weight().exp(), weights[0], 1e-12);
    }

    #[test]
    fn all_impossible_particles_are_degenerate() {
        let mut belief = Belief::from_particles(vec![
            Particle::new(Pose2D::default(), f64::NEG_INFINITY),
            Particle::new(Pose2D::default(), f64::NEG_INFINITY),
        ])
        .unwrap();
        assert_eq!(belief.normalize(), Err(FilterError::DegenerateWeights));
        assert_eq!(Belief::new().normalized_weights(), Err(FilterError::EmptyBelief));
    }

    #[test]
    fn observation_adds_log_likelihoods() {
        let mut belief = two_sided_belief();
        let before = belief.log_weights();
        belief
            .apply_observation(
                &(-3.0, -1.0),
                &crate::observation::MapLikelihood::default(),
                &SignMap,
            )
            .unwrap();
        let after = belief.log_weights();
        assert_approx_eq!(after[0] - before[0], -3.0, 1e-12);
        assert_approx_eq!(after[3] - before[3], -1.0, 1e-12);
    }

    #[test]
    fn observation_weighting_is_associative() {
        let model = crate::observation::MapLikelihood::default();
        let mut sequential = two_sided_belief();
        sequential.apply_observation(&(-0.5, -2.0), &model, &SignMap).unwrap();
        sequential.apply_observation(&(-1.5, -0.25), &model, &SignMap).unwrap();
        let mut combined = two_sided_belief();
        combined.apply_observation(&(-2.0, -2.25), &model, &SignMap).unwrap();
        for (a, b) in sequential.log_weights().iter().zip(combined.log_weights().iter()) {
            assert_approx_eq!(a, b, 1e-12);
        }
        let ws = sequential.normalized_weights().unwrap();
        let wc = combined.normalized_weights().unwrap();
        for (a, b) in ws.iter().zip(wc.iter()) {
            assert_approx_eq!(a, b, 1e-12);
        }
    }

    #[test]
    fn degenerate_observation_leaves_belief_unchanged() {
        let mut belief = two_sided_belief();
        let before = belief.clone();
        let result = belief.apply_observation(
            &(f64::NEG_INFINITY, f64::NEG_INFINITY),
            &crate::observation::MapLikelihood::default(),
            &SignMap,
        );
        assert_eq!(result, Err(FilterError::DegenerateWeights));
        assert_eq!(belief, before);
    }

    #[test]
    fn partially_impossible_observation_is_tolerated() {
        let mut belief = two_sided_belief();
        belief
            .apply_observation(
                &(f64::NEG_INFINITY, -1.0),
                &crate::observation::MapLikelihood::default(),
                &SignMap,
            )
            .unwrap();
        let weights = belief.normalize().unwrap();
        assert_eq!(weights[0], 0.0);
        assert_approx_eq!(weights[2], 0.5, 1e-12);
    }

    #[test]
    fn motion_is_identical_sequentially_and_in_parallel() {
        let mut rng = StdRng::seed_from_u64(17);
        let seeded = Seeding::uniform(Region::default(), 500).build(&mut rng).unwrap();
        let model = GaussianOdometryModel::default();
        let action = OdometryAction::new(0.2, 0.0, 0.1);
        let sequential = seeded.predict_poses(&action, &model, 99).unwrap();
        let parallel = seeded
            .clone()
            .with_parallelism(true)
            .predict_poses(&action, &model, 99)
            .unwrap();
        for (a, b) in sequential.iter().zip(parallel.iter()) {
            assert_eq!(a.x.to_bits(), b.x.to_bits());
            assert_eq!(a.y.to_bits(), b.y.to_bits());
            assert_eq!(a.phi.to_bits(), b.phi.to_bits());
        }
    }

    #[test]
    fn invalid_action_leaves_poses_unchanged() {
        let mut belief = two_sided_belief();
        let before = belief.clone();
        let action = OdometryAction {
            delta: Pose2D {
                x: f64::INFINITY,
                y: 0.0,
                phi: 0.0,
            },
        };
        let mut rng = StdRng::seed_from_u64(2);
        let result = belief.apply_motion(&action, &GaussianOdometryModel::default(), &mut rng);
        assert!(matches!(result, Err(FilterError::InvalidAction(_))));
        assert_eq!(belief, before);
    }

    #[test]
    fn resampling_from_indices_resets_weights() {
        let mut belief = two_sided_belief();
        belief.resample_from_indices(&[3, 3, 0]).unwrap();
        assert_eq!(belief.len(), 3);
        assert_eq!(belief.particles()[0].pose, Pose2D::new(2.0, 0.0, 0.0));
        for particle in belief.iter() {
            assert_approx_eq!(particle.log_weight, -(3.0_f64).ln(), 1e-12);
        }
        assert!(belief.resample_from_indices(&[7]).is_err());
    }

    #[test]
    fn substreams_differ_per_index() {
        assert_ne!(substream_seed(1, 0), substream_seed(1, 1));
        assert_ne!(substream_seed(1, 0), substream_seed(2, 0));
        assert_eq!(substream_seed(5, 9), substream_seed(5, 9));
    }
}
