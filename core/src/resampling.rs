//! Resampling strategies.
//!
//! Each strategy turns a vector of normalized weights into a list of `n` source indices; the
//! belief is then rebuilt from copies of those particles with uniform weights. The number of
//! indices `n` may differ from the number of weights, which is how the population is resized.
//!
//! Cumulative weights are searched for the first index whose cumulative weight strictly exceeds the
//! selection point. When several particles share a cumulative weight (zero-weight particles) the
//! lower index therefore wins, and a zero-weight particle is never selected.
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::particle::Belief;
use crate::{FilterError, FilterResult};

/// Strategy used to draw the new population.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ResamplingStrategy {
    /// `n` independent draws from the weight distribution.
    Multinomial,
    /// One uniform offset and `n` evenly spaced selection points (low variance).
    #[default]
    Systematic,
    /// One independent uniform draw inside each of `n` equal strata.
    Stratified,
    /// Deterministic copies of `floor(n wᵢ)` then systematic selection on the residuals.
    Residual,
}
impl ResamplingStrategy {
    /// Draw `n` indices into `weights` according to this strategy.
    pub fn indices<R: Rng + ?Sized>(
        &self,
        weights: &[f64],
        n: usize,
        rng: &mut R,
    ) -> FilterResult<Vec<usize>> {
        check_inputs(weights, n)?;
        Ok(match self {
            ResamplingStrategy::Multinomial => multinomial_resample(weights, n, rng),
            ResamplingStrategy::Systematic => systematic_resample(weights, n, rng),
            ResamplingStrategy::Stratified => stratified_resample(weights, n, rng),
            ResamplingStrategy::Residual => residual_resample(weights, n, rng),
        })
    }
}

fn check_inputs(weights: &[f64], n: usize) -> FilterResult<()> {
    if weights.is_empty() {
        return Err(FilterError::EmptyBelief);
    }
    if n == 0 {
        return Err(FilterError::Configuration(
            "cannot resample to zero particles".to_string(),
        ));
    }
    Ok(())
}

/// Normalized running sum of `weights`; the last entry is exactly one.
pub fn cumulative_weights(weights: &[f64]) -> Vec<f64> {
    let mut total = 0.0;
    let mut cdf: Vec<f64> = weights
        .iter()
        .map(|&w| {
            total += w;
            total
        })
        .collect();
    if total > 0.0 {
        for c in &mut cdf {
            *c /= total;
        }
    }
    if let Some(last) = cdf.last_mut() {
        *last = 1.0;
    }
    cdf
}

/// First index whose cumulative weight is strictly greater than `u`.
fn select(cdf: &[f64], u: f64) -> usize {
    cdf.partition_point(|&c| c <= u).min(cdf.len() - 1)
}

/// Select indices for a sorted list of points in `[0, 1)` with a single pass over the CDF.
fn select_sorted(cdf: &[f64], points: impl Iterator<Item = f64>) -> Vec<usize> {
    let mut indices = Vec::new();
    let mut i = 0;
    for u in points {
        while i < cdf.len() - 1 && cdf[i] <= u {
            i += 1;
        }
        indices.push(i);
    }
    indices
}

/// Multinomial resampling: `n` independent uniform draws, each located by binary search on the
/// cumulative weights.
pub fn multinomial_resample<R: Rng + ?Sized>(weights: &[f64], n: usize, rng: &mut R) -> Vec<usize> {
    if weights.is_empty() {
        return Vec::new();
    }
    let cdf = cumulative_weights(weights);
    (0..n).map(|_| select(&cdf, rng.random::<f64>())).collect()
}

/// Systematic resampling: a single draw `u₀ ~ U[0, 1/n)` and selection points `u₀ + k/n`.
pub fn systematic_resample<R: Rng + ?Sized>(weights: &[f64], n: usize, rng: &mut R) -> Vec<usize> {
    if weights.is_empty() {
        return Vec::new();
    }
    let cdf = cumulative_weights(weights);
    let offset = rng.random::<f64>();
    select_sorted(&cdf, (0..n).map(|k| (k as f64 + offset) / n as f64))
}

/// Stratified resampling: one independent draw per stratum `[k/n, (k+1)/n)`.
pub fn stratified_resample<R: Rng + ?Sized>(weights: &[f64], n: usize, rng: &mut R) -> Vec<usize> {
    if weights.is_empty() {
        return Vec::new();
    }
    let cdf = cumulative_weights(weights);
    let points: Vec<f64> = (0..n)
        .map(|k| (k as f64 + rng.random::<f64>()) / n as f64)
        .collect();
    select_sorted(&cdf, points.into_iter())
}

/// Residual resampling: particle `i` is copied `floor(n wᵢ)` times and the remaining slots are
/// filled by systematic selection on the residual weights `n wᵢ - floor(n wᵢ)`.
pub fn residual_resample<R: Rng + ?Sized>(weights: &[f64], n: usize, rng: &mut R) -> Vec<usize> {
    if weights.is_empty() {
        return Vec::new();
    }
    let mut indices = Vec::with_capacity(n);
    let mut residual = vec![0.0; weights.len()];
    for (i, &w) in weights.iter().enumerate() {
        let expected = w * n as f64;
        let copies = (expected.floor() as usize).min(n - indices.len());
        indices.extend(std::iter::repeat_n(i, copies));
        residual[i] = (expected - copies as f64).max(0.0);
    }
    let remaining = n - indices.len();
    if remaining > 0 {
        if residual.iter().sum::<f64>() > 0.0 {
            indices.extend(systematic_resample(&residual, remaining, rng));
        } else {
            indices.extend(systematic_resample(weights, remaining, rng));
        }
    }
    indices
}

/// Resample `belief` to `target_size` particles with `strategy`; the new weights are uniform.
///
/// # Errors
/// Fails without modifying the belief when the weights cannot be normalized or `target_size` is
/// zero.
pub fn resample_belief<R: Rng + ?Sized>(
    belief: &mut Belief,
    strategy: ResamplingStrategy,
    target_size: usize,
    rng: &mut R,
) -> FilterResult<()> {
    let weights = belief.normalized_weights()?;
    let indices = strategy.indices(&weights, target_size, rng)?;
    belief.resample_from_indices(&indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pose2D;
    use crate::particle::Particle;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const ALL: [ResamplingStrategy; 4] = [
        ResamplingStrategy::Multinomial,
        ResamplingStrategy::Systematic,
        ResamplingStrategy::Stratified,
        ResamplingStrategy::Residual,
    ];

    fn counts(indices: &[usize], len: usize) -> Vec<usize> {
        let mut counts = vec![0; len];
        for &i in indices {
            counts[i] += 1;
        }
        counts
    }

    #[test]
    fn systematic_keeps_a_uniform_population() {
        let mut rng = StdRng::seed_from_u64(7);
        let weights = vec![0.01; 100];
        let indices = systematic_resample(&weights, 100, &mut rng);
        assert_eq!(counts(&indices, 100), vec![1; 100]);
    }

    #[test]
    fn zero_weight_particles_are_never_selected() {
        let weights = [0.0, 0.5, 0.0, 0.0, 0.5, 0.0];
        for strategy in ALL {
            let mut rng = StdRng::seed_from_u64(3);
            let indices = strategy.indices(&weights, 50, &mut rng).unwrap();
            assert_eq!(indices.len(), 50);
            assert!(
                indices.iter().all(|&i| i == 1 || i == 4),
                "{:?} selected a zero-weight particle",
                strategy
            );
        }
    }

    #[test]
    fn selection_frequencies_follow_the_weights() {
        let weights = [0.1, 0.2, 0.3, 0.4];
        for strategy in ALL {
            let mut rng = StdRng::seed_from_u64(11);
            let indices = strategy.indices(&weights, 20_000, &mut rng).unwrap();
            let counts = counts(&indices, weights.len());
            for (count, weight) in counts.iter().zip(weights.iter()) {
                assert_approx_eq!(*count as f64 / 20_000.0, *weight, 0.02);
            }
        }
    }

    #[test]
    fn low_variance_strategies_are_within_one_of_expected_count() {
        let weights = [0.05, 0.15, 0.25, 0.55];
        for strategy in [ResamplingStrategy::Systematic, ResamplingStrategy::Residual] {
            let mut rng = StdRng::seed_from_u64(5);
            let indices = strategy.indices(&weights, 40, &mut rng).unwrap();
            for (count, weight) in counts(&indices, 4).iter().zip(weights.iter()) {
                let expected = weight * 40.0;
                assert!((*count as f64 - expected).abs() < 1.0 + 1e-9);
            }
        }
    }

    #[test]
    fn residual_copies_the_integer_part() {
        let mut rng = StdRng::seed_from_u64(2);
        let indices = residual_resample(&[0.5, 0.25, 0.25], 4, &mut rng);
        assert_eq!(counts(&indices, 3), vec![2, 1, 1]);
    }

    #[test]
    fn indices_can_resize_the_population() {
        let weights = [0.25; 4];
        for strategy in ALL {
            let mut rng = StdRng::seed_from_u64(9);
            assert_eq!(strategy.indices(&weights, 10, &mut rng).unwrap().len(), 10);
            assert_eq!(strategy.indices(&weights, 1, &mut rng).unwrap().len(), 1);
        }
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        let strategy = ResamplingStrategy::default();
        assert_eq!(strategy, ResamplingStrategy::Systematic);
        assert_eq!(strategy.indices(&[], 3, &mut rng), Err(FilterError::EmptyBelief));
        assert!(matches!(
            strategy.indices(&[1.0], 0, &mut rng),
            Err(FilterError::Configuration(_))
        ));
    }

    #[test]
    fn resampled_belief_has_uniform_weights() {
        let mut belief = Belief::from_particles(vec![
            Particle::new(Pose2D::new(0.0, 0.0, 0.0), -0.1),
            Particle::new(Pose2D::new(1.0, 0.0, 0.0), -5.0),
            Particle::new(Pose2D::new(2.0, 0.0, 0.0), f64::NEG_INFINITY),
        ])
        .unwrap();
        let mut rng = StdRng::seed_from_u64(21);
        resample_belief(&mut belief, ResamplingStrategy::Systematic, 6, &mut rng).unwrap();
        assert_eq!(belief.len(), 6);
        assert!(belief.iter().all(|p| p.pose.x < 2.0));
        for particle in belief.iter() {
            assert_approx_eq!(particle.log_weight, -(6.0_f64).ln(), 1e-12);
        }
        assert_approx_eq!(belief.effective_sample_size().unwrap(), 6.0, 1e-9);
    }

    #[test]
    fn strategies_parse_from_config_names() {
        let strategy: ResamplingStrategy = serde_json::from_str("\"stratified\"").unwrap();
        assert_eq!(strategy, ResamplingStrategy::Stratified);
    }
}
