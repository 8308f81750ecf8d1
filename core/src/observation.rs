//! Observation likelihood models and the map capability they query.
//!
//! The filter never inspects a map. Anything that can answer "how likely is this observation from
//! this pose" and "is this pose admissible" implements [`MapCapability`], and the filter is generic
//! over it. An [`ObservationModel`] sits between the filter and the map and turns a pose, an
//! observation record and a map into a log-likelihood. [`MapLikelihood`] is the default model and
//! simply delegates to the map, optionally tempering the likelihood.
use crate::{FilterError, FilterResult, Pose2D};

/// Read-only map capability used for weighting and seeding
///
/// Implementations must not mutate the map while answering queries; the filter may call them from
/// several threads at once.
pub trait MapCapability: Sync {
    /// The observation record scored against the map.
    type Observation: Sync;
    /// Log-likelihood of `observation` taken from `pose`. By convention the value is at most 0;
    /// `f64::NEG_INFINITY` denotes an impossible pose.
    ///
    /// # Errors
    /// Returns [`FilterError::InvalidObservation`] when the observation cannot be interpreted.
    fn log_likelihood(&self, pose: &Pose2D, observation: &Self::Observation) -> FilterResult<f64>;
    /// Whether `pose` lies in the admissible (free) space of the map. Used for seeding.
    fn is_admissible(&self, _pose: &Pose2D) -> bool {
        true
    }
}

/// Generic observation likelihood trait
///
/// `M` is the map type the model is evaluated against. Models must be side-effect free.
pub trait ObservationModel<M: ?Sized>: Sync {
    /// The observation record consumed by the model.
    type Observation: Sync;
    /// Log-likelihood of `observation` given that the agent is at `pose` in `map`.
    fn log_likelihood(
        &self,
        pose: &Pose2D,
        observation: &Self::Observation,
        map: &M,
    ) -> FilterResult<f64>;
}

/// Observation model that delegates to the map capability.
///
/// The map log-likelihood is multiplied by `exponent` (likelihood tempering). An exponent below one
/// flattens the likelihood, which keeps more particles alive when the sensor model is overconfident.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MapLikelihood {
    pub exponent: f64,
}
impl Default for MapLikelihood {
    fn default() -> Self {
        MapLikelihood { exponent: 1.0 }
    }
}
impl MapLikelihood {
    pub fn new(exponent: f64) -> FilterResult<MapLikelihood> {
        if !exponent.is_finite() || exponent <= 0.0 {
            return Err(FilterError::Configuration(format!(
                "likelihood exponent must be finite and positive, got {}",
                exponent
            )));
        }
        Ok(MapLikelihood { exponent })
    }
}
impl<M: MapCapability + ?Sized> ObservationModel<M> for MapLikelihood {
    type Observation = M::Observation;

    fn log_likelihood(
        &self,
        pose: &Pose2D,
        observation: &M::Observation,
        map: &M,
    ) -> FilterResult<f64> {
        let log_likelihood = map.log_likelihood(pose, observation)?;
        if log_likelihood.is_nan() {
            return Err(FilterError::InvalidObservation(format!(
                "map returned an undefined likelihood at {}",
                pose
            )));
        }
        if log_likelihood == f64::NEG_INFINITY {
            return Ok(log_likelihood);
        }
        Ok(self.exponent * log_likelihood)
    }
}
