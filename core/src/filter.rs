//! Monte Carlo Localization controller
//!
//! [`ParticleFilter`] owns a [`Belief`] and drives one predict, weight, (maybe) resample cycle per
//! call to [`ParticleFilter::step`]:
//!
//! 1. *Predicting*: every particle pose is replaced by a sample of the motion model.
//! 2. *Weighting*: the observation log-likelihood is added to every log-weight, and the weights are
//!    normalized.
//! 3. *Resampling*: when the effective sample size drops below `ess_threshold · N` (or on a fixed
//!    period), the population is redrawn with the configured strategy, or with KLD-sampling when it
//!    is configured.
//!
//! Prediction and weighting are computed into scratch buffers and committed together, so a step
//! that fails leaves the belief exactly as it was and does not advance the step counter. All
//! randomness derives from the configured seed: prediction uses per-particle sub-streams keyed by
//! `(seed, step, particle)` and resampling uses the session generator, so a session is reproducible
//! regardless of whether particles are processed in parallel.
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use std::fmt::{self, Debug};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::kld::{KldConfig, kld_resample};
use crate::motion::MotionModel;
use crate::observation::{MapCapability, ObservationModel};
use crate::particle::{Belief, Region, Seeding, substream_seed};
use crate::resampling::{ResamplingStrategy, resample_belief};
use crate::stats::{ParticleAveragingStrategy, StatsSnapshot, weight_variance};
use crate::{FilterError, FilterResult, Pose2D};

/// Filter configuration
///
/// Serializable so that sessions can be configured from JSON, YAML or TOML files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Seed of every random stream used by the session
    pub seed: u64,
    /// Strategy used by ESS/periodic resampling and by [`ParticleFilter::resize_hint`]
    pub resampling_strategy: ResamplingStrategy,
    /// Resample when `ESS / N` falls below this fraction; 0 disables the ESS trigger
    pub ess_threshold: f64,
    /// Additionally resample every this many steps
    pub resample_every: Option<usize>,
    pub averaging_strategy: ParticleAveragingStrategy,
    /// Process particles with rayon
    pub parallel: bool,
    /// Keep the mean pose of every step
    pub record_path: bool,
    /// Draw budget per particle for free-space seeding
    pub max_seeding_attempts_per_particle: usize,
    /// Adaptive particle count; replaces `resampling_strategy` when set
    pub kld: Option<KldConfig>,
}
impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            seed: 42,
            resampling_strategy: ResamplingStrategy::default(),
            ess_threshold: 0.5,
            resample_every: None,
            averaging_strategy: ParticleAveragingStrategy::default(),
            parallel: false,
            record_path: false,
            max_seeding_attempts_per_particle: 1000,
            kld: None,
        }
    }
}
impl FilterConfig {
    pub fn validate(&self) -> FilterResult<()> {
        if !(0.0..=1.0).contains(&self.ess_threshold) {
            return Err(FilterError::Configuration(format!(
                "ess_threshold must lie in [0, 1], got {}",
                self.ess_threshold
            )));
        }
        if self.resample_every == Some(0) {
            return Err(FilterError::Configuration(
                "resample_every must be at least 1".to_string(),
            ));
        }
        if self.max_seeding_attempts_per_particle == 0 {
            return Err(FilterError::Configuration(
                "max_seeding_attempts_per_particle must be at least 1".to_string(),
            ));
        }
        if let Some(kld) = &self.kld {
            kld.validate()?;
        }
        Ok(())
    }
    /// Write the configuration as pretty-printed JSON.
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let s = std::fs::read_to_string(path)?;
        toml::from_str(&s).map_err(io::Error::other)
    }
    /// Write the configuration in the format given by the file extension (.json/.yaml/.yml/.toml).
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        match config_extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
    /// Read a configuration, choosing the format by file extension (.json/.yaml/.yml/.toml).
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        match config_extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
}

pub(crate) fn config_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

/// Phase of the step cycle the controller is in.
///
/// Between calls the controller is always `Idle`; the other phases are only visible in logs and
/// while a step is running.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FilterPhase {
    #[default]
    Idle,
    Predicting,
    Weighting,
    Resampling,
}

/// Diagnostics of a completed step
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepStatistics {
    /// One-based index of the step
    pub step: u64,
    pub ess_before_resample: f64,
    pub weight_variance_before_resample: f64,
    pub resampled: bool,
    pub particles_before: usize,
    pub particles_after: usize,
}

/// Particle filter session for one agent.
pub struct ParticleFilter<MM, OM> {
    config: FilterConfig,
    belief: Belief,
    motion_model: MM,
    observation_model: OM,
    rng: StdRng,
    phase: FilterPhase,
    steps_completed: u64,
    last_step: Option<StepStatistics>,
    path: Vec<Pose2D>,
}
impl<MM, OM> Debug for ParticleFilter<MM, OM> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = StatsSnapshot::from_belief(&self.belief, self.config.averaging_strategy);
        let mut s = f.debug_struct("ParticleFilter");
        s.field("num_particles", &self.belief.len())
            .field("steps_completed", &self.steps_completed)
            .field("phase", &self.phase);
        if let Ok(stats) = stats {
            s.field("effective_particles", &stats.effective_sample_size)
                .field("mean_pose", &format_args!("{}", stats.mean))
                .field(
                    "std",
                    &format_args!(
                        "({:.4} m, {:.3}°)",
                        stats.position_std(),
                        stats.heading_std().to_degrees()
                    ),
                );
        }
        s.finish()
    }
}
impl<MM: MotionModel, OM> ParticleFilter<MM, OM> {
    /// Create a session with a belief built from `seeding`.
    ///
    /// # Errors
    /// [`FilterError::Configuration`] when the configuration, the motion model parameters or the
    /// seeding are invalid.
    pub fn new(
        config: FilterConfig,
        seeding: &Seeding,
        motion_model: MM,
        observation_model: OM,
    ) -> FilterResult<Self> {
        config.validate()?;
        motion_model.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let belief = seeding.build(&mut rng)?;
        Ok(Self::with_belief(config, belief, rng, motion_model, observation_model))
    }
    /// Create a session whose `count` particles are drawn uniformly from the admissible part of
    /// `region` in `map`.
    pub fn new_in_free_space<M: MapCapability + ?Sized>(
        config: FilterConfig,
        region: &Region,
        count: usize,
        map: &M,
        motion_model: MM,
        observation_model: OM,
    ) -> FilterResult<Self> {
        config.validate()?;
        motion_model.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut belief = Belief::new();
        belief.seed_free_space(
            count,
            region,
            map,
            config.max_seeding_attempts_per_particle,
            &mut rng,
        )?;
        Ok(Self::with_belief(config, belief, rng, motion_model, observation_model))
    }
    fn with_belief(
        config: FilterConfig,
        mut belief: Belief,
        rng: StdRng,
        motion_model: MM,
        observation_model: OM,
    ) -> Self {
        belief.set_parallel(config.parallel);
        log::info!(
            "Created particle filter with {} particles (seed {}, {:?} resampling{})",
            belief.len(),
            config.seed,
            config.resampling_strategy,
            if config.kld.is_some() { ", KLD sizing" } else { "" }
        );
        let mut filter = ParticleFilter {
            config,
            belief,
            motion_model,
            observation_model,
            rng,
            phase: FilterPhase::Idle,
            steps_completed: 0,
            last_step: None,
            path: Vec::new(),
        };
        filter.record_mean();
        filter
    }

    /// Run one predict, weight and resample cycle and return the resulting statistics.
    ///
    /// # Errors
    /// - [`FilterError::InvalidAction`] / [`FilterError::InvalidObservation`] for malformed records.
    /// - [`FilterError::DegenerateWeights`] when no particle can explain the observation. The
    ///   belief is unchanged and the caller decides whether to re-seed ([`ParticleFilter::reseed`])
    ///   or to skip the observation.
    pub fn step<M>(
        &mut self,
        action: &MM::Action,
        observation: &<OM as ObservationModel<M>>::Observation,
        map: &M,
    ) -> FilterResult<StatsSnapshot>
    where
        OM: ObservationModel<M>,
        M: Sync + ?Sized,
    {
        let result = self.try_step(action, observation, map);
        self.phase = FilterPhase::Idle;
        if let Err(e) = &result {
            log::warn!("Step {} rejected: {}", self.steps_completed + 1, e);
        }
        result
    }
    fn try_step<M>(
        &mut self,
        action: &MM::Action,
        observation: &<OM as ObservationModel<M>>::Observation,
        map: &M,
    ) -> FilterResult<StatsSnapshot>
    where
        OM: ObservationModel<M>,
        M: Sync + ?Sized,
    {
        if self.belief.is_empty() {
            return Err(FilterError::EmptyBelief);
        }
        let step = self.steps_completed + 1;

        self.phase = FilterPhase::Predicting;
        let stream_seed = substream_seed(self.config.seed, step);
        let poses = self.belief.predict_poses(action, &self.motion_model, stream_seed)?;

        self.phase = FilterPhase::Weighting;
        let log_weights = self
            .belief
            .score_poses(&poses, observation, &self.observation_model, map)?;
        self.belief.commit(poses, log_weights);
        let weights = self.belief.normalize()?;
        log::trace!(
            "Step {}: weighted {} particles, max weight {:.4e}",
            step,
            weights.len(),
            weights.iter().copied().fold(0.0, f64::max)
        );

        let particles_before = self.belief.len();
        let ess = crate::particle::effective_sample_size(&weights);
        let variance = weight_variance(&weights);
        let periodic = self
            .config
            .resample_every
            .is_some_and(|every| step % every as u64 == 0);
        let resampled = periodic || ess < self.config.ess_threshold * particles_before as f64;
        if resampled {
            self.phase = FilterPhase::Resampling;
            self.resample()?;
        }

        self.steps_completed = step;
        let statistics = StepStatistics {
            step,
            ess_before_resample: ess,
            weight_variance_before_resample: variance,
            resampled,
            particles_before,
            particles_after: self.belief.len(),
        };
        log::debug!(
            "Step {}: ESS {:.1}/{}{}",
            step,
            ess,
            particles_before,
            if resampled {
                format!(", resampled to {}", statistics.particles_after)
            } else {
                String::new()
            }
        );
        self.last_step = Some(statistics);
        let snapshot = self.snapshot()?;
        if self.config.record_path {
            self.path.push(snapshot.mean);
        }
        Ok(snapshot)
    }
    fn resample(&mut self) -> FilterResult<()> {
        match &self.config.kld {
            Some(kld) => kld_resample(&mut self.belief, kld, &mut self.rng).map(|_| ()),
            None => {
                let n = self.belief.len();
                resample_belief(&mut self.belief, self.config.resampling_strategy, n, &mut self.rng)
            }
        }
    }
    /// Process `(action, observation)` records in order, stopping at the first error.
    pub fn run<M, I>(&mut self, records: I, map: &M) -> FilterResult<Vec<StatsSnapshot>>
    where
        OM: ObservationModel<M>,
        M: Sync + ?Sized,
        I: IntoIterator<Item = (MM::Action, <OM as ObservationModel<M>>::Observation)>,
    {
        records
            .into_iter()
            .map(|(action, observation)| self.step(&action, &observation, map))
            .collect()
    }
    /// Current statistics of the belief.
    pub fn snapshot(&self) -> FilterResult<StatsSnapshot> {
        StatsSnapshot::from_belief(&self.belief, self.config.averaging_strategy)
    }
    /// Point estimate of the current belief.
    pub fn estimate(&self) -> FilterResult<Pose2D> {
        Ok(self.snapshot()?.mean)
    }
    /// Resample the belief to `n` particles with the configured strategy.
    ///
    /// Ignored when KLD-sampling controls the particle count.
    pub fn resize_hint(&mut self, n: usize) -> FilterResult<()> {
        if n == 0 {
            return Err(FilterError::Configuration(
                "cannot resize the belief to zero particles".to_string(),
            ));
        }
        if self.config.kld.is_some() {
            log::warn!("Ignoring resize to {} particles: KLD sampling sets the particle count", n);
            return Ok(());
        }
        resample_belief(&mut self.belief, self.config.resampling_strategy, n, &mut self.rng)?;
        log::debug!("Resized belief to {} particles", n);
        Ok(())
    }
    /// Replace the belief, e.g. after [`FilterError::DegenerateWeights`]. The step counter and
    /// path history are kept.
    pub fn reseed(&mut self, seeding: &Seeding) -> FilterResult<()> {
        let belief = seeding.build(&mut self.rng)?;
        self.belief = belief.with_parallelism(self.config.parallel);
        log::info!("Re-seeded belief with {} particles", self.belief.len());
        Ok(())
    }
    fn record_mean(&mut self) {
        if !self.config.record_path {
            return;
        }
        if let Ok(mean) = self.estimate() {
            self.path.push(mean);
        }
    }
    pub fn belief(&self) -> &Belief {
        &self.belief
    }
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }
    pub fn phase(&self) -> FilterPhase {
        self.phase
    }
    /// Number of successfully completed steps.
    pub fn steps_completed(&self) -> u64 {
        self.steps_completed
    }
    pub fn last_step_statistics(&self) -> Option<&StepStatistics> {
        self.last_step.as_ref()
    }
    /// Mean poses of the initial belief and of every completed step, when `record_path` is set.
    pub fn path(&self) -> &[Pose2D] {
        &self.path
    }
    pub fn motion_model(&self) -> &MM {
        &self.motion_model
    }
    pub fn observation_model(&self) -> &OM {
        &self.observation_model
    }
}
