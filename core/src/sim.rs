//! Simulation helpers: synthetic landmark scenarios and localization results.
//!
//! A scenario drives a robot along a straight (optionally curving) path through a landmark map,
//! producing noisy odometry increments and range/bearing readings alongside the ground truth. The
//! records can be fed to a [`ParticleFilter`] with [`run_scenario`], which produces one
//! [`LocalizationResult`] row per step that can be written to CSV for analysis.
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::filter::{ParticleFilter, config_extension};
use crate::landmarks::{Landmark, LandmarkMap, RangeBearing};
use crate::motion::{MotionModel, OdometryAction};
use crate::observation::ObservationModel;
use crate::particle::Region;
use crate::{FilterResult, Pose2D, angle_difference};

/// Parameters of a synthetic landmark scenario
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub seed: u64,
    pub num_steps: usize,
    /// Distance travelled per step (m)
    pub step_length: f64,
    /// Heading change per step (rad)
    pub turn_per_step: f64,
    /// Standard deviation of the odometry translation error per step (m)
    pub odometry_std_xy: f64,
    /// Standard deviation of the odometry heading error per step (rad)
    pub odometry_std_phi: f64,
    pub range_std: f64,
    pub bearing_std: f64,
    /// Landmarks farther than this are not observed (m)
    pub max_range: f64,
    pub start: Pose2D,
    pub bounds: Region,
    pub landmarks: Vec<Landmark>,
}
impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            seed: 7,
            num_steps: 100,
            step_length: 0.05,
            turn_per_step: 0.0,
            odometry_std_xy: 0.005,
            odometry_std_phi: 0.002,
            range_std: 0.05,
            bearing_std: 0.05,
            max_range: 20.0,
            start: Pose2D::new(2.0, 5.0, 0.0),
            bounds: Region::new(0.0, 10.0, 0.0, 10.0),
            landmarks: vec![Landmark::new(0, 4.0, 8.0), Landmark::new(1, 6.0, 1.5)],
        }
    }
}
impl ScenarioConfig {
    /// Read a scenario, choosing the format by file extension (.json/.yaml/.yml/.toml).
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        match config_extension(p).as_deref() {
            Some("json") => serde_json::from_reader(File::open(p)?).map_err(io::Error::other),
            Some("yaml") | Some("yml") => {
                serde_yaml::from_reader(File::open(p)?).map_err(io::Error::other)
            }
            Some("toml") => toml::from_str(&std::fs::read_to_string(p)?).map_err(io::Error::other),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
    /// Write the scenario in the format given by the file extension (.json/.yaml/.yml/.toml).
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        let s = match config_extension(p).as_deref() {
            Some("json") => serde_json::to_string_pretty(self).map_err(io::Error::other)?,
            Some("yaml") | Some("yml") => serde_yaml::to_string(self).map_err(io::Error::other)?,
            Some("toml") => toml::to_string(self).map_err(io::Error::other)?,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "unsupported file extension",
                ));
            }
        };
        File::create(p)?.write_all(s.as_bytes())
    }
}

/// Generated scenario: the map, the true poses and the sensor records.
#[derive(Clone, Debug)]
pub struct Scenario {
    pub map: LandmarkMap,
    /// True pose before the first step and after every step (`num_steps + 1` entries)
    pub ground_truth: Vec<Pose2D>,
    /// Noisy odometry increment and the readings taken at the end of each step
    pub records: Vec<(OdometryAction, Vec<RangeBearing>)>,
}

/// Generate the scenario described by `config`.
pub fn generate_scenario(config: &ScenarioConfig) -> FilterResult<Scenario> {
    let map = LandmarkMap::new(
        config.landmarks.clone(),
        config.range_std,
        config.bearing_std,
        config.bounds,
    )?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let true_delta = Pose2D::new(config.step_length, 0.0, config.turn_per_step);
    let mut pose = config.start;
    let mut ground_truth = Vec::with_capacity(config.num_steps + 1);
    let mut records = Vec::with_capacity(config.num_steps);
    ground_truth.push(pose);
    for _ in 0..config.num_steps {
        pose = pose.compose(&true_delta);
        let n_x: f64 = StandardNormal.sample(&mut rng);
        let n_y: f64 = StandardNormal.sample(&mut rng);
        let n_phi: f64 = StandardNormal.sample(&mut rng);
        let odometry = OdometryAction::new(
            true_delta.x + n_x * config.odometry_std_xy,
            true_delta.y + n_y * config.odometry_std_xy,
            true_delta.phi + n_phi * config.odometry_std_phi,
        );
        let readings = map.observe(&pose, config.max_range, &mut rng);
        ground_truth.push(pose);
        records.push((odometry, readings));
    }
    log::debug!(
        "Generated scenario with {} steps and {} landmarks",
        config.num_steps,
        config.landmarks.len()
    );
    Ok(Scenario {
        map,
        ground_truth,
        records,
    })
}

/// Per-step comparison of the filter estimate against ground truth
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalizationResult {
    pub step: u64,
    pub true_x: f64,
    pub true_y: f64,
    pub true_phi_deg: f64,
    pub est_x: f64,
    pub est_y: f64,
    pub est_phi_deg: f64,
    pub position_error: f64,
    pub heading_error_deg: f64,
    pub std_xy: f64,
    pub std_phi_deg: f64,
    pub effective_sample_size: f64,
    pub particle_count: usize,
    pub resampled: bool,
}
impl LocalizationResult {
    /// Reads localization results from a CSV file.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>, Box<dyn std::error::Error>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for result in rdr.deserialize() {
            let record: Self = result?;
            records.push(record);
        }
        Ok(records)
    }
    /// Writes localization results to a CSV file with a header row.
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Feed every record of `scenario` to `filter` and compare each estimate with the ground truth.
pub fn run_scenario<MM, OM>(
    filter: &mut ParticleFilter<MM, OM>,
    scenario: &Scenario,
) -> FilterResult<Vec<LocalizationResult>>
where
    MM: MotionModel<Action = OdometryAction>,
    OM: ObservationModel<LandmarkMap, Observation = Vec<RangeBearing>>,
{
    let mut results = Vec::with_capacity(scenario.records.len());
    let truths = scenario.ground_truth.iter().skip(1);
    for ((action, readings), truth) in scenario.records.iter().zip(truths) {
        let stats = filter.step(action, readings, &scenario.map)?;
        let resampled = filter
            .last_step_statistics()
            .is_some_and(|s| s.resampled);
        let result = LocalizationResult {
            step: filter.steps_completed(),
            true_x: truth.x,
            true_y: truth.y,
            true_phi_deg: truth.phi.to_degrees(),
            est_x: stats.mean.x,
            est_y: stats.mean.y,
            est_phi_deg: stats.mean.phi.to_degrees(),
            position_error: stats.mean.distance(truth),
            heading_error_deg: angle_difference(stats.mean.phi, truth.phi).to_degrees(),
            std_xy: stats.position_std(),
            std_phi_deg: stats.heading_std().to_degrees(),
            effective_sample_size: stats.effective_sample_size,
            particle_count: stats.particle_count,
            resampled,
        };
        log::info!(
            "Step {:>4}: error {:.3} m / {:.2}°, std {:.3} m, {} particles",
            result.step,
            result.position_error,
            result.heading_error_deg,
            result.std_xy,
            result.particle_count
        );
        results.push(result);
    }
    Ok(results)
}
