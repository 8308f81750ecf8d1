//! Motion models for propagating particles with odometry.
//!
//! A motion model maps a prior pose and an action record (here an odometry increment) to a sample
//! from the distribution over the next pose. Sampling is a pure function of its inputs and the
//! random stream that is passed in, so a fixed seed and call order always reproduce the same poses.
//!
//! Two standard odometry noise models are provided:
//! - [`GaussianOdometryModel`]: the nominal increment is perturbed with independent Gaussian noise on
//!   translation and rotation whose standard deviation grows linearly with the size of the motion.
//! - [`ThrunOdometryModel`]: the increment is decomposed into an initial rotation, a translation and
//!   a final rotation, each perturbed separately (Probabilistic Robotics, table 5.6).
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::{FilterError, FilterResult, Pose2D};

/// Translations shorter than this are treated as pure rotations by the Thrun model.
const MIN_TRANSLATION_FOR_HEADING: f64 = 0.01;

/// Generic motion model trait used to propagate particles
///
/// Implementations must be side-effect free apart from consuming draws from `rng`, and must be
/// `Sync` so that the filter can sample particles from several threads.
pub trait MotionModel: Sync {
    /// The action record consumed by the model (e.g. an odometry increment).
    type Action: Sync;
    /// Sample the next pose of a particle given its prior pose and the action.
    ///
    /// # Errors
    /// Returns [`FilterError::InvalidAction`] when the action encodes an invalid transform.
    fn sample_next<R: Rng + ?Sized>(
        &self,
        pose: &Pose2D,
        action: &Self::Action,
        rng: &mut R,
    ) -> FilterResult<Pose2D>;
    /// Check the model parameters before a filter session is created.
    ///
    /// # Errors
    /// Returns [`FilterError::Configuration`] for parameters that cannot produce valid samples.
    fn validate(&self) -> FilterResult<()> {
        Ok(())
    }
}

/// Odometry increment expressed in the robot frame at the start of the motion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OdometryAction {
    pub delta: Pose2D,
}
impl OdometryAction {
    pub fn new(dx: f64, dy: f64, dphi: f64) -> OdometryAction {
        OdometryAction {
            delta: Pose2D::new(dx, dy, dphi),
        }
    }
    /// Build the increment between two consecutive odometry readings.
    pub fn from_odometry(previous: &Pose2D, current: &Pose2D) -> OdometryAction {
        OdometryAction {
            delta: current.inverse_compose(previous),
        }
    }
    fn validate(&self) -> FilterResult<()> {
        if self.delta.is_finite() {
            Ok(())
        } else {
            Err(FilterError::InvalidAction(format!(
                "odometry increment is not finite: {:?}",
                self.delta
            )))
        }
    }
}

/// Gaussian odometry noise model
///
/// The nominal increment $\delta$ is perturbed with zero-mean Gaussian noise before composing it
/// with the prior pose:
///
/// $$
/// \sigma_{xy} = \sigma_{xy,min} + \alpha_{tt} |\delta_{xy}| + \alpha_{rt} |\delta_\phi|
/// $$
///
/// $$
/// \sigma_{\phi} = \sigma_{\phi,min} + \alpha_{tr} |\delta_{xy}| + \alpha_{rr} |\delta_\phi|
/// $$
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaussianOdometryModel {
    /// Translation noise per meter travelled (m/m)
    pub alpha_trans_trans: f64,
    /// Translation noise per radian turned (m/rad)
    pub alpha_rot_trans: f64,
    /// Rotation noise per meter travelled (rad/m)
    pub alpha_trans_rot: f64,
    /// Rotation noise per radian turned (rad/rad)
    pub alpha_rot_rot: f64,
    /// Floor on the translation standard deviation (m)
    pub min_std_xy: f64,
    /// Floor on the rotation standard deviation (rad)
    pub min_std_phi: f64,
}
impl Default for GaussianOdometryModel {
    fn default() -> Self {
        GaussianOdometryModel {
            alpha_trans_trans: 0.05,
            alpha_rot_trans: 0.001_f64.to_degrees(),
            alpha_trans_rot: 5.0_f64.to_radians(),
            alpha_rot_rot: 0.05,
            min_std_xy: 0.01,
            min_std_phi: 0.2_f64.to_radians(),
        }
    }
}
impl GaussianOdometryModel {
    /// Standard deviations `(sigma_xy, sigma_phi)` used for an increment.
    pub fn noise_std(&self, delta: &Pose2D) -> (f64, f64) {
        let translation = delta.norm();
        let rotation = delta.phi.abs();
        (
            self.min_std_xy
                + self.alpha_trans_trans * translation
                + self.alpha_rot_trans * rotation,
            self.min_std_phi + self.alpha_trans_rot * translation + self.alpha_rot_rot * rotation,
        )
    }
}
impl MotionModel for GaussianOdometryModel {
    type Action = OdometryAction;

    fn sample_next<R: Rng + ?Sized>(
        &self,
        pose: &Pose2D,
        action: &OdometryAction,
        rng: &mut R,
    ) -> FilterResult<Pose2D> {
        action.validate()?;
        let (std_xy, std_phi) = self.noise_std(&action.delta);
        let noise_x: f64 = StandardNormal.sample(rng);
        let noise_y: f64 = StandardNormal.sample(rng);
        let noise_phi: f64 = StandardNormal.sample(rng);
        let perturbed = Pose2D::new(
            action.delta.x + noise_x * std_xy,
            action.delta.y + noise_y * std_xy,
            action.delta.phi + noise_phi * std_phi,
        );
        Ok(pose.compose(&perturbed))
    }
    /// Every noise parameter must be finite and non-negative.
    fn validate(&self) -> FilterResult<()> {
        validate_noise_parameters(&[
            ("alpha_trans_trans", self.alpha_trans_trans),
            ("alpha_rot_trans", self.alpha_rot_trans),
            ("alpha_trans_rot", self.alpha_trans_rot),
            ("alpha_rot_rot", self.alpha_rot_rot),
            ("min_std_xy", self.min_std_xy),
            ("min_std_phi", self.min_std_phi),
        ])
    }
}

/// Odometry motion model from Thrun, Burgard and Fox
///
/// The increment is decomposed into `rot1 = atan2(dy, dx)`, `trans = |(dx, dy)|` and
/// `rot2 = dphi - rot1`. Each component is perturbed with noise whose standard deviation is a
/// linear combination of the rotation and translation magnitudes, plus a constant floor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrunOdometryModel {
    /// Rotation noise per radian turned
    pub alpha1_rot_rot: f64,
    /// Rotation noise per meter travelled (rad/m)
    pub alpha2_rot_trans: f64,
    /// Translation noise per meter travelled
    pub alpha3_trans_trans: f64,
    /// Translation noise per radian turned (m/rad)
    pub alpha4_trans_rot: f64,
    /// Additive translation standard deviation (m)
    pub additional_std_xy: f64,
    /// Additive rotation standard deviation (rad)
    pub additional_std_phi: f64,
}
impl Default for ThrunOdometryModel {
    fn default() -> Self {
        ThrunOdometryModel {
            alpha1_rot_rot: 0.05,
            alpha2_rot_trans: 4.0_f64.to_radians(),
            alpha3_trans_trans: 0.01,
            alpha4_trans_rot: 0.0001_f64.to_degrees(),
            additional_std_xy: 0.001,
            additional_std_phi: 0.05_f64.to_radians(),
        }
    }
}
impl MotionModel for ThrunOdometryModel {
    type Action = OdometryAction;

    fn sample_next<R: Rng + ?Sized>(
        &self,
        pose: &Pose2D,
        action: &OdometryAction,
        rng: &mut R,
    ) -> FilterResult<Pose2D> {
        action.validate()?;
        let delta = action.delta;
        let trans = delta.norm();
        let rot1 = if trans < MIN_TRANSLATION_FOR_HEADING {
            0.0
        } else {
            delta.y.atan2(delta.x)
        };
        let rot2 = crate::angle_difference(delta.phi, rot1);

        let std_rot1 = self.alpha1_rot_rot * rot1.abs() + self.alpha2_rot_trans * trans;
        let std_trans = self.alpha3_trans_trans * trans
            + self.alpha4_trans_rot * (rot1.abs() + rot2.abs());
        let std_rot2 = self.alpha1_rot_rot * rot2.abs() + self.alpha2_rot_trans * trans;

        let n_rot1: f64 = StandardNormal.sample(rng);
        let n_trans: f64 = StandardNormal.sample(rng);
        let n_rot2: f64 = StandardNormal.sample(rng);
        let rot1_hat = rot1 + n_rot1 * std_rot1;
        let trans_hat = trans + n_trans * std_trans;
        let rot2_hat = rot2 + n_rot2 * std_rot2;

        let heading = pose.phi + rot1_hat;
        let n_x: f64 = StandardNormal.sample(rng);
        let n_y: f64 = StandardNormal.sample(rng);
        let n_phi: f64 = StandardNormal.sample(rng);
        Ok(Pose2D::new(
            pose.x + trans_hat * heading.cos() + n_x * self.additional_std_xy,
            pose.y + trans_hat * heading.sin() + n_y * self.additional_std_xy,
            pose.phi + rot1_hat + rot2_hat + n_phi * self.additional_std_phi,
        ))
    }
    fn validate(&self) -> FilterResult<()> {
        validate_noise_parameters(&[
            ("alpha1_rot_rot", self.alpha1_rot_rot),
            ("alpha2_rot_trans", self.alpha2_rot_trans),
            ("alpha3_trans_trans", self.alpha3_trans_trans),
            ("alpha4_trans_rot", self.alpha4_trans_rot),
            ("additional_std_xy", self.additional_std_xy),
            ("additional_std_phi", self.additional_std_phi),
        ])
    }
}

/// Configurable choice between the odometry models, for configuration files and the CLI.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OdometryMotionModel {
    Gaussian(GaussianOdometryModel),
    Thrun(ThrunOdometryModel),
}
impl Default for OdometryMotionModel {
    fn default() -> Self {
        OdometryMotionModel::Gaussian(GaussianOdometryModel::default())
    }
}
impl MotionModel for OdometryMotionModel {
    type Action = OdometryAction;

    fn sample_next<R: Rng + ?Sized>(
        &self,
        pose: &Pose2D,
        action: &OdometryAction,
        rng: &mut R,
    ) -> FilterResult<Pose2D> {
        match self {
            OdometryMotionModel::Gaussian(model) => model.sample_next(pose, action, rng),
            OdometryMotionModel::Thrun(model) => model.sample_next(pose, action, rng),
        }
    }
    fn validate(&self) -> FilterResult<()> {
        match self {
            OdometryMotionModel::Gaussian(model) => model.validate(),
            OdometryMotionModel::Thrun(model) => model.validate(),
        }
    }
}

fn validate_noise_parameters(parameters: &[(&str, f64)]) -> FilterResult<()> {
    for (name, value) in parameters {
        if !value.is_finite() || *value < 0.0 {
            return Err(FilterError::Configuration(format!(
                "motion noise parameter `{}` must be finite and non-negative, got {}",
                name, value
            )));
        }
    }
    Ok(())
}
