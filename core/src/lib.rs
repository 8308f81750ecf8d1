//! Monte Carlo localization toolbox built around a generic particle filter
//!
//! This crate provides a Sequential Monte Carlo (particle filter) engine for estimating the pose of a mobile
//! agent from a stream of noisy motion increments (odometry) and sensor observations. The belief over the pose is
//! represented by a weighted population of pose hypotheses ("particles") that is iteratively predicted through a
//! motion model, reweighted by an observation likelihood, and resampled when the weights degenerate. This is the
//! classic Monte Carlo Localization (MCL) algorithm, specialized here for planar (2-D) poses.
//!
//! The crate does not define a map representation or a sensor model. Instead, the filter is generic over a small
//! set of capability traits and any occupancy grid, point cloud, or landmark map can participate in localization
//! by implementing them. A simple identified-landmark map ([landmarks::LandmarkMap]) is provided for testing,
//! simulation and as a worked example of the traits.
//!
//! This crate is primarily built off of three additional dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the linear algebra types for the statistics.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): Provides the
//!   seedable random streams used for motion noise and resampling.
//! - [`rayon`](https://crates.io/crates/rayon): Provides data parallelism for the per-particle prediction and
//!   weighting passes.
//!
//! ## Crate overview
//!
//! This crate is organized into several modules:
//! - [error]: The error type returned by every fallible filter operation.
//! - [motion]: Motion model trait and the standard odometry noise models.
//! - [observation]: Observation likelihood trait and the map capability trait it queries.
//! - [particle]: Particles, the belief (particle set) and its seeding strategies.
//! - [resampling]: Multinomial, systematic, stratified and residual resampling.
//! - [kld]: Kullback-Leibler divergence (KLD) bounded adaptive sample sizing.
//! - [stats]: Weighted mean, covariance and effective sample size of a belief.
//! - [filter]: The filter controller that runs one predict-weight-resample cycle per step.
//! - [landmarks]: A reference map capability made of identified point landmarks.
//! - [sim]: Scenario generation and result recording for simulations.
//!
//! ## Pose and state definitions
//!
//! The state estimated by the filter is the planar pose
//!
//! $$
//! x = [p_x, p_y, \phi]
//! $$
//!
//! where $p_x$ and $p_y$ are the position (meters) in the map frame and $\phi$ is the heading (radians) measured
//! counter-clockwise from the map $x$ axis. The heading is always kept in the range $[-\pi, \pi]$.
//!
//! Poses compose as rigid-body transforms. Given a pose $a$ and an increment $\delta$ expressed in the local frame
//! of $a$, the composition $a \oplus \delta$ is
//!
//! $$
//! a \oplus \delta = \begin{bmatrix} a_x + \delta_x \cos a_\phi - \delta_y \sin a_\phi \\\\ a_y + \delta_x \sin a_\phi + \delta_y \cos a_\phi \\\\ a_\phi + \delta_\phi \end{bmatrix}
//! $$
//!
//! and the inverse composition $b \ominus a$ returns the increment that takes $a$ to $b$. Odometry is delivered as
//! such increments, which makes the motion model independent of the global frame.
//!
//! ## Log-domain weights
//!
//! Each particle stores the logarithm of its importance weight. Observation likelihoods are therefore *added* to
//! the weights, which avoids underflow when many small likelihoods accumulate. The weights are only brought back
//! to linear space, after subtracting the maximum log-weight, when the belief is normalized for resampling or for
//! computing statistics:
//!
//! $$
//! w_i = \frac{\exp(\ell_i - \max_j \ell_j)}{\sum_k \exp(\ell_k - \max_j \ell_j)}
//! $$
pub mod error;
pub mod filter;
pub mod kld;
pub mod landmarks;
pub mod motion;
pub mod observation;
pub mod particle;
pub mod resampling;
pub mod sim;
pub mod stats;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use std::f64::consts::PI;
use std::fmt::{self, Debug, Display};

pub use error::{FilterError, FilterResult};

/// Planar rigid-body pose: position in meters and heading in radians.
///
/// `Pose2D` is an immutable value type. Every constructor and operation wraps the heading to
/// $[-\pi, \pi]$ so that two poses describing the same orientation compare equal.
#[derive(Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose2D {
    /// Position along the map x axis (m)
    pub x: f64,
    /// Position along the map y axis (m)
    pub y: f64,
    /// Heading, counter-clockwise from the map x axis (rad)
    pub phi: f64,
}
impl Debug for Pose2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pose2D")
            .field("x", &self.x)
            .field("y", &self.y)
            .field("phi", &self.phi)
            .finish()
    }
}
impl Display for Pose2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.3} m, {:.3} m, {:.2}°)",
            self.x,
            self.y,
            self.phi.to_degrees()
        )
    }
}
impl Pose2D {
    /// Create a new pose, wrapping the heading to $[-\pi, \pi]$.
    ///
    /// # Example
    /// ```rust
    /// use montecarlo::Pose2D;
    /// use std::f64::consts::PI;
    ///
    /// let pose = Pose2D::new(1.0, 2.0, 3.0 * PI / 2.0);
    /// assert_eq!(pose.x, 1.0);
    /// assert!((pose.phi + PI / 2.0).abs() < 1e-12);
    /// ```
    pub fn new(x: f64, y: f64, phi: f64) -> Pose2D {
        Pose2D {
            x,
            y,
            phi: wrap_to_pi(phi),
        }
    }
    /// Create a new pose with the heading given in degrees.
    pub fn from_degrees(x: f64, y: f64, phi_deg: f64) -> Pose2D {
        Pose2D::new(x, y, phi_deg.to_radians())
    }
    /// Compose this pose with an increment expressed in this pose's local frame ($a \oplus \delta$).
    ///
    /// # Example
    /// ```rust
    /// use montecarlo::Pose2D;
    /// use std::f64::consts::FRAC_PI_2;
    ///
    /// let start = Pose2D::new(1.0, 1.0, FRAC_PI_2);
    /// let end = start.compose(&Pose2D::new(2.0, 0.0, 0.0));
    /// assert!((end.x - 1.0).abs() < 1e-12);
    /// assert!((end.y - 3.0).abs() < 1e-12);
    /// ```
    pub fn compose(&self, delta: &Pose2D) -> Pose2D {
        let (sin_phi, cos_phi) = self.phi.sin_cos();
        Pose2D::new(
            self.x + delta.x * cos_phi - delta.y * sin_phi,
            self.y + delta.x * sin_phi + delta.y * cos_phi,
            self.phi + delta.phi,
        )
    }
    /// Increment that takes `reference` to this pose, expressed in the frame of `reference`
    /// ($b \ominus a$). This is the inverse of [`Pose2D::compose`]: `a.compose(&b.inverse_compose(&a)) == b`.
    pub fn inverse_compose(&self, reference: &Pose2D) -> Pose2D {
        let (sin_phi, cos_phi) = reference.phi.sin_cos();
        let dx = self.x - reference.x;
        let dy = self.y - reference.y;
        Pose2D::new(
            dx * cos_phi + dy * sin_phi,
            -dx * sin_phi + dy * cos_phi,
            self.phi - reference.phi,
        )
    }
    /// Euclidean norm of the translational part.
    pub fn norm(&self) -> f64 {
        self.x.hypot(self.y)
    }
    /// Euclidean distance between the translational parts of two poses.
    pub fn distance(&self, other: &Pose2D) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
    /// True when all three components are finite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.phi.is_finite()
    }
    /// The pose as an nalgebra vector `[x, y, phi]`.
    pub fn to_vector(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.phi)
    }
}
impl From<(f64, f64, f64)> for Pose2D {
    fn from(tuple: (f64, f64, f64)) -> Self {
        Pose2D::new(tuple.0, tuple.1, tuple.2)
    }
}
impl From<Vector3<f64>> for Pose2D {
    fn from(vector: Vector3<f64>) -> Self {
        Pose2D::new(vector[0], vector[1], vector[2])
    }
}
impl From<Pose2D> for Vector3<f64> {
    fn from(pose: Pose2D) -> Self {
        pose.to_vector()
    }
}

// --- Miscellaneous functions for wrapping angles ---
/// Wrap an angle to the range $\pm\pi$ radians
///
/// Angles already in range are returned unchanged, so both $-\pi$ and $\pi$ are kept as given.
/// Out-of-range angles are reduced in constant time and land in $(-\pi, \pi]$. Non-finite inputs
/// are returned unchanged.
///
/// # Example
/// ```rust
/// use montecarlo::wrap_to_pi;
/// use std::f64::consts::PI;
/// let angle = 3.0 * PI / 2.0; // radians
/// let wrapped_angle = wrap_to_pi(angle);
/// assert!((wrapped_angle + PI / 2.0).abs() < 1e-12);
/// ```
pub fn wrap_to_pi(angle: f64) -> f64 {
    if !angle.is_finite() || (-PI..=PI).contains(&angle) {
        return angle;
    }
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI { PI } else { wrapped }
}
/// Smallest signed difference `a - b` between two headings, in $[-\pi, \pi]$.
pub fn angle_difference(a: f64, b: f64) -> f64 {
    wrap_to_pi(a - b)
}
