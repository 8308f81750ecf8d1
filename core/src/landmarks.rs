//! Map of identified point landmarks observed through range and bearing.
//!
//! Each reading names the landmark it refers to, so there is no data association. Readings are
//! assumed independent with Gaussian range and bearing noise; the log-likelihood of a set of
//! readings is the sum of the unnormalized Gaussian log-densities of the residuals, so it is never
//! positive and equals zero when every reading matches exactly.
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use std::collections::HashMap;

use crate::observation::MapCapability;
use crate::particle::Region;
use crate::{FilterError, FilterResult, Pose2D, angle_difference, wrap_to_pi};

/// A point landmark with a unique identifier
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub id: usize,
    pub x: f64,
    pub y: f64,
}
impl Landmark {
    pub fn new(id: usize, x: f64, y: f64) -> Landmark {
        Landmark { id, x, y }
    }
}

/// Range (m) and bearing (rad, robot frame) to an identified landmark
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RangeBearing {
    pub landmark_id: usize,
    pub range: f64,
    pub bearing: f64,
}

/// Landmark map with a rectangular free space.
#[derive(Clone, Debug, PartialEq)]
pub struct LandmarkMap {
    landmarks: Vec<Landmark>,
    index: HashMap<usize, usize>,
    range_std: f64,
    bearing_std: f64,
    bounds: Region,
}
impl LandmarkMap {
    /// # Errors
    /// [`FilterError::Configuration`] for duplicate identifiers, non-finite positions or
    /// non-positive noise levels.
    pub fn new(
        landmarks: Vec<Landmark>,
        range_std: f64,
        bearing_std: f64,
        bounds: Region,
    ) -> FilterResult<LandmarkMap> {
        let usable = |value: f64| value > 0.0 && value.is_finite();
        if !(usable(range_std) && usable(bearing_std)) {
            return Err(FilterError::Configuration(format!(
                "sensor deviations must be positive, got range {} and bearing {}",
                range_std, bearing_std
            )));
        }
        bounds.validate()?;
        let mut index = HashMap::with_capacity(landmarks.len());
        for (i, landmark) in landmarks.iter().enumerate() {
            if !(landmark.x.is_finite() && landmark.y.is_finite()) {
                return Err(FilterError::Configuration(format!(
                    "landmark {} has a non-finite position",
                    landmark.id
                )));
            }
            if index.insert(landmark.id, i).is_some() {
                return Err(FilterError::Configuration(format!(
                    "duplicate landmark id {}",
                    landmark.id
                )));
            }
        }
        Ok(LandmarkMap {
            landmarks,
            index,
            range_std,
            bearing_std,
            bounds,
        })
    }
    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }
    pub fn landmark(&self, id: usize) -> Option<&Landmark> {
        self.index.get(&id).map(|&i| &self.landmarks[i])
    }
    pub fn bounds(&self) -> &Region {
        &self.bounds
    }
    /// Noise-free range and bearing of `landmark` seen from `pose`.
    pub fn expected_reading(pose: &Pose2D, landmark: &Landmark) -> (f64, f64) {
        let dx = landmark.x - pose.x;
        let dy = landmark.y - pose.y;
        ((dx * dx + dy * dy).sqrt(), wrap_to_pi(dy.atan2(dx) - pose.phi))
    }
    /// Simulated readings of every landmark within `max_range` of `pose`, with sensor noise.
    pub fn observe<R: Rng + ?Sized>(
        &self,
        pose: &Pose2D,
        max_range: f64,
        rng: &mut R,
    ) -> Vec<RangeBearing> {
        self.landmarks
            .iter()
            .filter_map(|landmark| {
                let (range, bearing) = Self::expected_reading(pose, landmark);
                if range > max_range {
                    return None;
                }
                let noise_r: f64 = StandardNormal.sample(rng);
                let noise_b: f64 = StandardNormal.sample(rng);
                Some(RangeBearing {
                    landmark_id: landmark.id,
                    range: (range + noise_r * self.range_std).max(0.0),
                    bearing: wrap_to_pi(bearing + noise_b * self.bearing_std),
                })
            })
            .collect()
    }
}

impl MapCapability for LandmarkMap {
    type Observation = Vec<RangeBearing>;

    fn log_likelihood(&self, pose: &Pose2D, readings: &Vec<RangeBearing>) -> FilterResult<f64> {
        let mut log_likelihood = 0.0;
        for reading in readings {
            if !(reading.range.is_finite() && reading.bearing.is_finite()) {
                return Err(FilterError::InvalidObservation(format!(
                    "reading of landmark {} is not finite",
                    reading.landmark_id
                )));
            }
            let landmark = self.landmark(reading.landmark_id).ok_or_else(|| {
                FilterError::InvalidObservation(format!(
                    "unknown landmark id {}",
                    reading.landmark_id
                ))
            })?;
            let (range, bearing) = Self::expected_reading(pose, landmark);
            let range_error = (reading.range - range) / self.range_std;
            let bearing_error = angle_difference(reading.bearing, bearing) / self.bearing_std;
            log_likelihood -= 0.5 * (range_error * range_error + bearing_error * bearing_error);
        }
        Ok(log_likelihood)
    }
    fn is_admissible(&self, pose: &Pose2D) -> bool {
        self.bounds.contains(pose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::f64::consts::FRAC_PI_2;

    fn map() -> LandmarkMap {
        LandmarkMap::new(
            vec![Landmark::new(0, 4.0, 8.0), Landmark::new(7, 6.0, 1.5)],
            0.05,
            0.05,
            Region::new(0.0, 10.0, 0.0, 10.0),
        )
        .unwrap()
    }

    #[test]
    fn expected_reading_is_in_the_robot_frame() {
        let (range, bearing) = LandmarkMap::expected_reading(
            &Pose2D::new(4.0, 5.0, FRAC_PI_2),
            &Landmark::new(0, 4.0, 8.0),
        );
        assert_approx_eq!(range, 3.0, 1e-12);
        assert_approx_eq!(bearing, 0.0, 1e-12);
    }

    #[test]
    fn exact_readings_have_zero_log_likelihood() {
        let map = map();
        let pose = Pose2D::new(3.0, 4.0, 0.3);
        let readings: Vec<RangeBearing> = map
            .landmarks()
            .iter()
            .map(|l| {
                let (range, bearing) = LandmarkMap::expected_reading(&pose, l);
                RangeBearing {
                    landmark_id: l.id,
                    range,
                    bearing,
                }
            })
            .collect();
        assert_approx_eq!(map.log_likelihood(&pose, &readings).unwrap(), 0.0, 1e-12);
        let shifted = Pose2D::new(3.2, 4.0, 0.3);
        assert!(map.log_likelihood(&shifted, &readings).unwrap() < -1.0);
        assert_eq!(map.log_likelihood(&pose, &Vec::new()).unwrap(), 0.0);
    }

    #[test]
    fn bearing_residuals_wrap() {
        let map = map();
        let pose = Pose2D::new(8.0, 8.0, 0.0);
        let (range, bearing) = LandmarkMap::expected_reading(&pose, &map.landmarks()[0]);
        assert_approx_eq!(bearing.abs(), std::f64::consts::PI, 1e-12);
        let reading = RangeBearing {
            landmark_id: 0,
            range,
            bearing: -bearing,
        };
        assert_approx_eq!(map.log_likelihood(&pose, &vec![reading]).unwrap(), 0.0, 1e-9);
    }

    #[test]
    fn unknown_or_malformed_readings_are_rejected() {
        let map = map();
        let pose = Pose2D::default();
        let unknown = vec![RangeBearing {
            landmark_id: 3,
            range: 1.0,
            bearing: 0.0,
        }];
        assert!(matches!(
            map.log_likelihood(&pose, &unknown),
            Err(FilterError::InvalidObservation(_))
        ));
        let nan = vec![RangeBearing {
            landmark_id: 0,
            range: f64::NAN,
            bearing: 0.0,
        }];
        assert!(matches!(
            map.log_likelihood(&pose, &nan),
            Err(FilterError::InvalidObservation(_))
        ));
    }

    #[test]
    fn construction_validates_inputs() {
        let region = Region::default();
        let duplicate = vec![Landmark::new(1, 0.0, 0.0), Landmark::new(1, 1.0, 1.0)];
        assert!(LandmarkMap::new(duplicate, 0.1, 0.1, region).is_err());
        assert!(LandmarkMap::new(vec![], 0.0, 0.1, region).is_err());
        assert!(LandmarkMap::new(vec![Landmark::new(0, f64::NAN, 0.0)], 0.1, 0.1, region).is_err());
    }

    #[test]
    fn simulated_readings_respect_max_range() {
        let map = map();
        let mut rng = StdRng::seed_from_u64(3);
        let pose = Pose2D::new(4.0, 7.0, 0.0);
        let readings = map.observe(&pose, 2.0, &mut rng);
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].landmark_id, 0);
        assert_approx_eq!(readings[0].range, 1.0, 0.25);
        assert!(map.is_admissible(&pose));
        assert!(!map.is_admissible(&Pose2D::new(-1.0, 5.0, 0.0)));
    }
}
