//! Orientation Estimator.
//!
//! Pitch/roll come from projecting the filtered acceleration onto the gravity
//! vector, or straight from the sensor when it reports orientation itself.
//! There is no gyro integration here: under sustained linear acceleration the
//! estimate is wrong, and that approximation is accepted.

use nalgebra::Vector3;

use crate::health_monitor::HealthMonitor;
use crate::types::{Axis, OrientationEstimate, Sample, SensorId, Tilt};

/// Gravity-vector projection, degrees. Expects gravity on +Z.
pub fn tilt_from_accel(accel: &Vector3<f64>) -> Tilt {
    let pitch = (-accel.x).atan2((accel.y * accel.y + accel.z * accel.z).sqrt());
    let roll = accel.y.atan2(accel.z);
    Tilt {
        pitch: pitch.to_degrees(),
        roll: roll.to_degrees(),
    }
}

/// Cyclic axis permutation that puts `gravity_axis` in the Z slot.
pub fn gravity_frame(accel: &Vector3<f64>, gravity_axis: Axis) -> Vector3<f64> {
    match gravity_axis {
        Axis::Z => *accel,
        Axis::X => Vector3::new(accel.y, accel.z, accel.x),
        Axis::Y => Vector3::new(accel.z, accel.x, accel.y),
    }
}

/// Reported orientation wins over the accelerometer when present.
pub fn tilt_of(sample: &Sample, gravity_axis: Axis) -> Tilt {
    match sample.orientation {
        Some(o) => Tilt { pitch: o.pitch, roll: o.roll },
        None => tilt_from_accel(&gravity_frame(&sample.accel, gravity_axis)),
    }
}

/// Euclidean magnitude of the pitch/roll differences between two nodes.
pub fn curvature(upper: Tilt, lower: Tilt) -> f64 {
    let dp = upper.pitch - lower.pitch;
    let dr = upper.roll - lower.roll;
    (dp * dp + dr * dr).sqrt()
}

/// Holds the latest filtered sample per sensor and turns them into an
/// estimate each tick. Freshness is judged by the [`HealthMonitor`], so the
/// health report and the estimate's validity always agree.
#[derive(Clone, Debug)]
pub struct OrientationEstimator {
    gravity_axis: Axis,
    latest: Vec<Option<Sample>>,
}

impl OrientationEstimator {
    pub fn new(sensor_count: usize, gravity_axis: Axis) -> Self {
        Self {
            gravity_axis,
            latest: vec![None; sensor_count],
        }
    }

    /// Last arrival wins. A timestamp behind the stored one means the
    /// source clock restarted, and the stored sample is no longer current.
    pub fn update(&mut self, sample: Sample) {
        let sensor = sample.sensor;
        match self.latest.get_mut(sensor) {
            Some(slot) => {
                if let Some(current) = slot.as_ref().filter(|c| c.timestamp_ms > sample.timestamp_ms) {
                    log::info!(
                        "[orient] sensor {} clock went back {}ms -> {}ms",
                        sensor,
                        current.timestamp_ms,
                        sample.timestamp_ms
                    );
                }
                *slot = Some(sample);
            }
            None => log::debug!("[orient] sample for unconfigured sensor {} ignored", sensor),
        }
    }

    fn is_usable(&self, sensor: SensorId, now_ms: u64, health: &HealthMonitor) -> bool {
        match self.latest.get(sensor) {
            Some(Some(s)) => s.valid && health.channel(sensor).is_some_and(|c| c.is_fresh(now_ms)),
            _ => false,
        }
    }

    /// Valid only when every configured sensor has a valid, fresh sample.
    pub fn estimate(&self, now_ms: u64, health: &HealthMonitor) -> OrientationEstimate {
        let newest = self
            .latest
            .iter()
            .flatten()
            .map(|s| s.timestamp_ms)
            .max()
            .unwrap_or(0);

        let stale: Vec<SensorId> = (0..self.latest.len())
            .filter(|&s| !self.is_usable(s, now_ms, health))
            .collect();
        if !stale.is_empty() {
            log::debug!("[orient] stale or missing sensors {:?} at {}ms", stale, now_ms);
            return OrientationEstimate::invalid(self.latest.len(), newest);
        }

        let tilts: Vec<Tilt> = self
            .latest
            .iter()
            .flatten()
            .map(|s| tilt_of(s, self.gravity_axis))
            .collect();

        let curvature = match tilts.as_slice() {
            [upper, lower] => Some(curvature(*upper, *lower)),
            _ => None,
        };

        OrientationEstimate {
            tilts,
            curvature,
            timestamp_ms: newest,
            valid: true,
        }
    }

    pub fn reset(&mut self) {
        self.latest.iter_mut().for_each(|slot| *slot = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Orientation;
    use approx::assert_relative_eq;

    const G: f64 = 9.81;

    fn accel_sample(sensor: SensorId, ts: u64, accel: Vector3<f64>) -> Sample {
        Sample::from_imu(sensor, ts, accel, Vector3::zeros())
    }

    #[test]
    fn test_level_sensor_reads_zero() {
        let tilt = tilt_from_accel(&Vector3::new(0.0, 0.0, G));
        assert_relative_eq!(tilt.pitch, 0.0);
        assert_relative_eq!(tilt.roll, 0.0);
    }

    #[test]
    fn test_projection_angles() {
        let p = 30f64.to_radians();
        let forward = tilt_from_accel(&Vector3::new(-G * p.sin(), 0.0, G * p.cos()));
        assert_relative_eq!(forward.pitch, 30.0, epsilon = 1e-9);
        assert_relative_eq!(forward.roll, 0.0, epsilon = 1e-9);

        let side = tilt_from_accel(&Vector3::new(0.0, G, G));
        assert_relative_eq!(side.roll, 45.0, epsilon = 1e-9);
        assert_relative_eq!(side.pitch, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_gravity_frame_moves_axis_to_z() {
        let v = Vector3::new(G, 0.1, 0.2);
        assert_eq!(gravity_frame(&v, Axis::X).z, G);
        let v = Vector3::new(0.1, G, 0.2);
        assert_eq!(gravity_frame(&v, Axis::Y).z, G);
    }

    #[test]
    fn test_curvature_is_euclidean() {
        let upper = Tilt { pitch: 10.0, roll: 4.0 };
        let lower = Tilt { pitch: 7.0, roll: 0.0 };
        assert_relative_eq!(curvature(upper, lower), 5.0);
        assert_relative_eq!(curvature(lower, upper), 5.0);
    }

    #[test]
    fn test_reported_orientation_preferred() {
        let mut s = Sample::from_orientation(0, 0, Orientation { roll: -3.0, pitch: 12.0, yaw: 90.0 });
        s.accel = Vector3::new(G, 0.0, 0.0);
        let tilt = tilt_of(&s, Axis::Z);
        assert_eq!((tilt.pitch, tilt.roll), (12.0, -3.0));
    }

    /// Estimator and monitor fed the same samples, as the engine does.
    struct Rig {
        est: OrientationEstimator,
        health: HealthMonitor,
    }

    impl Rig {
        fn new(sensors: usize) -> Self {
            Rig {
                est: OrientationEstimator::new(sensors, Axis::Z),
                health: HealthMonitor::new(sensors, 500),
            }
        }

        fn feed(&mut self, sample: Sample) {
            self.health.record(&sample);
            self.est.update(sample);
        }

        fn estimate(&self, now_ms: u64) -> OrientationEstimate {
            self.est.estimate(now_ms, &self.health)
        }
    }

    #[test]
    fn test_single_sensor_estimate() {
        let mut rig = Rig::new(1);
        assert!(!rig.estimate(0).valid);
        rig.feed(accel_sample(0, 1_000, Vector3::new(0.0, 0.0, G)));
        let e = rig.estimate(1_100);
        assert!(e.valid);
        assert_eq!(e.curvature, None);
        assert_eq!(e.timestamp_ms, 1_000);
    }

    #[test]
    fn test_stale_channel_invalidates() {
        let mut rig = Rig::new(1);
        rig.feed(accel_sample(0, 1_000, Vector3::new(0.0, 0.0, G)));
        assert!(rig.estimate(1_500).valid);
        assert!(!rig.estimate(1_501).valid);
        assert!(!rig.health.check_health(1_501).all_healthy());
    }

    #[test]
    fn test_dual_needs_both_channels() {
        let mut rig = Rig::new(2);
        rig.feed(Sample::from_orientation(0, 100, Orientation { roll: 0.0, pitch: 8.0, yaw: 0.0 }));
        assert!(!rig.estimate(150).valid);

        rig.feed(Sample::from_orientation(1, 120, Orientation { roll: 0.0, pitch: 2.0, yaw: 0.0 }));
        let e = rig.estimate(150);
        assert!(e.valid);
        assert_eq!(e.timestamp_ms, 120);
        assert_relative_eq!(e.curvature.unwrap(), 6.0);

        let mut bad = Sample::from_orientation(1, 130, Orientation::default());
        bad.valid = false;
        rig.feed(bad);
        assert!(!rig.estimate(150).valid);
    }

    #[test]
    fn test_clock_restart_replaces_stored_sample() {
        let mut rig = Rig::new(1);
        rig.feed(accel_sample(0, 1_500, Vector3::new(0.0, 0.0, G)));
        assert!(rig.estimate(1_500).valid);

        // source restarted: clock back near zero, now pitched forward
        let p = 40f64.to_radians();
        rig.feed(accel_sample(0, 100, Vector3::new(-G * p.sin(), 0.0, G * p.cos())));
        let e = rig.estimate(100);
        assert!(e.valid);
        assert_relative_eq!(e.primary().pitch, 40.0, epsilon = 1e-9);
    }

    #[test]
    fn test_sample_from_the_future_is_not_fresh() {
        let mut rig = Rig::new(1);
        rig.feed(accel_sample(0, 1_500, Vector3::new(0.0, 0.0, G)));
        assert!(!rig.estimate(200).valid);
    }
}
