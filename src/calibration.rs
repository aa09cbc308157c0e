//! Still-pose zero-offset calibration.
//!
//! The offset is the per-axis mean of N consecutive still samples, except on
//! the gravity-bearing accelerometer axis, whose offset is forced to zero so
//! the raw gravity magnitude stays available as the orientation reference.

use nalgebra::Vector3;

use crate::error::CalibrationFailure;
use crate::types::{Axis, Sample, SensorId};

#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationOffset {
    pub sensor: SensorId,
    pub accel: Vector3<f64>,
    pub gyro: Vector3<f64>,
    pub gravity_axis: Axis,
    /// Raw mean on the gravity axis (kept, not subtracted).
    pub gravity_reference: f64,
    pub sample_count: usize,
}

impl CalibrationOffset {
    pub fn zero(sensor: SensorId, gravity_axis: Axis) -> Self {
        Self {
            sensor,
            accel: Vector3::zeros(),
            gyro: Vector3::zeros(),
            gravity_axis,
            gravity_reference: 0.0,
            sample_count: 0,
        }
    }
}

/// Mean of each accel and gyro axis over `samples`, gravity axis zeroed.
pub fn compute_offset(sensor: SensorId, samples: &[Sample], gravity_axis: Axis) -> CalibrationOffset {
    if samples.is_empty() {
        return CalibrationOffset::zero(sensor, gravity_axis);
    }

    let n = samples.len() as f64;
    let accel_mean = samples.iter().fold(Vector3::zeros(), |acc, s| acc + s.accel) / n;
    let gyro_mean = samples.iter().fold(Vector3::zeros(), |acc, s| acc + s.gyro) / n;

    let g = gravity_axis.index();
    let gravity_reference = accel_mean[g];
    let mut accel = accel_mean;
    accel[g] = 0.0;

    CalibrationOffset {
        sensor,
        accel,
        gyro: gyro_mean,
        gravity_axis,
        gravity_reference,
        sample_count: samples.len(),
    }
}

/// Per-axis subtraction. Total: never fails.
pub fn apply(sample: &Sample, offset: &CalibrationOffset) -> Sample {
    let mut corrected = sample.clone();
    corrected.accel = sample.accel - offset.accel;
    corrected.gyro = sample.gyro - offset.gyro;
    corrected
}

#[derive(Clone, Debug, PartialEq)]
pub enum CalibrationProgress {
    Collecting { collected: usize, target: usize },
    Complete(CalibrationOffset),
}

/// Collects N consecutive still samples for one sensor.
///
/// A window that turns out not to be still is thrown away and collection
/// starts over; the timeout decides when to give up.
#[derive(Clone, Debug)]
pub struct Calibrator {
    sensor: SensorId,
    target: usize,
    gravity_axis: Axis,
    accel_tolerance: f64,
    orientation_tolerance: f64,
    timeout_ms: u64,
    window: Vec<Sample>,
    started_at_ms: Option<u64>,
    samples_seen: u64,
    restarts: u32,
}

impl Calibrator {
    pub fn new(
        sensor: SensorId,
        target: usize,
        gravity_axis: Axis,
        accel_tolerance: f64,
        orientation_tolerance: f64,
        timeout_ms: u64,
    ) -> Self {
        Self {
            sensor,
            target: target.max(1),
            gravity_axis,
            accel_tolerance,
            orientation_tolerance,
            timeout_ms,
            window: Vec::with_capacity(target),
            started_at_ms: None,
            samples_seen: 0,
            restarts: 0,
        }
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Start the timeout clock (first call wins).
    pub fn start(&mut self, now_ms: u64) {
        self.started_at_ms.get_or_insert(now_ms);
    }

    pub fn push(&mut self, sample: &Sample) -> CalibrationProgress {
        if !sample.valid {
            return self.progress();
        }
        self.samples_seen += 1;
        self.window.push(sample.clone());

        if self.window.len() < self.target {
            return self.progress();
        }

        if self.is_still() {
            let offset = compute_offset(self.sensor, &self.window, self.gravity_axis);
            self.window.clear();
            CalibrationProgress::Complete(offset)
        } else {
            self.restarts += 1;
            log::debug!(
                "[calib] sensor {} moved during still-pose, restarting window ({} restarts)",
                self.sensor,
                self.restarts
            );
            self.window.clear();
            self.progress()
        }
    }

    /// Fails once the timeout has elapsed without a completed window.
    pub fn check_timeout(&self, now_ms: u64) -> Result<(), CalibrationFailure> {
        let Some(started) = self.started_at_ms else {
            return Ok(());
        };
        if now_ms.saturating_sub(started) <= self.timeout_ms {
            return Ok(());
        }
        if self.samples_seen == 0 {
            Err(CalibrationFailure::NotResponding)
        } else {
            Err(CalibrationFailure::Unstable)
        }
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.started_at_ms = None;
        self.samples_seen = 0;
        self.restarts = 0;
    }

    fn progress(&self) -> CalibrationProgress {
        CalibrationProgress::Collecting {
            collected: self.window.len(),
            target: self.target,
        }
    }

    fn is_still(&self) -> bool {
        let reports_orientation = self.window.iter().all(|s| s.orientation.is_some());
        if reports_orientation {
            // Yaw wraps at ±180 and drifts; stillness is judged on pitch/roll.
            let pitch = std_dev(self.window.iter().filter_map(|s| s.orientation.map(|o| o.pitch)));
            let roll = std_dev(self.window.iter().filter_map(|s| s.orientation.map(|o| o.roll)));
            pitch <= self.orientation_tolerance && roll <= self.orientation_tolerance
        } else {
            (0..3).all(|axis| std_dev(self.window.iter().map(|s| s.accel[axis])) <= self.accel_tolerance)
        }
    }
}

fn std_dev(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let (count, sum) = values.clone().fold((0usize, 0.0), |(n, s), v| (n + 1, s + v));
    if count == 0 {
        return 0.0;
    }
    let mean = sum / count as f64;
    let var = values.map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Orientation;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn still_samples(n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| {
                let wobble = ((i % 5) as f64 - 2.0) * 0.01;
                Sample::from_imu(
                    0,
                    i as u64 * 100,
                    Vector3::new(0.42 + wobble, -0.17 - wobble, 9.78 + wobble),
                    Vector3::new(0.003, -0.002 + wobble, 0.001),
                )
            })
            .collect()
    }

    #[test]
    fn test_offset_is_axis_mean_with_gravity_zeroed() {
        let samples = still_samples(100);
        let offset = compute_offset(0, &samples, Axis::Z);
        assert_relative_eq!(offset.accel.x, 0.42, epsilon = 1e-9);
        assert_relative_eq!(offset.accel.y, -0.17, epsilon = 1e-9);
        assert_eq!(offset.accel.z, 0.0);
        assert_relative_eq!(offset.gravity_reference, 9.78, epsilon = 1e-9);
        assert_relative_eq!(offset.gyro.x, 0.003, epsilon = 1e-12);
        assert_eq!(offset.sample_count, 100);
    }

    #[test]
    fn test_calibrate_then_apply_zeroes_non_gravity_axes() {
        let samples = still_samples(100);
        let offset = compute_offset(0, &samples, Axis::Z);
        let corrected: Vec<Sample> = samples.iter().map(|s| apply(s, &offset)).collect();
        let n = corrected.len() as f64;
        let accel_mean = corrected.iter().fold(Vector3::zeros(), |acc, s| acc + s.accel) / n;
        let gyro_mean = corrected.iter().fold(Vector3::zeros(), |acc, s| acc + s.gyro) / n;
        let raw_z_mean = samples.iter().map(|s| s.accel.z).sum::<f64>() / n;

        assert_abs_diff_eq!(accel_mean.x, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(accel_mean.y, 0.0, epsilon = 1e-9);
        assert_eq!(accel_mean.z, raw_z_mean);
        assert_abs_diff_eq!(gyro_mean.norm(), 0.0, epsilon = 1e-9);
        for (raw, fixed) in samples.iter().zip(&corrected) {
            assert_eq!(raw.accel.z, fixed.accel.z);
        }
    }

    #[test]
    fn test_gravity_axis_is_configurable() {
        let samples: Vec<Sample> = (0..10)
            .map(|i| Sample::from_imu(0, i, Vector3::new(9.8, 0.1, 0.2), Vector3::zeros()))
            .collect();
        let offset = compute_offset(0, &samples, Axis::X);
        assert_eq!(offset.accel.x, 0.0);
        assert_relative_eq!(offset.accel.z, 0.2);
    }

    #[test]
    fn test_calibrator_completes_after_n_still_samples() {
        let mut calib = Calibrator::new(0, 100, Axis::Z, 0.5, 2.0, 30_000);
        let samples = still_samples(100);
        for s in &samples[..99] {
            assert!(matches!(calib.push(s), CalibrationProgress::Collecting { .. }));
        }
        match calib.push(&samples[99]) {
            CalibrationProgress::Complete(offset) => assert_eq!(offset.sample_count, 100),
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[test]
    fn test_moving_window_restarts() {
        let mut calib = Calibrator::new(0, 4, Axis::Z, 0.5, 2.0, 30_000);
        let jolts = [0.0, 5.0, -5.0, 0.0];
        for (i, j) in jolts.iter().enumerate() {
            let s = Sample::from_imu(0, i as u64, Vector3::new(*j, 0.0, 9.8), Vector3::zeros());
            assert!(matches!(calib.push(&s), CalibrationProgress::Collecting { .. }));
        }
        assert_eq!(calib.restarts(), 1);
    }

    #[test]
    fn test_orientation_stillness_ignores_yaw() {
        let mut calib = Calibrator::new(1, 3, Axis::Z, 0.5, 2.0, 30_000);
        let yaws = [-179.0, 179.0, 0.0];
        let mut last = None;
        for (i, yaw) in yaws.iter().enumerate() {
            let o = Orientation { roll: 1.0, pitch: 2.0, yaw: *yaw };
            last = Some(calib.push(&Sample::from_orientation(1, i as u64, o)));
        }
        assert!(matches!(last, Some(CalibrationProgress::Complete(_))));
    }

    #[test]
    fn test_timeout_reasons() {
        let mut calib = Calibrator::new(0, 10, Axis::Z, 0.5, 2.0, 1_000);
        assert!(calib.check_timeout(50_000).is_ok()); // clock not started
        calib.start(0);
        assert!(calib.check_timeout(1_000).is_ok());
        assert_eq!(calib.check_timeout(1_001), Err(CalibrationFailure::NotResponding));

        calib.push(&still_samples(1)[0]);
        assert_eq!(calib.check_timeout(1_001), Err(CalibrationFailure::Unstable));

        calib.reset();
        calib.start(2_000);
        assert!(calib.check_timeout(2_500).is_ok());
    }
}
