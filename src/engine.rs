// engine.rs - Pure tick pipeline for the posture tracker
//
// Nothing in here touches tokio, serial ports, files or effector pins. Samples
// go in through `ingest`, and each `tick` runs
//   Calibrator -> Filter -> Estimator -> Classifier -> {Alert, Statistics}
// once, returning what happened. The binaries wrap this with I/O; tests and
// the replay tool drive it directly with recorded or synthetic samples.

use serde::Serialize;

use crate::alert::{AlertController, AlertEvent, AlertPhase};
use crate::calibration::{self, CalibrationOffset, CalibrationProgress, Calibrator};
use crate::classifier::Classifier;
use crate::config::EngineConfig;
use crate::error::{CalibrationFailure, PostureError, Result};
use crate::filters::SampleFilter;
use crate::health_monitor::{HealthMonitor, HealthReport};
use crate::orientation::OrientationEstimator;
use crate::statistics::SessionStatistics;
use crate::types::{OrientationEstimate, PostureState, Sample, SensorId};

// ─── Phase ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum EnginePhase {
    /// Still-pose collection for one sensor; sensors go one at a time.
    Calibrating { sensor: SensorId },
    Running,
    /// Terminal until a re-calibration is requested.
    Failed { sensor: SensorId, reason: CalibrationFailure },
}

// ─── Tick output ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct TickReport {
    pub phase: EnginePhase,
    /// Sensors whose calibration finished during this tick.
    pub calibrated: Vec<CalibrationOffset>,
    /// None while calibrating.
    pub estimate: Option<OrientationEstimate>,
    /// Current posture; held from the last valid tick when this one was not.
    pub posture: Option<PostureState>,
    pub alert: Option<AlertEvent>,
    /// True only when this tick produced a fresh classification.
    pub classified: bool,
}

impl TickReport {
    fn calibrating(phase: EnginePhase, calibrated: Vec<CalibrationOffset>) -> Self {
        Self {
            phase,
            calibrated,
            estimate: None,
            posture: None,
            alert: None,
            classified: false,
        }
    }
}

// ─── The engine ──────────────────────────────────────────────────────────────

pub struct PostureEngine {
    phase: EnginePhase,

    // Calibration
    calibrators: Vec<Calibrator>,
    offsets: Vec<Option<CalibrationOffset>>,

    // Signal path
    filters: Vec<SampleFilter>,
    estimator: OrientationEstimator,
    health: HealthMonitor,
    classifier: Classifier,

    // Session state
    alert: AlertController,
    stats: SessionStatistics,
    posture: Option<PostureState>,

    pending: Vec<Sample>,
}

impl PostureEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let count = config.sensor_count();

        let calibrators = (0..count)
            .map(|s| {
                Calibrator::new(
                    s,
                    config.calibration_samples,
                    config.gravity_axis,
                    config.still_accel_tolerance,
                    config.still_orientation_tolerance,
                    config.calibration_timeout_ms,
                )
            })
            .collect();

        Ok(Self {
            phase: EnginePhase::Calibrating { sensor: 0 },
            calibrators,
            offsets: vec![None; count],
            filters: (0..count).map(|_| SampleFilter::new(config.filter)).collect(),
            estimator: OrientationEstimator::new(count, config.gravity_axis),
            health: HealthMonitor::new(count, config.max_sample_age_ms),
            classifier: Classifier::for_mode(config.mode, &config.thresholds, &config.curvature_bands),
            alert: AlertController::new(config.alert_delay_ms),
            stats: SessionStatistics::new(),
            posture: None,
            pending: Vec::new(),
        })
    }

    // ── Input ────────────────────────────────────────────────────────────

    /// Queue a raw sample for the next tick.
    pub fn ingest(&mut self, sample: Sample) {
        self.pending.push(sample);
    }

    pub fn ingest_all(&mut self, samples: impl IntoIterator<Item = Sample>) {
        self.pending.extend(samples);
    }

    // ── Per-tick ─────────────────────────────────────────────────────────

    pub fn tick(&mut self, now_ms: u64) -> Result<TickReport> {
        if let EnginePhase::Failed { sensor, reason } = self.phase {
            self.pending.clear();
            return Err(PostureError::CalibrationFailed { sensor, reason });
        }

        let samples = std::mem::take(&mut self.pending);
        let mut calibrated = Vec::new();
        // A phase change takes effect on the next tick; the rest of this
        // batch belongs to the phase it arrived in.
        let phase = self.phase;

        for sample in samples {
            self.health.record(&sample);
            match phase {
                EnginePhase::Calibrating { sensor } if self.phase == phase => {
                    if let Some(offset) = self.calibrate(sensor, &sample, now_ms) {
                        calibrated.push(offset);
                    }
                }
                EnginePhase::Running => self.feed(sample),
                _ => {}
            }
        }

        if let EnginePhase::Calibrating { sensor } = self.phase {
            let calibrator = &mut self.calibrators[sensor];
            calibrator.start(now_ms);
            if let Err(reason) = calibrator.check_timeout(now_ms) {
                log::error!("[calib] sensor {} calibration failed: {}", sensor, reason);
                self.phase = EnginePhase::Failed { sensor, reason };
                return Err(PostureError::CalibrationFailed { sensor, reason });
            }
            return Ok(TickReport::calibrating(self.phase, calibrated));
        }

        let estimate = self.estimator.estimate(now_ms, &self.health);
        self.health.check_health(now_ms);

        if !estimate.valid {
            // Stale or missing channel: hold the previous posture, touch nothing.
            return Ok(TickReport {
                phase: self.phase,
                calibrated,
                estimate: Some(estimate),
                posture: self.posture,
                alert: None,
                classified: false,
            });
        }

        let state = self.classifier.classify(&estimate);
        if self.posture != Some(state) {
            log::debug!(
                "[posture] {} -> {}",
                self.posture.map_or("none", PostureState::label),
                state
            );
        }
        self.posture = Some(state);
        let alert = self.alert.update(state, estimate.timestamp_ms);
        self.stats.record(state);

        Ok(TickReport {
            phase: self.phase,
            calibrated,
            estimate: Some(estimate),
            posture: Some(state),
            alert,
            classified: true,
        })
    }

    /// Throw away offsets and filter history and go back to still-pose
    /// collection. Session statistics survive.
    pub fn request_recalibration(&mut self) {
        log::info!("[calib] re-calibration requested");
        self.phase = EnginePhase::Calibrating { sensor: 0 };
        self.calibrators.iter_mut().for_each(Calibrator::reset);
        self.offsets.iter_mut().for_each(|o| *o = None);
        self.filters.iter_mut().for_each(SampleFilter::reset);
        self.estimator.reset();
        self.health.reset();
        self.alert.reset();
        self.posture = None;
        self.pending.clear();
    }

    pub fn restart_session(&mut self) {
        self.stats.reset();
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == EnginePhase::Running
    }

    pub fn posture(&self) -> Option<PostureState> {
        self.posture
    }

    pub fn alert_phase(&self) -> AlertPhase {
        self.alert.phase()
    }

    pub fn statistics(&self) -> &SessionStatistics {
        &self.stats
    }

    pub fn offset(&self, sensor: SensorId) -> Option<&CalibrationOffset> {
        self.offsets.get(sensor).and_then(Option::as_ref)
    }

    pub fn health_report(&mut self, now_ms: u64) -> HealthReport {
        self.health.check_health(now_ms)
    }

    pub fn health_status(&self, now_ms: u64) -> String {
        self.health.format_status(now_ms)
    }

    /// How long the current bad episode has lasted, if one is running.
    pub fn alert_elapsed_ms(&self, now_ms: u64) -> Option<u64> {
        self.alert.elapsed_ms(now_ms)
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn calibrate(&mut self, current: SensorId, sample: &Sample, now_ms: u64) -> Option<CalibrationOffset> {
        if sample.sensor != current {
            log::trace!("[calib] sample from sensor {} dropped, calibrating {}", sample.sensor, current);
            return None;
        }
        let calibrator = &mut self.calibrators[current];
        calibrator.start(now_ms);

        match calibrator.push(sample) {
            CalibrationProgress::Collecting { .. } => None,
            CalibrationProgress::Complete(offset) => {
                log::info!(
                    "[calib] sensor {} done: accel offset ({:.3}, {:.3}, {:.3}), gyro offset ({:.4}, {:.4}, {:.4}), gravity ref {:.3} ({} restarts)",
                    current,
                    offset.accel.x,
                    offset.accel.y,
                    offset.accel.z,
                    offset.gyro.x,
                    offset.gyro.y,
                    offset.gyro.z,
                    offset.gravity_reference,
                    calibrator.restarts()
                );
                self.offsets[current] = Some(offset.clone());

                let next = current + 1;
                self.phase = if next < self.calibrators.len() {
                    self.calibrators[next].start(now_ms);
                    log::info!("[calib] hold still: calibrating sensor {}", next);
                    EnginePhase::Calibrating { sensor: next }
                } else {
                    log::info!("[calib] all sensors calibrated");
                    EnginePhase::Running
                };
                Some(offset)
            }
        }
    }

    fn feed(&mut self, sample: Sample) {
        let sensor = sample.sensor;
        if !sample.valid {
            self.estimator.update(sample);
            return;
        }
        let (Some(offset), Some(filter)) = (
            self.offsets.get(sensor).and_then(Option::as_ref),
            self.filters.get_mut(sensor),
        ) else {
            log::debug!("[engine] sample for unconfigured sensor {} ignored", sensor);
            return;
        };
        let corrected = calibration::apply(&sample, offset);
        self.estimator.update(filter.apply(&corrected));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilterStrategy, RecordFormat, SensorMode};
    use crate::types::Orientation;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    const G: f64 = 9.81;

    fn bias() -> Vector3<f64> {
        Vector3::new(0.3, -0.2, 0.0)
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            calibration_samples: 5,
            calibration_timeout_ms: 2_000,
            filter: FilterStrategy::MovingAverage { window: 1 },
            alert_delay_ms: 3_000,
            ..EngineConfig::default()
        }
    }

    /// Raw accel of a sensor pitched forward by `pitch_deg`, plus a fixed bias.
    fn tilted(sensor: SensorId, ts: u64, pitch_deg: f64) -> Sample {
        let p = pitch_deg.to_radians();
        let accel = Vector3::new(-G * p.sin(), 0.0, G * p.cos()) + bias();
        Sample::from_imu(sensor, ts, accel, Vector3::new(0.01, 0.0, 0.0))
    }

    fn step(engine: &mut PostureEngine, samples: Vec<Sample>, now: u64) -> TickReport {
        engine.ingest_all(samples);
        engine.tick(now).unwrap()
    }

    /// Calibrate a single-sensor engine; returns the next free timestamp.
    fn calibrated_single(config: EngineConfig) -> (PostureEngine, u64) {
        let mut engine = PostureEngine::new(config).unwrap();
        let mut t = 0;
        while !engine.is_running() {
            step(&mut engine, vec![tilted(0, t, 0.0)], t);
            t += 100;
            assert!(t < 2_000, "calibration never finished");
        }
        (engine, t)
    }

    #[test]
    fn test_no_classification_before_calibration() {
        let mut engine = PostureEngine::new(test_config()).unwrap();
        for t in 0..4u64 {
            let report = step(&mut engine, vec![tilted(0, t * 100, 0.0)], t * 100);
            assert_eq!(report.phase, EnginePhase::Calibrating { sensor: 0 });
            assert!(!report.classified);
            assert_eq!(report.posture, None);
        }
        let report = step(&mut engine, vec![tilted(0, 400, 0.0)], 400);
        assert_eq!(report.phase, EnginePhase::Running);
        assert_eq!(report.calibrated.len(), 1);
        assert_eq!(engine.statistics().total_ticks, 0);
    }

    #[test]
    fn test_offset_removes_bias_before_estimation() {
        let (mut engine, t) = calibrated_single(test_config());
        let offset = engine.offset(0).unwrap();
        assert_relative_eq!(offset.accel.x, 0.3, epsilon = 1e-9);
        assert_eq!(offset.accel.z, 0.0);

        let report = step(&mut engine, vec![tilted(0, t, 0.0)], t);
        assert!(report.classified);
        assert_eq!(report.posture, Some(PostureState::Good));
        let tilt = report.estimate.unwrap().primary();
        assert_relative_eq!(tilt.pitch, 0.0, epsilon = 1e-9);
        assert_relative_eq!(tilt.roll, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_forward_head_warns_then_escalates() {
        let (mut engine, start) = calibrated_single(test_config());
        let mut events = Vec::new();
        for i in 0..6u64 {
            let t = start + i * 1_000;
            let report = step(&mut engine, vec![tilted(0, t, 35.0)], t);
            assert_eq!(report.posture, Some(PostureState::ForwardHead));
            if let Some(e) = report.alert {
                events.push((i, e));
            }
        }
        assert_eq!(
            events,
            vec![
                (0, AlertEvent::FirstWarning),
                (4, AlertEvent::Escalated { elapsed_ms: 4_000 }),
                (5, AlertEvent::Escalated { elapsed_ms: 5_000 }),
            ]
        );
        assert_eq!(engine.alert_phase(), AlertPhase::Warning);

        let t = start + 6_000;
        let report = step(&mut engine, vec![tilted(0, t, 0.0)], t);
        assert_eq!(report.alert, Some(AlertEvent::Cleared));
        assert_eq!(engine.alert_phase(), AlertPhase::Calm);
    }

    #[test]
    fn test_stale_tick_holds_posture_and_skips_counters() {
        let (mut engine, t) = calibrated_single(test_config());
        step(&mut engine, vec![tilted(0, t, 35.0)], t);
        let ticks = engine.statistics().total_ticks;

        // no new sample and the last one is past max age (500ms)
        let report = step(&mut engine, vec![], t + 600);
        assert!(!report.classified);
        assert!(!report.estimate.unwrap().valid);
        assert_eq!(report.posture, Some(PostureState::ForwardHead));
        assert_eq!(report.alert, None);
        assert_eq!(engine.statistics().total_ticks, ticks);
    }

    #[test]
    fn test_device_clock_restart_is_followed_at_once() {
        let (mut engine, start) = calibrated_single(test_config());
        let mut t = start;
        for _ in 0..10 {
            assert_eq!(step(&mut engine, vec![tilted(0, t, 0.0)], t).posture, Some(PostureState::Good));
            t += 100;
        }

        // device rebooted: its clock starts over while the wearer leans in
        let report = step(&mut engine, vec![tilted(0, 0, 40.0)], 0);
        assert!(report.classified);
        assert_eq!(report.posture, Some(PostureState::ForwardHead));
        assert_eq!(report.alert, Some(AlertEvent::FirstWarning));

        let report = step(&mut engine, vec![tilted(0, 100, 40.0)], 100);
        assert_eq!(report.posture, Some(PostureState::ForwardHead));
    }

    #[test]
    fn test_health_report_agrees_with_estimate() {
        let (mut engine, t) = calibrated_single(test_config());
        let report = step(&mut engine, vec![tilted(0, t, 0.0)], t);
        assert!(report.classified);
        assert!(engine.health_report(t).all_healthy());

        let report = step(&mut engine, vec![], t + 501);
        assert!(!report.classified);
        assert!(!engine.health_report(t + 501).all_healthy());
    }

    #[test]
    fn test_invalid_sample_invalidates_tick() {
        let (mut engine, t) = calibrated_single(test_config());
        let mut bad = tilted(0, t, 0.0);
        bad.valid = false;
        let report = step(&mut engine, vec![bad], t);
        assert!(!report.classified);
    }

    #[test]
    fn test_moving_average_smooths_step() {
        let config = EngineConfig {
            filter: FilterStrategy::MovingAverage { window: 10 },
            ..test_config()
        };
        let (mut engine, start) = calibrated_single(config);
        for i in 0..10u64 {
            let t = start + i * 100;
            step(&mut engine, vec![tilted(0, t, 0.0)], t);
        }
        let start = start + 1_000;
        let mut postures = Vec::new();
        for i in 0..10u64 {
            let t = start + i * 100;
            postures.push(step(&mut engine, vec![tilted(0, t, 60.0)], t).posture);
        }
        // one tilted sample in ten barely moves the mean
        assert_eq!(postures[0], Some(PostureState::Good));
        assert_eq!(postures[9], Some(PostureState::ForwardHead));
    }

    #[test]
    fn test_calibration_timeout_is_fatal() {
        let mut engine = PostureEngine::new(test_config()).unwrap();
        assert!(engine.tick(0).is_ok());
        let err = engine.tick(2_001).unwrap_err();
        assert!(matches!(
            err,
            PostureError::CalibrationFailed { sensor: 0, reason: CalibrationFailure::NotResponding }
        ));
        assert!(err.is_fatal_at_startup());
        assert!(engine.tick(2_100).is_err());
        assert_eq!(
            engine.phase(),
            EnginePhase::Failed { sensor: 0, reason: CalibrationFailure::NotResponding }
        );
    }

    #[test]
    fn test_unstable_sensor_times_out_as_unstable() {
        let mut engine = PostureEngine::new(test_config()).unwrap();
        let mut t = 0;
        let mut result = Ok(());
        while t <= 2_100 {
            let pitch = if (t / 100) % 2 == 0 { 0.0 } else { 40.0 };
            engine.ingest(tilted(0, t, pitch));
            if let Err(e) = engine.tick(t) {
                result = Err(e);
                break;
            }
            t += 100;
        }
        assert!(matches!(
            result,
            Err(PostureError::CalibrationFailed { reason: CalibrationFailure::Unstable, .. })
        ));
    }

    fn dual_ypr_config() -> EngineConfig {
        EngineConfig {
            mode: SensorMode::Dual,
            sensor_format: RecordFormat::Ypr,
            ..test_config()
        }
    }

    fn ypr(sensor: SensorId, ts: u64, pitch: f64, roll: f64) -> Sample {
        Sample::from_orientation(sensor, ts, Orientation { roll, pitch, yaw: 12.0 })
    }

    #[test]
    fn test_dual_calibration_is_serialized() {
        let mut engine = PostureEngine::new(dual_ypr_config()).unwrap();
        let mut t = 0;
        // both sensors stream; sensor 1 samples are ignored during sensor 0's turn
        while engine.phase() == (EnginePhase::Calibrating { sensor: 0 }) {
            step(&mut engine, vec![ypr(0, t, 0.0, 0.0), ypr(1, t, 0.0, 0.0)], t);
            t += 100;
        }
        assert_eq!(t, 500);
        assert_eq!(engine.phase(), EnginePhase::Calibrating { sensor: 1 });

        for _ in 0..4 {
            let report = step(&mut engine, vec![ypr(0, t, 0.0, 0.0), ypr(1, t, 0.0, 0.0)], t);
            assert!(!report.classified);
            t += 100;
        }
        let report = step(&mut engine, vec![ypr(0, t, 0.0, 0.0), ypr(1, t, 0.0, 0.0)], t);
        assert_eq!(report.phase, EnginePhase::Running);
        assert_eq!(report.calibrated[0].sensor, 1);
    }

    #[test]
    fn test_dual_curvature_bands() {
        let mut engine = PostureEngine::new(dual_ypr_config()).unwrap();
        let mut t = 0;
        while !engine.is_running() {
            step(&mut engine, vec![ypr(0, t, 0.0, 0.0), ypr(1, t, 0.0, 0.0)], t);
            t += 100;
        }

        let report = step(&mut engine, vec![ypr(0, t, 10.0, 4.0), ypr(1, t, 7.0, 0.0)], t);
        assert_relative_eq!(report.estimate.unwrap().curvature.unwrap(), 5.0);
        assert_eq!(report.posture, Some(PostureState::Fair));

        t += 100;
        let report = step(&mut engine, vec![ypr(0, t, 20.0, 0.0), ypr(1, t, 2.0, 0.0)], t);
        assert_eq!(report.posture, Some(PostureState::Bad));

        // lower sensor goes quiet: invalid, posture held
        t += 600;
        let report = step(&mut engine, vec![ypr(0, t, 0.0, 0.0)], t);
        assert!(!report.classified);
        assert_eq!(report.posture, Some(PostureState::Bad));
    }

    #[test]
    fn test_recalibration_keeps_statistics() {
        let (mut engine, t) = calibrated_single(test_config());
        step(&mut engine, vec![tilted(0, t, 0.0)], t);
        step(&mut engine, vec![tilted(0, t + 100, 35.0)], t + 100);
        assert_eq!(engine.statistics().total_ticks, 2);

        engine.request_recalibration();
        assert_eq!(engine.phase(), EnginePhase::Calibrating { sensor: 0 });
        assert_eq!(engine.posture(), None);
        assert!(engine.offset(0).is_none());
        assert_eq!(engine.alert_phase(), AlertPhase::Calm);

        let report = step(&mut engine, vec![tilted(0, t + 200, 0.0)], t + 200);
        assert!(!report.classified);
        assert_eq!(engine.statistics().total_ticks, 2);

        engine.restart_session();
        assert_eq!(engine.statistics().total_ticks, 0);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = EngineConfig {
            filter: FilterStrategy::MovingAverage { window: 0 },
            ..EngineConfig::default()
        };
        assert!(matches!(PostureEngine::new(config), Err(PostureError::InvalidConfig(_))));
    }
}
