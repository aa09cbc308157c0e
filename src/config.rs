use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{PostureError, Result};
use crate::types::{Axis, SensorId};

/// Single- vs dual-sensor rig.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SensorMode {
    Single,
    Dual,
}

impl SensorMode {
    pub fn sensor_count(self) -> usize {
        match self {
            SensorMode::Single => 1,
            SensorMode::Dual => 2,
        }
    }
}

/// Record shape emitted by the sensor firmware on the serial link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RecordFormat {
    /// `timestamp,ax,ay,az,gx,gy,gz,temperature`
    RawImu,
    /// `*YPR=yaw,pitch,roll`
    Ypr,
    /// `timestamp` followed by seven raw fields for each of two sensors.
    DualRawImu,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterStrategy {
    MovingAverage { window: usize },
    LowPass { alpha: f64 },
}

/// Single-sensor threshold rules, degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PostureThresholds {
    /// GOOD while both |pitch| and |roll| stay below this.
    pub good_limit: f64,
    pub forward_head_pitch: f64,
    pub slouch_pitch: f64,
    pub lean_left_roll: f64,
    pub lean_right_roll: f64,
}

impl Default for PostureThresholds {
    fn default() -> Self {
        Self {
            good_limit: 15.0,
            forward_head_pitch: 30.0,
            slouch_pitch: -20.0,
            lean_left_roll: 20.0,
            lean_right_roll: -20.0,
        }
    }
}

/// Upper (exclusive) bounds of the dual-sensor curvature bands, degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurvatureBands {
    pub good_below: f64,
    pub fair_below: f64,
    pub poor_below: f64,
}

impl Default for CurvatureBands {
    fn default() -> Self {
        Self {
            good_below: 5.0,
            fair_below: 10.0,
            poor_below: 15.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToneConfig {
    pub frequency_hz: u32,
    pub duration_ms: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // ── Scheduling ──
    pub sample_interval_ms: u64,
    pub max_sample_age_ms: u64,

    // ── Rig ──
    pub mode: SensorMode,
    pub sensor_format: RecordFormat,
    pub gravity_axis: Axis,

    // ── Calibration ──
    pub calibration_samples: usize,
    pub calibration_timeout_ms: u64,
    pub still_accel_tolerance: f64,
    pub still_orientation_tolerance: f64,

    // ── Filtering ──
    pub filter: FilterStrategy,

    // ── Classification ──
    pub thresholds: PostureThresholds,
    pub curvature_bands: CurvatureBands,

    // ── Alerting ──
    pub alert_delay_ms: u64,
    pub first_warning_tone: ToneConfig,
    pub escalated_tone: ToneConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 100,
            max_sample_age_ms: 500,
            mode: SensorMode::Single,
            sensor_format: RecordFormat::RawImu,
            gravity_axis: Axis::Z,
            calibration_samples: 100,
            calibration_timeout_ms: 30_000,
            still_accel_tolerance: 0.5,
            still_orientation_tolerance: 2.0,
            filter: FilterStrategy::MovingAverage { window: 10 },
            thresholds: PostureThresholds::default(),
            curvature_bands: CurvatureBands::default(),
            alert_delay_ms: 30_000,
            first_warning_tone: ToneConfig { frequency_hz: 1000, duration_ms: 100 },
            escalated_tone: ToneConfig { frequency_hz: 1000, duration_ms: 200 },
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn sensor_count(&self) -> usize {
        self.mode.sensor_count()
    }

    /// Sensor ids fed by each transport, in transport order.
    pub fn transport_sensors(&self) -> Vec<Vec<SensorId>> {
        match (self.mode, self.sensor_format) {
            (SensorMode::Dual, RecordFormat::DualRawImu) => vec![vec![0, 1]],
            (SensorMode::Dual, _) => vec![vec![0], vec![1]],
            (SensorMode::Single, _) => vec![vec![0]],
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(PostureError::InvalidConfig(msg.to_string()));

        if self.sample_interval_ms == 0 {
            return invalid("sample_interval_ms must be positive");
        }
        if self.calibration_samples == 0 {
            return invalid("calibration_samples must be positive");
        }
        match self.filter {
            FilterStrategy::MovingAverage { window } if window == 0 => {
                return invalid("moving-average window must be at least 1");
            }
            FilterStrategy::LowPass { alpha } if !(alpha > 0.0 && alpha <= 1.0) => {
                return invalid("low-pass alpha must be in (0, 1]");
            }
            _ => {}
        }
        let bands = &self.curvature_bands;
        if !(bands.good_below < bands.fair_below && bands.fair_below < bands.poor_below) {
            return invalid("curvature bands must be strictly increasing");
        }
        if self.mode == SensorMode::Single && self.sensor_format == RecordFormat::DualRawImu {
            return invalid("dual_raw_imu records need dual mode");
        }
        if self.still_accel_tolerance < 0.0 || self.still_orientation_tolerance < 0.0 {
            return invalid("stillness tolerances must not be negative");
        }
        Ok(())
    }
}
