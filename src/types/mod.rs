use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a physical sensor node (0 = upper spine / neck, 1 = mid spine).
pub type SensorId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Directly reported orientation in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

/// One reading from a sensor channel.
///
/// `timestamp_ms` is the host receive time (milliseconds since the engine
/// started); `device_timestamp_ms` is whatever the sensor firmware stamped on
/// the record, when the record format carries one.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub sensor: SensorId,
    pub timestamp_ms: u64,
    pub device_timestamp_ms: Option<u64>,
    pub accel: Vector3<f64>,
    pub gyro: Vector3<f64>,
    pub orientation: Option<Orientation>,
    pub temperature: Option<f64>,
    pub valid: bool,
}

impl Sample {
    pub fn from_imu(sensor: SensorId, timestamp_ms: u64, accel: Vector3<f64>, gyro: Vector3<f64>) -> Self {
        Self {
            sensor,
            timestamp_ms,
            device_timestamp_ms: None,
            accel,
            gyro,
            orientation: None,
            temperature: None,
            valid: true,
        }
    }

    pub fn from_orientation(sensor: SensorId, timestamp_ms: u64, orientation: Orientation) -> Self {
        Self {
            sensor,
            timestamp_ms,
            device_timestamp_ms: None,
            accel: Vector3::zeros(),
            gyro: Vector3::zeros(),
            orientation: Some(orientation),
            temperature: None,
            valid: true,
        }
    }
}

/// Pitch/roll of one sensor node, degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Tilt {
    pub pitch: f64,
    pub roll: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrientationEstimate {
    /// One entry per configured sensor, in sensor order.
    pub tilts: Vec<Tilt>,
    /// Present for dual-sensor rigs only.
    pub curvature: Option<f64>,
    /// Timestamp of the newest contributing sample.
    pub timestamp_ms: u64,
    pub valid: bool,
}

impl OrientationEstimate {
    pub fn invalid(sensor_count: usize, timestamp_ms: u64) -> Self {
        Self {
            tilts: vec![Tilt::default(); sensor_count],
            curvature: None,
            timestamp_ms,
            valid: false,
        }
    }

    pub fn primary(&self) -> Tilt {
        self.tilts.first().copied().unwrap_or_default()
    }
}

/// Discrete posture classification. The first six variants are produced by
/// single-sensor rigs, `Good`/`Fair`/`Poor`/`Bad` by the curvature bands of
/// dual-sensor rigs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostureState {
    Good,
    ForwardHead,
    Slouching,
    LeanLeft,
    LeanRight,
    Unknown,
    Fair,
    Poor,
    Bad,
}

impl PostureState {
    pub const ALL: [PostureState; 9] = [
        PostureState::Good,
        PostureState::ForwardHead,
        PostureState::Slouching,
        PostureState::LeanLeft,
        PostureState::LeanRight,
        PostureState::Unknown,
        PostureState::Fair,
        PostureState::Poor,
        PostureState::Bad,
    ];

    pub fn is_good(self) -> bool {
        self == PostureState::Good
    }

    pub fn label(self) -> &'static str {
        match self {
            PostureState::Good => "GOOD",
            PostureState::ForwardHead => "FORWARD_HEAD",
            PostureState::Slouching => "SLOUCHING",
            PostureState::LeanLeft => "LEAN_LEFT",
            PostureState::LeanRight => "LEAN_RIGHT",
            PostureState::Unknown => "UNKNOWN",
            PostureState::Fair => "FAIR",
            PostureState::Poor => "POOR",
            PostureState::Bad => "BAD",
        }
    }
}

impl fmt::Display for PostureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
