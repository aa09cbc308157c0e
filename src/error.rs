use serde::Serialize;
use thiserror::Error;

use crate::types::SensorId;

/// Why a still-pose calibration could not complete.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationFailure {
    #[error("sensor not responding (no samples before timeout)")]
    NotResponding,

    #[error("sensor never held still long enough")]
    Unstable,
}

/// Posture engine error types
#[derive(Error, Debug)]
pub enum PostureError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Calibration failed for sensor {sensor}: {reason}")]
    CalibrationFailed {
        sensor: SensorId,
        reason: CalibrationFailure,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PostureError>;

impl PostureError {
    /// Faults that must keep the device out of the main loop.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(self, PostureError::CalibrationFailed { .. })
    }
}
