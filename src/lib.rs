//! Posture tracking from one or two inertial sensor nodes.
//!
//! Samples flow strictly forward through the tick pipeline in [`engine`]:
//! calibration, filtering, orientation estimation, classification, then
//! alerting and session statistics. The binaries add transports, effectors
//! and output files around it.

pub mod alert;
pub mod calibration;
pub mod classifier;
pub mod config;
pub mod effectors;
pub mod engine;
pub mod error;
pub mod filters;
pub mod health_monitor;
pub mod live_status;
pub mod orientation;
pub mod sensors;
pub mod statistics;
pub mod telemetry;
pub mod types;

pub use config::EngineConfig;
pub use engine::{EnginePhase, PostureEngine, TickReport};
pub use error::{CalibrationFailure, PostureError, Result};
pub use types::{OrientationEstimate, PostureState, Sample};
