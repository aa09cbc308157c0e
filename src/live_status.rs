use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::alert::AlertPhase;
use crate::engine::{EnginePhase, PostureEngine};
use crate::health_monitor::ChannelReport;
use crate::sensors::ReaderStats;
use crate::types::PostureState;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub uptime_seconds: u64,
    // Engine
    pub phase: String,
    pub calibration_complete: bool,
    pub posture: Option<PostureState>,
    pub alert_phase: AlertPhase,
    pub bad_posture_ms: Option<u64>,
    // Session counters
    pub total_ticks: u64,
    pub good_posture_ticks: u64,
    pub posture_transition_count: u64,
    pub good_posture_percentage: Option<f64>,
    // Reader
    pub records_accepted: u64,
    pub records_incomplete: u64,
    pub records_malformed: u64,
    // Health monitoring
    pub channels: Vec<ChannelReport>,
}

impl LiveStatus {
    pub fn capture(engine: &mut PostureEngine, reader: ReaderStats, now_ms: u64) -> Self {
        let phase = match engine.phase() {
            EnginePhase::Calibrating { sensor } => format!("calibrating sensor {}", sensor),
            EnginePhase::Running => "running".to_string(),
            EnginePhase::Failed { sensor, reason } => format!("failed: sensor {} {}", sensor, reason),
        };
        let stats = engine.statistics();
        let (total_ticks, good_posture_ticks, posture_transition_count, good_posture_percentage) = (
            stats.total_ticks,
            stats.good_posture_ticks,
            stats.posture_transition_count,
            stats.good_posture_percentage(),
        );

        Self {
            timestamp: current_timestamp(),
            uptime_seconds: now_ms / 1000,
            phase,
            calibration_complete: engine.is_running(),
            posture: engine.posture(),
            alert_phase: engine.alert_phase(),
            bad_posture_ms: engine.alert_elapsed_ms(now_ms),
            total_ticks,
            good_posture_ticks,
            posture_transition_count,
            good_posture_percentage,
            records_accepted: reader.accepted,
            records_incomplete: reader.incomplete,
            records_malformed: reader.malformed,
            channels: engine.health_report(now_ms).channels,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
