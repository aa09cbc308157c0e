use serde::{Deserialize, Serialize};

use crate::types::{Sample, SensorId};

/// Freshness tracking for one sensor channel.
///
/// Time is passed in explicitly (engine milliseconds) so replays and tests
/// behave exactly like live runs.
#[derive(Clone, Debug)]
pub struct ChannelHealth {
    pub sensor: SensorId,
    pub max_age_ms: u64,
    last_sample_ms: Option<u64>,
    samples: u64,
    reported_silent: bool,
}

impl ChannelHealth {
    pub fn new(sensor: SensorId, max_age_ms: u64) -> Self {
        ChannelHealth {
            sensor,
            max_age_ms,
            last_sample_ms: None,
            samples: 0,
            reported_silent: false,
        }
    }

    /// Last arrival wins, so a restarted source clock takes over at once.
    pub fn update(&mut self, timestamp_ms: u64) {
        self.last_sample_ms = Some(timestamp_ms);
        self.samples += 1;
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// None until the first sample arrives.
    pub fn age(&self, now_ms: u64) -> Option<u64> {
        self.last_sample_ms.map(|t| now_ms.saturating_sub(t))
    }

    /// A sample stamped after `now_ms` belongs to another clock and is not fresh.
    pub fn is_fresh(&self, now_ms: u64) -> bool {
        self.last_sample_ms
            .is_some_and(|t| t <= now_ms && now_ms - t <= self.max_age_ms)
    }

    pub fn reset(&mut self) {
        self.last_sample_ms = None;
        self.reported_silent = false;
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelReport {
    pub sensor: SensorId,
    pub healthy: bool,
    pub age_ms: Option<u64>,
    pub samples: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub channels: Vec<ChannelReport>,
}

impl HealthReport {
    pub fn all_healthy(&self) -> bool {
        self.channels.iter().all(|c| c.healthy)
    }
}

/// Health of every configured sensor channel.
pub struct HealthMonitor {
    channels: Vec<ChannelHealth>,
}

impl HealthMonitor {
    pub fn new(sensor_count: usize, max_age_ms: u64) -> Self {
        HealthMonitor {
            channels: (0..sensor_count).map(|s| ChannelHealth::new(s, max_age_ms)).collect(),
        }
    }

    pub fn record(&mut self, sample: &Sample) {
        if let Some(channel) = self.channels.get_mut(sample.sensor) {
            channel.update(sample.timestamp_ms);
        }
    }

    pub fn channel(&self, sensor: SensorId) -> Option<&ChannelHealth> {
        self.channels.get(sensor)
    }

    /// Check all channels, logging once when a channel goes silent and once
    /// when it comes back.
    pub fn check_health(&mut self, now_ms: u64) -> HealthReport {
        let mut channels = Vec::with_capacity(self.channels.len());
        for c in &mut self.channels {
            let healthy = c.is_fresh(now_ms);
            // A channel that never delivered is not "silent" yet, just absent.
            if !healthy && c.last_sample_ms.is_some() && !c.reported_silent {
                log::warn!(
                    "[health] sensor {} SILENT for {}ms (limit {}ms)",
                    c.sensor,
                    c.age(now_ms).unwrap_or(0),
                    c.max_age_ms
                );
                c.reported_silent = true;
            } else if healthy && c.reported_silent {
                log::info!("[health] sensor {} recovered", c.sensor);
                c.reported_silent = false;
            }
            channels.push(ChannelReport {
                sensor: c.sensor,
                healthy,
                age_ms: c.age(now_ms),
                samples: c.samples,
            });
        }
        HealthReport { channels }
    }

    /// Format health status for logging
    pub fn format_status(&self, now_ms: u64) -> String {
        let parts: Vec<String> = self
            .channels
            .iter()
            .map(|c| {
                let status = match c.age(now_ms) {
                    None => "⚠ (no data)".to_string(),
                    Some(_) if c.is_fresh(now_ms) => "✓".to_string(),
                    Some(age) => format!("⚠ (silent {:.1}s)", age as f64 / 1000.0),
                };
                format!("S{} {}", c.sensor, status)
            })
            .collect();
        format!("Health: {}", parts.join(" | "))
    }

    pub fn reset(&mut self) {
        self.channels.iter_mut().for_each(ChannelHealth::reset);
    }
}
