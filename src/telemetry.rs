//! Per-tick CSV telemetry. Column order and count are fixed for the whole
//! session by the sensor count given at construction.

use std::io::Write;

use crate::types::{OrientationEstimate, PostureState};

pub fn header(sensor_count: usize) -> String {
    let mut columns = vec!["timestamp".to_string()];
    for s in 0..sensor_count {
        columns.push(format!("s{}_pitch", s));
        columns.push(format!("s{}_roll", s));
    }
    if sensor_count > 1 {
        columns.push("curvature".to_string());
    }
    columns.push("posture_status".to_string());
    columns.join(",")
}

/// None when the estimate does not match the column layout.
pub fn row(sensor_count: usize, estimate: &OrientationEstimate, state: PostureState) -> Option<String> {
    if estimate.tilts.len() != sensor_count {
        return None;
    }
    let mut fields = vec![estimate.timestamp_ms.to_string()];
    for tilt in &estimate.tilts {
        fields.push(format!("{:.2}", tilt.pitch));
        fields.push(format!("{:.2}", tilt.roll));
    }
    if sensor_count > 1 {
        fields.push(format!("{:.2}", estimate.curvature?));
    }
    fields.push(state.label().to_string());
    Some(fields.join(","))
}

pub struct TelemetryWriter<W: Write> {
    out: W,
    sensor_count: usize,
    rows: u64,
}

impl<W: Write> TelemetryWriter<W> {
    /// Writes the header immediately.
    pub fn new(mut out: W, sensor_count: usize) -> std::io::Result<Self> {
        writeln!(out, "{}", header(sensor_count))?;
        Ok(Self { out, sensor_count, rows: 0 })
    }

    /// Only valid estimates are written; returns whether a row went out.
    pub fn write(&mut self, estimate: &OrientationEstimate, state: PostureState) -> std::io::Result<bool> {
        if !estimate.valid {
            return Ok(false);
        }
        match row(self.sensor_count, estimate, state) {
            Some(line) => {
                writeln!(self.out, "{}", line)?;
                self.rows += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
