//! Noise suppression for calibrated samples.
//!
//! Two interchangeable per-axis strategies, picked at configuration time.
//! Every axis of every sensor owns its own state; nothing is shared.

pub mod low_pass;
pub mod moving_average;

use nalgebra::Vector3;

use crate::config::FilterStrategy;
use crate::types::{Orientation, Sample};

pub use low_pass::LowPass;
pub use moving_average::MovingAverage;

#[derive(Clone, Debug)]
pub enum AxisFilter {
    MovingAverage(MovingAverage),
    LowPass(LowPass),
}

impl AxisFilter {
    pub fn new(strategy: FilterStrategy) -> Self {
        match strategy {
            FilterStrategy::MovingAverage { window } => AxisFilter::MovingAverage(MovingAverage::new(window)),
            FilterStrategy::LowPass { alpha } => AxisFilter::LowPass(LowPass::new(alpha)),
        }
    }

    pub fn apply(&mut self, value: f64) -> f64 {
        match self {
            AxisFilter::MovingAverage(f) => f.apply(value),
            AxisFilter::LowPass(f) => f.apply(value),
        }
    }

    pub fn reset(&mut self) {
        match self {
            AxisFilter::MovingAverage(f) => f.reset(),
            AxisFilter::LowPass(f) => f.reset(),
        }
    }
}

#[derive(Clone, Debug)]
struct TriaxialFilter {
    axes: [AxisFilter; 3],
}

impl TriaxialFilter {
    fn new(strategy: FilterStrategy) -> Self {
        Self {
            axes: [AxisFilter::new(strategy), AxisFilter::new(strategy), AxisFilter::new(strategy)],
        }
    }

    fn apply(&mut self, v: &Vector3<f64>) -> Vector3<f64> {
        Vector3::new(self.axes[0].apply(v.x), self.axes[1].apply(v.y), self.axes[2].apply(v.z))
    }

    fn reset(&mut self) {
        self.axes.iter_mut().for_each(AxisFilter::reset);
    }
}

/// Filter bank for one sensor: accel, gyro and (when reported) orientation.
#[derive(Clone, Debug)]
pub struct SampleFilter {
    accel: TriaxialFilter,
    gyro: TriaxialFilter,
    orientation: TriaxialFilter,
}

impl SampleFilter {
    pub fn new(strategy: FilterStrategy) -> Self {
        Self {
            accel: TriaxialFilter::new(strategy),
            gyro: TriaxialFilter::new(strategy),
            orientation: TriaxialFilter::new(strategy),
        }
    }

    pub fn apply(&mut self, sample: &Sample) -> Sample {
        let mut filtered = sample.clone();
        filtered.accel = self.accel.apply(&sample.accel);
        filtered.gyro = self.gyro.apply(&sample.gyro);
        if let Some(o) = sample.orientation {
            let v = self.orientation.apply(&Vector3::new(o.roll, o.pitch, o.yaw));
            filtered.orientation = Some(Orientation { roll: v.x, pitch: v.y, yaw: v.z });
        }
        filtered
    }

    pub fn reset(&mut self) {
        self.accel.reset();
        self.gyro.reset();
        self.orientation.reset();
    }
}
