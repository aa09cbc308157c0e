//! Posture Classifier: ordered (predicate, state) rule tables, first match wins.
//!
//! The single-sensor table has a deliberate gap: pitch in (15, 30] with a
//! small roll matches nothing before the catch-all and classifies as UNKNOWN.

use crate::config::{CurvatureBands, PostureThresholds, SensorMode};
use crate::types::{OrientationEstimate, PostureState};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Predicate {
    /// |pitch| < pitch and |roll| < roll
    Within { pitch: f64, roll: f64 },
    PitchAbove(f64),
    PitchBelow(f64),
    RollAbove(f64),
    RollBelow(f64),
    CurvatureBelow(f64),
    Always,
}

impl Predicate {
    /// Curvature predicates never match an estimate without curvature.
    pub fn matches(&self, estimate: &OrientationEstimate) -> bool {
        let tilt = estimate.primary();
        match *self {
            Predicate::Within { pitch, roll } => tilt.pitch.abs() < pitch && tilt.roll.abs() < roll,
            Predicate::PitchAbove(limit) => tilt.pitch > limit,
            Predicate::PitchBelow(limit) => tilt.pitch < limit,
            Predicate::RollAbove(limit) => tilt.roll > limit,
            Predicate::RollBelow(limit) => tilt.roll < limit,
            Predicate::CurvatureBelow(limit) => estimate.curvature.is_some_and(|c| c < limit),
            Predicate::Always => true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rule {
    pub predicate: Predicate,
    pub state: PostureState,
}

impl Rule {
    pub const fn new(predicate: Predicate, state: PostureState) -> Self {
        Self { predicate, state }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Classifier {
    /// Build from an explicit rule list. An `Always` fallback is appended
    /// when the list does not already end with one.
    pub fn from_rules(mut rules: Vec<Rule>, fallback: PostureState) -> Self {
        if !matches!(rules.last(), Some(r) if r.predicate == Predicate::Always) {
            rules.push(Rule::new(Predicate::Always, fallback));
        }
        Self { rules }
    }

    pub fn single_sensor(t: &PostureThresholds) -> Self {
        Self::from_rules(
            vec![
                Rule::new(
                    Predicate::Within { pitch: t.good_limit, roll: t.good_limit },
                    PostureState::Good,
                ),
                Rule::new(Predicate::PitchAbove(t.forward_head_pitch), PostureState::ForwardHead),
                Rule::new(Predicate::PitchBelow(t.slouch_pitch), PostureState::Slouching),
                Rule::new(Predicate::RollAbove(t.lean_left_roll), PostureState::LeanLeft),
                Rule::new(Predicate::RollBelow(t.lean_right_roll), PostureState::LeanRight),
            ],
            PostureState::Unknown,
        )
    }

    pub fn curvature_bands(b: &CurvatureBands) -> Self {
        Self::from_rules(
            vec![
                Rule::new(Predicate::CurvatureBelow(b.good_below), PostureState::Good),
                Rule::new(Predicate::CurvatureBelow(b.fair_below), PostureState::Fair),
                Rule::new(Predicate::CurvatureBelow(b.poor_below), PostureState::Poor),
            ],
            PostureState::Bad,
        )
    }

    pub fn for_mode(mode: SensorMode, thresholds: &PostureThresholds, bands: &CurvatureBands) -> Self {
        match mode {
            SensorMode::Single => Self::single_sensor(thresholds),
            SensorMode::Dual => Self::curvature_bands(bands),
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Pure: same estimate, same state. Callers must not pass invalid
    /// estimates; the held state is their business.
    pub fn classify(&self, estimate: &OrientationEstimate) -> PostureState {
        self.rules
            .iter()
            .find(|rule| rule.predicate.matches(estimate))
            .map(|rule| rule.state)
            .unwrap_or(PostureState::Unknown)
    }
}
