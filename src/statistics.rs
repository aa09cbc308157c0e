//! Statistics Aggregator: session counters and the end-of-session report.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::SensorMode;
use crate::types::PostureState;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatistics {
    pub total_ticks: u64,
    pub good_posture_ticks: u64,
    pub posture_transition_count: u64,
    pub last_state: Option<PostureState>,
    pub state_ticks: BTreeMap<PostureState, u64>,
}

impl SessionStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one classified tick. The first tick of a session only sets the
    /// recorded state; it is not a transition.
    pub fn record(&mut self, state: PostureState) {
        self.total_ticks += 1;
        if state.is_good() {
            self.good_posture_ticks += 1;
        }
        if self.last_state.is_some_and(|last| last != state) {
            self.posture_transition_count += 1;
        }
        self.last_state = Some(state);
        *self.state_ticks.entry(state).or_insert(0) += 1;
    }

    /// None while no tick has been counted.
    pub fn good_posture_percentage(&self) -> Option<f64> {
        self.share(PostureState::Good)
    }

    pub fn share(&self, state: PostureState) -> Option<f64> {
        if self.total_ticks == 0 {
            return None;
        }
        let ticks = self.state_ticks.get(&state).copied().unwrap_or(0);
        Some(ticks as f64 / self.total_ticks as f64 * 100.0)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn report(&self, mode: SensorMode) -> SessionReport {
        let shares: BTreeMap<PostureState, f64> = PostureState::ALL
            .iter()
            .filter_map(|&s| self.share(s).filter(|p| *p > 0.0).map(|p| (s, p)))
            .collect();

        let issues: &[PostureState] = match mode {
            SensorMode::Single => &[
                PostureState::ForwardHead,
                PostureState::Slouching,
                PostureState::LeanLeft,
                PostureState::LeanRight,
            ],
            SensorMode::Dual => &[PostureState::Fair, PostureState::Poor, PostureState::Bad],
        };

        let score = if self.total_ticks == 0 {
            None
        } else {
            let issue_pct: f64 = issues.iter().filter_map(|&s| self.share(s)).sum();
            Some((100.0 - issue_pct / 3.0).max(0.0))
        };

        SessionReport {
            total_ticks: self.total_ticks,
            good_posture_percentage: self.good_posture_percentage(),
            posture_transition_count: self.posture_transition_count,
            state_percentages: shares,
            posture_score: score,
            grade: score.map(Grade::from_score),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
}

impl Grade {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Grade::A
        } else if score >= 70.0 {
            Grade::B
        } else if score >= 60.0 {
            Grade::C
        } else {
            Grade::D
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Grade::A => "Excellent",
            Grade::B => "Good",
            Grade::C => "Fair - needs improvement",
            Grade::D => "Poor - significant improvement needed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub total_ticks: u64,
    pub good_posture_percentage: Option<f64>,
    pub posture_transition_count: u64,
    pub state_percentages: BTreeMap<PostureState, f64>,
    pub posture_score: Option<f64>,
    pub grade: Option<Grade>,
}

impl SessionReport {
    pub fn summary(&self) -> String {
        match (self.good_posture_percentage, self.posture_score, self.grade) {
            (Some(good), Some(score), Some(grade)) => format!(
                "{} ticks | good {:.1}% | {} transitions | score {:.1}/100 grade {} ({})",
                self.total_ticks,
                good,
                self.posture_transition_count,
                score,
                grade_letter(grade),
                grade.description()
            ),
            _ => "no classified ticks".to_string(),
        }
    }
}

fn grade_letter(grade: Grade) -> &'static str {
    match grade {
        Grade::A => "A",
        Grade::B => "B",
        Grade::C => "C",
        Grade::D => "D",
    }
}
