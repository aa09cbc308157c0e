//! LED and buzzer outputs. Only alert-controller outcomes (and the startup
//! fault) are translated into commands here.

use serde::{Deserialize, Serialize};

use crate::alert::AlertEvent;
use crate::config::ToneConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Led {
    Green,
    Red,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EffectorCommand {
    Led { led: Led, on: bool },
    Tone { frequency_hz: u32, duration_ms: u32 },
    Silence,
    /// Error LED held; the device never leaves this state on its own.
    FaultPattern,
}

/// Whatever physically renders the commands.
pub trait EffectorDriver {
    fn drive(&mut self, command: EffectorCommand);
}

/// Writes commands to the log instead of GPIO pins.
#[derive(Debug, Default)]
pub struct LoggingDriver {
    issued: u64,
}

impl LoggingDriver {
    pub fn issued(&self) -> u64 {
        self.issued
    }
}

impl EffectorDriver for LoggingDriver {
    fn drive(&mut self, command: EffectorCommand) {
        self.issued += 1;
        match command {
            EffectorCommand::Tone { frequency_hz, duration_ms } => {
                log::warn!("[effector] BEEP {}Hz for {}ms", frequency_hz, duration_ms)
            }
            EffectorCommand::FaultPattern => log::error!("[effector] fault pattern: error LED held"),
            other => log::debug!("[effector] {:?}", other),
        }
    }
}

impl EffectorDriver for Vec<EffectorCommand> {
    fn drive(&mut self, command: EffectorCommand) {
        self.push(command);
    }
}

/// Maps alert events to effector commands.
#[derive(Clone, Debug)]
pub struct EffectorPlan {
    first_warning: ToneConfig,
    escalated: ToneConfig,
}

impl EffectorPlan {
    pub fn new(first_warning: ToneConfig, escalated: ToneConfig) -> Self {
        Self { first_warning, escalated }
    }

    /// Resting outputs: green on, red off, buzzer quiet.
    pub fn calm() -> Vec<EffectorCommand> {
        vec![
            EffectorCommand::Led { led: Led::Green, on: true },
            EffectorCommand::Led { led: Led::Red, on: false },
            EffectorCommand::Silence,
        ]
    }

    pub fn fault() -> Vec<EffectorCommand> {
        vec![
            EffectorCommand::Led { led: Led::Green, on: false },
            EffectorCommand::Led { led: Led::Red, on: false },
            EffectorCommand::FaultPattern,
        ]
    }

    pub fn commands_for(&self, event: AlertEvent) -> Vec<EffectorCommand> {
        match event {
            AlertEvent::FirstWarning => vec![
                EffectorCommand::Led { led: Led::Green, on: false },
                EffectorCommand::Led { led: Led::Red, on: true },
                tone(self.first_warning),
            ],
            AlertEvent::Escalated { .. } => vec![tone(self.escalated)],
            AlertEvent::Cleared => Self::calm(),
        }
    }
}

fn tone(config: ToneConfig) -> EffectorCommand {
    EffectorCommand::Tone {
        frequency_hz: config.frequency_hz,
        duration_ms: config.duration_ms,
    }
}

pub fn drive_all(driver: &mut dyn EffectorDriver, commands: Vec<EffectorCommand>) {
    for command in commands {
        driver.drive(command);
    }
}
