// src/actuator.rs
//
// Maps a side's window decision to an ordered servo command sequence:
// IDLE -> MOVING(step i) -> SETTLING -> RESETTING -> IDLE.

use crate::aggregator::Decision;
use crate::types::{Side, SideActuatorConfig};
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info};

pub const MAX_CHANNEL: u8 = 15;
pub const MAX_ANGLE: u16 = 180;

/// One target pose for one servo channel. No acknowledgment is expected
/// from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoCommand {
    pub channel: u8,
    pub angle: u16,
}

impl ServoCommand {
    /// Out-of-range values are rejected, never clamped.
    pub fn validate(&self) -> Result<()> {
        if self.channel > MAX_CHANNEL {
            bail!("servo channel {} out of range 0..={}", self.channel, MAX_CHANNEL);
        }
        if self.angle > MAX_ANGLE {
            bail!("servo angle {} out of range 0..={}", self.angle, MAX_ANGLE);
        }
        Ok(())
    }
}

/// Actuator device seam: channels 0-15, angles 0-180, no feedback.
/// Implementations must serialize writes to the same channel internally.
pub trait ServoDriver: Send + Sync {
    fn set_angle(&self, channel: u8, angle: u16) -> Result<()>;
}

/// Dry-run driver for bring-up without the servo bus attached: every
/// command is logged instead of written to hardware.
#[derive(Debug, Default)]
pub struct ConsoleServoDriver;

impl ConsoleServoDriver {
    pub fn new() -> Self {
        Self
    }
}

impl ServoDriver for ConsoleServoDriver {
    fn set_angle(&self, channel: u8, angle: u16) -> Result<()> {
        info!("servo ch={} -> {}°", channel, angle);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActuatorState {
    Idle,
    Moving(usize),
    Settling,
    Resetting,
}

#[derive(Debug, Clone, Copy)]
struct SequenceStep {
    command: ServoCommand,
    hold: Duration,
}

/// Sequence labels are matched case-insensitively; the model's class names
/// and the config keys disagreed on casing often enough in the field.
fn canonical_label(label: &str) -> String {
    label.trim().to_ascii_lowercase()
}

pub struct ActuatorPolicy {
    side: Side,
    sequences: HashMap<String, Vec<SequenceStep>>,
    rest: Vec<ServoCommand>,
    settle: Duration,
}

impl ActuatorPolicy {
    pub fn from_config(side: Side, config: &SideActuatorConfig, settle: Duration) -> Result<Self> {
        let mut sequences = HashMap::new();
        for (label, entries) in &config.sequences {
            let key = canonical_label(label);
            let steps: Vec<SequenceStep> = entries
                .iter()
                .map(|e| SequenceStep {
                    command: ServoCommand {
                        channel: e.channel,
                        angle: e.angle,
                    },
                    hold: Duration::from_millis(e.hold_ms),
                })
                .collect();
            for step in &steps {
                step.command.validate()?;
            }
            if sequences.insert(key.clone(), steps).is_some() {
                bail!(
                    "{} actuators: duplicate sequence label '{}' after canonicalization",
                    side,
                    key
                );
            }
        }

        let rest: Vec<ServoCommand> = config
            .rest
            .iter()
            .map(|e| ServoCommand {
                channel: e.channel,
                angle: e.angle,
            })
            .collect();
        for command in &rest {
            command.validate()?;
        }

        Ok(Self {
            side,
            sequences,
            rest,
            settle,
        })
    }

    pub fn recognizes(&self, label: &str) -> bool {
        self.sequences.contains_key(&canonical_label(label))
    }

    /// Execute one decision to completion. Steps run strictly in order; a
    /// validation or device failure aborts the remaining moves and jumps
    /// straight to the reset phase, so the mechanism always ends at rest.
    pub async fn execute(&self, decision: &Decision, driver: &dyn ServoDriver) {
        let label = match decision {
            Decision::NoDetection => {
                debug!("{} side: no detection, staying idle", self.side);
                return;
            }
            Decision::Label(label) => label,
        };

        let steps = match self.sequences.get(&canonical_label(label)) {
            Some(steps) => steps,
            None => {
                debug!(
                    "{} side: '{}' has no actuator sequence, staying idle",
                    self.side, label
                );
                return;
            }
        };

        info!(
            "⚙️ {} side: executing '{}' sequence ({} step(s))",
            self.side,
            label,
            steps.len()
        );

        for (i, step) in steps.iter().enumerate() {
            // The hold after the final move doubles as the settle phase.
            let state = if i + 1 == steps.len() {
                ActuatorState::Settling
            } else {
                ActuatorState::Moving(i)
            };
            debug!("{} side: {:?}", self.side, state);

            if let Err(e) = self.dispatch(step.command, driver) {
                error!(
                    "{} side: step {} failed ({}), aborting to reset",
                    self.side, i, e
                );
                break;
            }
            tokio::time::sleep(step.hold).await;
        }

        debug!("{} side: {:?}", self.side, ActuatorState::Resetting);
        self.reset_to_rest(driver).await;
        debug!("{} side: {:?}", self.side, ActuatorState::Idle);
    }

    /// Drive every channel owned by this side to its rest angle and let the
    /// mechanism settle. Failures are logged per channel but do not stop the
    /// remaining channels from being rested.
    pub async fn reset_to_rest(&self, driver: &dyn ServoDriver) {
        for (i, command) in self.rest.iter().enumerate() {
            if let Err(e) = self.dispatch(*command, driver) {
                error!("{} side: reset step {} failed: {}", self.side, i, e);
            }
        }
        tokio::time::sleep(self.settle).await;
        info!("↩️ {} side: actuators at rest", self.side);
    }

    fn dispatch(&self, command: ServoCommand, driver: &dyn ServoDriver) -> Result<()> {
        command.validate()?;
        driver.set_angle(command.channel, command.angle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RestEntry, SequenceEntry};
    use anyhow::anyhow;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDriver {
        commands: Mutex<Vec<(u8, u16)>>,
    }

    impl RecordingDriver {
        fn recorded(&self) -> Vec<(u8, u16)> {
            self.commands.lock().unwrap().clone()
        }
    }

    impl ServoDriver for RecordingDriver {
        fn set_angle(&self, channel: u8, angle: u16) -> Result<()> {
            self.commands.lock().unwrap().push((channel, angle));
            Ok(())
        }
    }

    /// Records like RecordingDriver but fails writes to one channel.
    struct FailingDriver {
        fail_channel: u8,
        commands: Mutex<Vec<(u8, u16)>>,
    }

    impl ServoDriver for FailingDriver {
        fn set_angle(&self, channel: u8, angle: u16) -> Result<()> {
            if channel == self.fail_channel {
                return Err(anyhow!("bus write failed on channel {}", channel));
            }
            self.commands.lock().unwrap().push((channel, angle));
            Ok(())
        }
    }

    fn test_config() -> SideActuatorConfig {
        let mut sequences = HashMap::new();
        sequences.insert(
            "Phone".to_string(),
            vec![
                SequenceEntry {
                    channel: 0,
                    angle: 45,
                    hold_ms: 1,
                },
                SequenceEntry {
                    channel: 1,
                    angle: 130,
                    hold_ms: 1,
                },
            ],
        );
        SideActuatorConfig {
            rest: vec![
                RestEntry {
                    channel: 0,
                    angle: 90,
                },
                RestEntry {
                    channel: 1,
                    angle: 90,
                },
            ],
            sequences,
        }
    }

    fn policy() -> ActuatorPolicy {
        ActuatorPolicy::from_config(Side::Left, &test_config(), Duration::from_millis(1)).unwrap()
    }

    #[test]
    fn test_validate_accepts_boundaries() {
        assert!(ServoCommand {
            channel: 15,
            angle: 180
        }
        .validate()
        .is_ok());
        assert!(ServoCommand {
            channel: 0,
            angle: 0
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        assert!(ServoCommand {
            channel: 16,
            angle: 90
        }
        .validate()
        .is_err());
        assert!(ServoCommand {
            channel: 3,
            angle: 181
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_from_config_rejects_out_of_range_step() {
        let mut config = test_config();
        config
            .sequences
            .get_mut("Phone")
            .unwrap()
            .push(SequenceEntry {
                channel: 16,
                angle: 90,
                hold_ms: 1,
            });
        let result = ActuatorPolicy::from_config(Side::Left, &config, Duration::from_millis(1));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_executes_sequence_then_reset_in_order() {
        let driver = RecordingDriver::default();
        policy()
            .execute(&Decision::Label("Phone".to_string()), &driver)
            .await;

        assert_eq!(
            driver.recorded(),
            vec![(0, 45), (1, 130), (0, 90), (1, 90)]
        );
    }

    #[tokio::test]
    async fn test_label_match_is_case_insensitive() {
        let driver = RecordingDriver::default();
        let policy = policy();
        assert!(policy.recognizes("phone"));
        assert!(policy.recognizes("PHONE"));

        policy
            .execute(&Decision::Label("phone".to_string()), &driver)
            .await;
        assert_eq!(driver.recorded().len(), 4);
    }

    #[tokio::test]
    async fn test_no_detection_issues_no_commands() {
        let driver = RecordingDriver::default();
        policy().execute(&Decision::NoDetection, &driver).await;
        assert!(driver.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_unrecognized_label_issues_no_commands() {
        let driver = RecordingDriver::default();
        policy()
            .execute(&Decision::Label("Giraffe".to_string()), &driver)
            .await;
        assert!(driver.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_device_failure_aborts_to_reset() {
        // Channel 0 writes fail: the first move aborts the sequence, the
        // remaining move is skipped, and the reset phase still runs.
        let driver = FailingDriver {
            fail_channel: 0,
            commands: Mutex::new(Vec::new()),
        };
        policy()
            .execute(&Decision::Label("Phone".to_string()), &driver)
            .await;

        let recorded = driver.commands.lock().unwrap().clone();
        assert_eq!(recorded, vec![(1, 90)]);
    }
}
