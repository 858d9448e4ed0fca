use crate::actuator::{MAX_ANGLE, MAX_CHANNEL};
use crate::types::{Config, SideActuatorConfig};
use anyhow::{bail, Context, Result};
use std::fs;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would only fail later, mid-loop.
    fn validate(&self) -> Result<()> {
        if self.model.class_names.is_empty() {
            bail!("model.class_names must not be empty");
        }
        if self.window.duration_seconds <= 0.0 {
            bail!(
                "window.duration_seconds must be positive, got {}",
                self.window.duration_seconds
            );
        }
        if self.camera.width < 640 {
            bail!(
                "camera.width must be at least 640, got {}",
                self.camera.width
            );
        }
        validate_side("left", &self.actuators.left)?;
        validate_side("right", &self.actuators.right)?;
        Ok(())
    }
}

fn validate_side(side: &str, config: &SideActuatorConfig) -> Result<()> {
    for rest in &config.rest {
        if rest.channel > MAX_CHANNEL || rest.angle > MAX_ANGLE {
            bail!(
                "actuators.{}: rest entry out of range (channel {}, angle {})",
                side,
                rest.channel,
                rest.angle
            );
        }
    }
    for (label, steps) in &config.sequences {
        if steps.is_empty() {
            bail!("actuators.{}: sequence for '{}' is empty", side, label);
        }
        for step in steps {
            if step.channel > MAX_CHANNEL || step.angle > MAX_ANGLE {
                bail!(
                    "actuators.{}: '{}' step out of range (channel {}, angle {})",
                    side,
                    label,
                    step.channel,
                    step.angle
                );
            }
        }
    }
    Ok(())
}
