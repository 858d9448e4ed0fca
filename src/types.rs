use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub inference: InferenceConfig,
    pub camera: CameraConfig,
    pub window: WindowConfig,
    pub actuators: ActuatorsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub path: String,
    pub input_size: usize,
    pub confidence_threshold: f32,
    pub class_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub use_cuda: bool,
    pub num_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub index: i32,
    pub width: usize,
    pub height: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    pub duration_seconds: f64,
    pub idle_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorsConfig {
    pub settle_ms: u64,
    pub left: SideActuatorConfig,
    pub right: SideActuatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideActuatorConfig {
    pub rest: Vec<RestEntry>,
    pub sequences: HashMap<String, Vec<SequenceEntry>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RestEntry {
    pub channel: u8,
    pub angle: u16,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SequenceEntry {
    pub channel: u8,
    pub angle: u16,
    pub hold_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// One half of the split camera view. The two sides are aggregated,
/// decided, and actuated independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
