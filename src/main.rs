// src/main.rs

mod actuator;
mod aggregator;
mod camera;
mod config;
mod controller;
mod detector;
mod frame;
mod types;

use actuator::{ActuatorPolicy, ConsoleServoDriver, ServoDriver};
use aggregator::{DetectionAdapter, WindowAggregator};
use anyhow::Result;
use camera::Camera;
use controller::{Controller, SideExecutor};
use detector::YoloDetector;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use types::{Config, Side};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(format!(
            "lane_sorter={},ort=warn",
            config.logging.level
        )))
        .init();

    info!("🎥 Two-lane sorting station starting");
    info!("✓ Configuration loaded from {}", config_path);
    info!(
        "Window: {:.1}s | classes: {:?}",
        config.window.duration_seconds, config.model.class_names
    );

    let detector = YoloDetector::new(&config.model, &config.inference)?;
    let camera = Camera::open(&config.camera)?;

    let settle = Duration::from_millis(config.actuators.settle_ms);
    let left_policy = ActuatorPolicy::from_config(Side::Left, &config.actuators.left, settle)?;
    let right_policy = ActuatorPolicy::from_config(Side::Right, &config.actuators.right, settle)?;
    let driver: Arc<dyn ServoDriver> = Arc::new(ConsoleServoDriver::new());

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for stop signal: {}", e);
                return;
            }
            info!("🛑 Stop requested, finishing up");
            stop.store(true, Ordering::Relaxed);
        });
    }

    let left = SideExecutor::spawn(Side::Left, left_policy, driver.clone());
    let right = SideExecutor::spawn(Side::Right, right_policy, driver);

    let controller = Controller::new(
        WindowAggregator::new(&config.window),
        Box::new(camera),
        DetectionAdapter::new(Box::new(detector)),
        left,
        right,
        stop,
    );
    controller.run().await?;

    info!("Resources released, station stopped");
    Ok(())
}
