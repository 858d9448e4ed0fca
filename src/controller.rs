// src/controller.rs
//
// Drives aggregation windows back to back. Each side's actuator execution
// runs on its own task, so a slow servo sequence never stalls the camera
// or the other side.

use crate::actuator::{ActuatorPolicy, ServoDriver};
use crate::aggregator::{Decision, DetectionAdapter, FrequencyTable, WindowAggregator};
use crate::camera::FrameSource;
use crate::types::Side;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub struct SideExecutor {
    side: Side,
    tx: mpsc::Sender<Decision>,
    handle: JoinHandle<()>,
}

impl SideExecutor {
    /// Spawn the executor task for one side. The channel holds at most one
    /// pending decision: while a sequence is running, newer decisions are
    /// dropped rather than queued up as stale poses.
    pub fn spawn(side: Side, policy: ActuatorPolicy, driver: Arc<dyn ServoDriver>) -> Self {
        let (tx, mut rx) = mpsc::channel::<Decision>(1);
        let handle = tokio::spawn(async move {
            while let Some(decision) = rx.recv().await {
                policy.execute(&decision, driver.as_ref()).await;
            }
            // Channel closed: shutting down. Leave the hardware at rest.
            policy.reset_to_rest(driver.as_ref()).await;
        });
        Self { side, tx, handle }
    }

    pub fn dispatch(&self, decision: Decision) {
        match self.tx.try_send(decision) {
            Ok(()) => {}
            Err(TrySendError::Full(decision)) => warn!(
                "{} side: still actuating, dropping decision {:?}",
                self.side, decision
            ),
            Err(TrySendError::Closed(_)) => {
                error!("{} side: executor task is gone", self.side)
            }
        }
    }

    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            error!("{} side: executor task failed: {}", self.side, e);
        }
    }
}

pub struct Controller {
    aggregator: WindowAggregator,
    source: Box<dyn FrameSource>,
    adapter: DetectionAdapter,
    left: SideExecutor,
    right: SideExecutor,
    stop: Arc<AtomicBool>,
}

impl Controller {
    pub fn new(
        aggregator: WindowAggregator,
        source: Box<dyn FrameSource>,
        adapter: DetectionAdapter,
        left: SideExecutor,
        right: SideExecutor,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            aggregator,
            source,
            adapter,
            left,
            right,
            stop,
        }
    }

    /// Run windows until the stop flag is raised. Every window produces
    /// exactly one decision per side; no state survives between windows.
    pub async fn run(mut self) -> Result<()> {
        let mut window_index: u64 = 0;

        while !self.stop.load(Ordering::Relaxed) {
            let (left_table, right_table) = self.aggregator.aggregate(
                self.source.as_mut(),
                &mut self.adapter,
                &self.stop,
            );

            if self.stop.load(Ordering::Relaxed) {
                // Window was cut short by shutdown; a partial window
                // decides nothing.
                break;
            }

            window_index += 1;
            let left_decision = left_table.decide();
            let right_decision = right_table.decide();
            log_summary(window_index, Side::Left, &left_decision, &left_table);
            log_summary(window_index, Side::Right, &right_decision, &right_table);

            self.left.dispatch(left_decision);
            self.right.dispatch(right_decision);
        }

        info!("🛑 Control loop stopping");
        self.left.shutdown().await;
        self.right.shutdown().await;
        Ok(())
    }
}

fn log_summary(window: u64, side: Side, decision: &Decision, table: &FrequencyTable) {
    match decision {
        Decision::Label(label) => info!(
            "🔍 window {}: {} side: {} ({} hit(s))",
            window,
            side,
            label,
            table.count(label)
        ),
        Decision::NoDetection => info!("⚪ window {}: {} side: no detections", window, side),
    }
}
