// src/aggregator.rs
//
// One aggregation window: pull frames until the wall-clock deadline,
// split each into halves, count detected class labels per side.

use crate::camera::FrameSource;
use crate::detector::{Detection, Detector};
use crate::frame::HalfFrame;
use crate::types::{Side, WindowConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Wraps the detector so that inference failures degrade to "no detections
/// this frame" instead of aborting the window.
pub struct DetectionAdapter {
    inner: Box<dyn Detector>,
}

impl DetectionAdapter {
    pub fn new(inner: Box<dyn Detector>) -> Self {
        Self { inner }
    }

    pub fn detect(&mut self, side: Side, frame_index: u64, half: &HalfFrame) -> Vec<Detection> {
        match self.inner.detect(half) {
            Ok(detections) => detections,
            Err(e) => {
                warn!(
                    "{} detection failed on frame {}: {}",
                    side, frame_index, e
                );
                Vec::new()
            }
        }
    }
}

/// The label a side's window reduced to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Label(String),
    NoDetection,
}

/// Per-side label counts for one window. Insertion order is preserved so
/// that ties reduce deterministically to the earliest-seen label.
#[derive(Debug, Default)]
pub struct FrequencyTable {
    counts: Vec<(String, u32)>,
}

impl FrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, label: &str) {
        if let Some(entry) = self.counts.iter_mut().find(|(l, _)| l == label) {
            entry.1 += 1;
        } else {
            self.counts.push((label.to_string(), 1));
        }
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().map(|(_, c)| c).sum()
    }

    pub fn count(&self, label: &str) -> u32 {
        self.counts
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }

    /// Reduce the table to a decision: the label with the strictly highest
    /// count; on a tie, the earliest-inserted of the tied labels.
    pub fn decide(&self) -> Decision {
        let mut best: Option<(&str, u32)> = None;
        for (label, count) in &self.counts {
            match best {
                Some((_, best_count)) if *count <= best_count => {}
                _ => best = Some((label.as_str(), *count)),
            }
        }
        match best {
            Some((label, _)) => Decision::Label(label.to_string()),
            None => Decision::NoDetection,
        }
    }
}

pub struct WindowAggregator {
    duration: Duration,
    idle_backoff: Duration,
    next_frame_index: u64,
}

impl WindowAggregator {
    pub fn new(config: &WindowConfig) -> Self {
        Self {
            duration: Duration::from_secs_f64(config.duration_seconds),
            idle_backoff: Duration::from_millis(config.idle_backoff_ms),
            next_frame_index: 0,
        }
    }

    /// Run one aggregation window to its wall-clock deadline.
    ///
    /// A failed frame pull skips the tick, never the window; the loop backs
    /// off briefly instead of spinning. `stop` ends the window early on
    /// shutdown; the caller discards the partial tables in that case.
    pub fn aggregate(
        &mut self,
        source: &mut dyn FrameSource,
        adapter: &mut DetectionAdapter,
        stop: &AtomicBool,
    ) -> (FrequencyTable, FrequencyTable) {
        let mut left_table = FrequencyTable::new();
        let mut right_table = FrequencyTable::new();

        let start = Instant::now();
        while start.elapsed() < self.duration && !stop.load(Ordering::Relaxed) {
            let frame = match source.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    std::thread::sleep(self.idle_backoff);
                    continue;
                }
                Err(e) => {
                    warn!("Frame read failed: {}", e);
                    std::thread::sleep(self.idle_backoff);
                    continue;
                }
            };

            let frame_index = self.next_frame_index;
            self.next_frame_index += 1;

            let (left, right) = frame.split();
            for (side, half, table) in [
                (Side::Left, &left, &mut left_table),
                (Side::Right, &right, &mut right_table),
            ] {
                for detection in adapter.detect(side, frame_index, half) {
                    debug!(
                        "{} f{}: {} conf={:.2} bbox=[{:.1}, {:.1}, {:.1}, {:.1}]",
                        side,
                        frame_index,
                        detection.label,
                        detection.confidence,
                        detection.bbox[0],
                        detection.bbox[1],
                        detection.bbox[2],
                        detection.bbox[3],
                    );
                    table.record(&detection.label);
                }
            }
        }

        debug!(
            "Window closed after {:.2}s: {} left / {} right detection(s)",
            start.elapsed().as_secs_f64(),
            left_table.total(),
            right_table.total()
        );

        (left_table, right_table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use anyhow::anyhow;

    fn blank_frame() -> Frame {
        Frame::new(vec![0; 8 * 2 * 3], 8, 2)
    }

    /// Source that replays a script of outcomes, then reports no frame.
    struct ScriptedSource {
        script: Vec<Result<Option<Frame>, String>>,
    }

    impl FrameSource for ScriptedSource {
        fn read_frame(&mut self) -> anyhow::Result<Option<Frame>> {
            if self.script.is_empty() {
                return Ok(None);
            }
            self.script.remove(0).map_err(|e| anyhow!(e))
        }
    }

    /// Source that always has a frame ready.
    struct InstantSource;

    impl FrameSource for InstantSource {
        fn read_frame(&mut self) -> anyhow::Result<Option<Frame>> {
            Ok(Some(blank_frame()))
        }
    }

    /// Detector that replays one list of labels per call (both halves of a
    /// frame count as separate calls, left first).
    struct ScriptedDetector {
        per_call: Vec<Result<Vec<&'static str>, String>>,
        calls: usize,
    }

    impl Detector for ScriptedDetector {
        fn detect(&mut self, _frame: &HalfFrame) -> anyhow::Result<Vec<Detection>> {
            let call = self.calls;
            self.calls += 1;
            match self.per_call.get(call) {
                Some(Ok(labels)) => Ok(labels
                    .iter()
                    .map(|l| Detection {
                        bbox: [0.0, 0.0, 1.0, 1.0],
                        confidence: 0.9,
                        label: l.to_string(),
                    })
                    .collect()),
                Some(Err(e)) => Err(anyhow!(e.clone())),
                None => Ok(Vec::new()),
            }
        }
    }

    fn window(duration_ms: u64) -> WindowAggregator {
        WindowAggregator::new(&WindowConfig {
            duration_seconds: duration_ms as f64 / 1000.0,
            idle_backoff_ms: 1,
        })
    }

    #[test]
    fn test_decide_returns_highest_count() {
        let mut table = FrequencyTable::new();
        for label in ["Phone", "Phone", "Laptop"] {
            table.record(label);
        }
        assert_eq!(table.decide(), Decision::Label("Phone".to_string()));
    }

    #[test]
    fn test_decide_tie_goes_to_earliest_inserted() {
        let mut table = FrequencyTable::new();
        for label in ["A", "B", "A", "B", "A", "B"] {
            table.record(label);
        }
        assert_eq!(table.count("A"), 3);
        assert_eq!(table.count("B"), 3);
        assert_eq!(table.decide(), Decision::Label("A".to_string()));
    }

    #[test]
    fn test_decide_empty_table_is_no_detection() {
        assert_eq!(FrequencyTable::new().decide(), Decision::NoDetection);
    }

    #[test]
    fn test_window_respects_duration_with_instant_source() {
        let mut aggregator = window(100);
        let mut adapter = DetectionAdapter::new(Box::new(ScriptedDetector {
            per_call: Vec::new(),
            calls: 0,
        }));

        let start = Instant::now();
        aggregator.aggregate(&mut InstantSource, &mut adapter, &AtomicBool::new(false));
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(400), "elapsed {:?}", elapsed);
    }

    #[test]
    fn test_read_failure_skips_tick_not_window() {
        // First frame yields a detection, then a read error, then nothing.
        let mut source = ScriptedSource {
            script: vec![
                Ok(Some(blank_frame())),
                Err("device busy".to_string()),
            ],
        };
        let mut adapter = DetectionAdapter::new(Box::new(ScriptedDetector {
            per_call: vec![Ok(vec!["Phone"]), Ok(vec![])],
            calls: 0,
        }));

        let mut aggregator = window(60);
        let start = Instant::now();
        let (left, right) =
            aggregator.aggregate(&mut source, &mut adapter, &AtomicBool::new(false));

        // The error neither shortened the window nor dropped the earlier count.
        assert!(start.elapsed() >= Duration::from_millis(60));
        assert_eq!(left.count("Phone"), 1);
        assert_eq!(right.total(), 0);
    }

    #[test]
    fn test_inference_failure_counts_as_zero_for_that_frame() {
        let mut source = ScriptedSource {
            script: vec![Ok(Some(blank_frame())), Ok(Some(blank_frame()))],
        };
        // Frame 0: left fails, right sees Laptop. Frame 1: both sides work.
        let mut adapter = DetectionAdapter::new(Box::new(ScriptedDetector {
            per_call: vec![
                Err("inference exploded".to_string()),
                Ok(vec!["Laptop"]),
                Ok(vec!["Phone"]),
                Ok(vec!["Laptop"]),
            ],
            calls: 0,
        }));

        let mut aggregator = window(60);
        let (left, right) =
            aggregator.aggregate(&mut source, &mut adapter, &AtomicBool::new(false));

        assert_eq!(left.count("Phone"), 1);
        assert_eq!(left.total(), 1);
        assert_eq!(right.count("Laptop"), 2);
    }

    #[test]
    fn test_table_total_matches_observed_detections() {
        let mut table = FrequencyTable::new();
        for label in ["Phone", "Laptop", "Phone", "Box"] {
            table.record(label);
        }
        assert_eq!(table.total(), 4);
        assert_eq!(table.count("Phone"), 2);
    }
}
