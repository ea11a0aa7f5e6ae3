// src/monitor.rs
//
// The ingestion loop: read one frame, detect, track, classify, record,
// maybe persist; strictly sequential per frame so the tracker always sees
// frames in arrival order. Stream failures reconnect forever; only startup
// failures and explicit shutdown end the loop.

use crate::behavior::{classify_behavior, DedupFilter};
use crate::object_detection::Detector;
use crate::persistence::{PersistTask, PersistenceWorker};
use crate::recorder::{EventRecorder, VideoSink};
use crate::stats::MonitorStats;
use crate::tracker::CentroidTracker;
use crate::types::{Config, ObjectCategory, ObservedDetection};
use crate::video_io::{FrameRead, FrameSource};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Frames between sliding FPS checkpoints.
const FPS_WINDOW: u64 = 30;

pub struct Monitor<S, D, K>
where
    S: FrameSource,
    D: Detector,
    K: VideoSink,
{
    config: Config,
    source: S,
    detector: D,
    tracker: CentroidTracker,
    dedup: DedupFilter,
    recorder: EventRecorder<K>,
    persistence: PersistenceWorker,
    stats: MonitorStats,
    shutdown: Arc<AtomicBool>,
    next_frame_index: u64,
}

impl<S, D, K> Monitor<S, D, K>
where
    S: FrameSource,
    D: Detector,
    K: VideoSink,
{
    pub fn new(
        config: Config,
        source: S,
        detector: D,
        recorder: EventRecorder<K>,
        persistence: PersistenceWorker,
        stats: MonitorStats,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let tracker = CentroidTracker::new(&config.tracker);
        let dedup = DedupFilter::new(config.dedup.window_frames);
        Self {
            config,
            source,
            detector,
            tracker,
            dedup,
            recorder,
            persistence,
            stats,
            shutdown,
            next_frame_index: 0,
        }
    }

    /// Run until shutdown. Consumes the monitor: on return the source is
    /// released, any open clip is closed, and the persistence worker has
    /// drained and stopped.
    pub fn run(mut self) -> Result<()> {
        self.warmup();

        info!("🚀 Monitoring started");
        let mut checkpoint = Instant::now();
        let mut frames_in_window: u64 = 0;

        while !self.shutdown.load(Ordering::Relaxed) {
            let frame = match self.source.read_frame() {
                Ok(FrameRead::Frame(frame)) => frame,
                Ok(FrameRead::Disconnected) => {
                    self.reconnect();
                    continue;
                }
                Err(e) => {
                    warn!(
                        "Stream read error at frame {}: {:#}",
                        self.next_frame_index, e
                    );
                    self.reconnect();
                    continue;
                }
            };

            let frame_index = self.next_frame_index;
            self.next_frame_index += 1;

            // A detector failure degrades to an empty detection list so the
            // tracker still ages its objects for this frame.
            let detections = match self.detector.detect(&frame) {
                Ok(detections) => detections,
                Err(e) => {
                    warn!("Detection failed on frame {}: {:#}", frame_index, e);
                    Vec::new()
                }
            };

            let mut observations: Vec<ObservedDetection> = Vec::new();
            let mut qualifying = false;
            let mut persist = false;

            let tracked = self.tracker.update(&detections);
            for (&id, obj) in tracked {
                if obj.disappeared_count != 0 {
                    continue;
                }
                let category = self.config.detector.categorize(obj.class_id);
                match category {
                    ObjectCategory::Person => {
                        qualifying = true;
                        self.stats.inc(&self.stats.person_detections);
                    }
                    ObjectCategory::Vehicle => self.stats.inc(&self.stats.vehicle_detections),
                    ObjectCategory::Other => self.stats.inc(&self.stats.other_detections),
                }

                let behavior = classify_behavior(&obj.bbox, frame.width, frame.height);
                if self.dedup.should_persist(id, category, frame_index) {
                    persist = true;
                }

                observations.push(ObservedDetection {
                    track_id: id,
                    category: category.as_str().to_string(),
                    class_name: obj.class_name.clone(),
                    confidence: obj.confidence,
                    bbox: [
                        obj.bbox[0] as i32,
                        obj.bbox[1] as i32,
                        obj.bbox[2] as i32,
                        obj.bbox[3] as i32,
                    ],
                    behavior,
                });
            }
            self.stats
                .unique_tracks
                .store(u64::from(self.tracker.total_registered()), Ordering::Relaxed);

            if !observations.is_empty() {
                let persons = observations.iter().filter(|o| o.category == "person").count();
                info!(
                    "Frame {} ({:.1}s): {} object(s) | 👤 {} | 🚗 {}",
                    frame_index,
                    frame.timestamp_ms / 1000.0,
                    observations.len(),
                    persons,
                    observations.len() - persons
                );
                for obs in &observations {
                    debug!(
                        "  ID:{} | {} | {} | {:.2}",
                        obs.track_id, obs.category, obs.behavior, obs.confidence
                    );
                }
            }

            if persist {
                self.persistence.submit(PersistTask {
                    frame_index,
                    frame: frame.clone(),
                    observations,
                });
            }

            if let Err(e) = self.recorder.on_frame(qualifying, &frame) {
                warn!("Event recording failed on frame {}: {:#}", frame_index, e);
            }

            self.stats.inc(&self.stats.frames_processed);
            frames_in_window += 1;
            if frames_in_window == FPS_WINDOW {
                let elapsed = checkpoint.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    info!("FPS: {:.1}", frames_in_window as f64 / elapsed);
                }
                checkpoint = Instant::now();
                frames_in_window = 0;
            }
        }

        info!("Shutting down monitor...");
        if let Err(e) = self.recorder.close_active() {
            warn!("Failed to close open event recording: {:#}", e);
        }
        self.stats
            .clips_recorded
            .store(self.recorder.clips_completed(), Ordering::Relaxed);
        self.persistence.shutdown();
        Ok(())
    }

    /// Prime the capture and the model so first-frame inference latency
    /// does not land inside the monitored stream.
    fn warmup(&mut self) {
        let n = self.config.stream.warmup_frames;
        if n == 0 {
            return;
        }
        info!("Warming up model ({} frames)...", n);
        for _ in 0..n {
            match self.source.read_frame() {
                Ok(FrameRead::Frame(frame)) => {
                    if let Err(e) = self.detector.detect(&frame) {
                        debug!("Warmup detection failed: {:#}", e);
                    }
                }
                Ok(FrameRead::Disconnected) | Err(_) => break,
            }
        }
    }

    /// Reopen the stream until it comes back or shutdown is requested.
    /// Monitoring survives outages of any length; `next_frame_index` is
    /// never reset, so frame indices stay monotonic across reconnects.
    fn reconnect(&mut self) {
        warn!(
            "🔌 Stream disconnected at frame {}, reconnecting...",
            self.next_frame_index
        );
        let delay = Duration::from_millis(self.config.stream.reconnect_delay_ms);
        while !self.shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(delay);
            match self.source.reconnect() {
                Ok(()) => {
                    self.stats.inc(&self.stats.reconnects);
                    info!("✓ Stream reconnected");
                    return;
                }
                Err(e) => warn!("Reconnect failed: {:#}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        DedupConfig, DetectorConfig, Detection, EventConfig, Frame, LoggingConfig,
        PersistenceConfig, StreamConfig, TrackingConfig,
    };
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::{mpsc, Mutex};

    fn test_config() -> Config {
        Config {
            stream: StreamConfig {
                url: "test://stream".to_string(),
                warmup_frames: 0,
                reconnect_delay_ms: 1,
            },
            detector: DetectorConfig {
                model_path: "unused.onnx".to_string(),
                confidence_threshold: 0.5,
                person_class_id: 0,
                vehicle_class_ids: vec![2, 3, 5, 7],
            },
            tracker: TrackingConfig {
                max_disappeared: 10,
                max_distance: 50.0,
            },
            dedup: DedupConfig { window_frames: 0 },
            events: EventConfig {
                enabled: true,
                duration_secs: 10.0,
            },
            persistence: PersistenceConfig {
                output_dir: "unused".to_string(),
                queue_capacity: 16,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }

    fn frame() -> Frame {
        Frame {
            data: vec![0; 640 * 480 * 3],
            width: 640,
            height: 480,
            timestamp_ms: 0.0,
        }
    }

    /// Source events the scripted stream replays in order. When the script
    /// runs out it requests shutdown so `run` returns.
    enum Step {
        Frame,
        Drop,
    }

    struct ScriptedSource {
        steps: VecDeque<Step>,
        reconnects: Arc<Mutex<u32>>,
        shutdown: Arc<AtomicBool>,
    }

    impl FrameSource for ScriptedSource {
        fn read_frame(&mut self) -> Result<FrameRead> {
            match self.steps.pop_front() {
                Some(Step::Frame) => Ok(FrameRead::Frame(frame())),
                Some(Step::Drop) => Ok(FrameRead::Disconnected),
                None => {
                    self.shutdown.store(true, Ordering::Relaxed);
                    Ok(FrameRead::Disconnected)
                }
            }
        }

        fn reconnect(&mut self) -> Result<()> {
            *self.reconnects.lock().unwrap() += 1;
            Ok(())
        }

        fn fps(&self) -> f64 {
            25.0
        }

        fn frame_size(&self) -> (i32, i32) {
            (640, 480)
        }
    }

    /// Detector replaying a fixed list of per-frame results.
    struct ScriptedDetector {
        results: VecDeque<Result<Vec<Detection>>>,
    }

    impl Detector for ScriptedDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            self.results.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    struct NullSink;

    impl VideoSink for NullSink {
        fn write_frame(&mut self, _frame: &Frame) -> Result<()> {
            Ok(())
        }
        fn finish(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn person_at(cx: f32) -> Detection {
        Detection {
            bbox: [cx - 20.0, 80.0, cx + 20.0, 160.0],
            confidence: 0.9,
            class_id: 0,
            class_name: "person".to_string(),
        }
    }

    struct Harness {
        monitor: Monitor<ScriptedSource, ScriptedDetector, NullSink>,
        reconnects: Arc<Mutex<u32>>,
        persisted: mpsc::Receiver<PersistTask>,
        stats: MonitorStats,
    }

    fn harness(steps: Vec<Step>, results: Vec<Result<Vec<Detection>>>) -> Harness {
        let config = test_config();
        let shutdown = Arc::new(AtomicBool::new(false));
        let reconnects = Arc::new(Mutex::new(0));
        let stats = MonitorStats::new();

        let source = ScriptedSource {
            steps: steps.into(),
            reconnects: reconnects.clone(),
            shutdown: shutdown.clone(),
        };
        let detector = ScriptedDetector {
            results: results.into(),
        };
        let recorder = EventRecorder::new(
            &config.events,
            PathBuf::from("events"),
            25.0,
            (640, 480),
            Box::new(|_, _, _| Ok(NullSink)),
        );

        let (persisted_tx, persisted) = mpsc::channel();
        let persistence =
            PersistenceWorker::spawn_with_processor(16, stats.clone(), move |task| {
                persisted_tx.send(task).unwrap();
                Ok(())
            })
            .unwrap();

        let monitor = Monitor::new(
            config,
            source,
            detector,
            recorder,
            persistence,
            stats.clone(),
            shutdown,
        );

        Harness {
            monitor,
            reconnects,
            persisted,
            stats,
        }
    }

    #[test]
    fn reconnects_and_resumes_with_monotonic_frame_index() {
        // Two good frames, one dropped read, two more good frames. The loop
        // reconnects without surfacing an error and frame indices continue
        // where they left off.
        let h = harness(
            vec![Step::Frame, Step::Frame, Step::Drop, Step::Frame, Step::Frame],
            (0..4).map(|_| Ok(vec![person_at(100.0)])).collect(),
        );

        h.monitor.run().unwrap();

        assert_eq!(*h.reconnects.lock().unwrap(), 1);
        let indices: Vec<u64> = h.persisted.try_iter().map(|t| t.frame_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(h.stats.reconnects.load(Ordering::Relaxed), 1);
        assert_eq!(h.stats.frames_processed.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn detector_failure_is_one_empty_frame_not_a_crash() {
        // Frame 1's detection fails; the track survives its one-frame gap
        // and keeps the same id on frame 2.
        let h = harness(
            vec![Step::Frame, Step::Frame, Step::Frame],
            vec![
                Ok(vec![person_at(100.0)]),
                Err(anyhow::anyhow!("inference exploded")),
                Ok(vec![person_at(105.0)]),
            ],
        );

        h.monitor.run().unwrap();

        let tasks: Vec<PersistTask> = h.persisted.try_iter().collect();
        assert_eq!(
            tasks.iter().map(|t| t.frame_index).collect::<Vec<_>>(),
            vec![0, 2],
            "failed frame produced no observations"
        );
        assert_eq!(tasks[0].observations[0].track_id, 0);
        assert_eq!(tasks[1].observations[0].track_id, 0, "track survived the gap");
    }

    #[test]
    fn quiet_frames_persist_nothing() {
        let h = harness(
            vec![Step::Frame, Step::Frame],
            vec![Ok(Vec::new()), Ok(Vec::new())],
        );
        h.monitor.run().unwrap();
        assert!(h.persisted.try_iter().next().is_none());
        assert_eq!(h.stats.frames_processed.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn observations_carry_category_and_behavior() {
        let h = harness(vec![Step::Frame], vec![Ok(vec![person_at(100.0)])]);
        h.monitor.run().unwrap();

        let task = h.persisted.try_iter().next().unwrap();
        let obs = &task.observations[0];
        assert_eq!(obs.category, "person");
        assert_eq!(obs.class_name, "person");
        // cx=100 < 0.3*640, cy=120 < 0.3*480
        assert_eq!(obs.behavior, "left_top");
        assert_eq!(h.stats.person_detections.load(Ordering::Relaxed), 1);
    }
}
