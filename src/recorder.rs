// src/recorder.rs
//
// Event clip recorder. A clip opens on the first frame with a qualifying
// detection, rolls over once it reaches the configured duration, and closes
// immediately on the first quiet frame (no grace period, favoring tight
// low-noise clips). At most one clip is open at any time.

use crate::persistence::sortable_timestamp;
use crate::types::{EventConfig, Frame};
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Destination for event clip frames. The production implementation wraps
/// an opencv `VideoWriter`; tests use an in-memory fake.
pub trait VideoSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}

type SinkOpener<S> = Box<dyn FnMut(&Path, f64, (i32, i32)) -> Result<S> + Send>;

struct ActiveClip<S> {
    sink: S,
    path: PathBuf,
    started_at: Instant,
    frames_written: u64,
}

pub struct EventRecorder<S: VideoSink> {
    enabled: bool,
    max_duration: Duration,
    events_dir: PathBuf,
    fps: f64,
    frame_size: (i32, i32),
    open_sink: SinkOpener<S>,
    active: Option<ActiveClip<S>>,
    next_seq: u32,
    clips_completed: u64,
}

impl<S: VideoSink> EventRecorder<S> {
    pub fn new(
        config: &EventConfig,
        events_dir: PathBuf,
        fps: f64,
        frame_size: (i32, i32),
        open_sink: SinkOpener<S>,
    ) -> Self {
        Self {
            enabled: config.enabled,
            max_duration: Duration::from_secs_f64(config.duration_secs),
            events_dir,
            fps,
            frame_size,
            open_sink,
            active: None,
            next_seq: 0,
            clips_completed: 0,
        }
    }

    /// Feed one frame. `qualifying` is whether the frame contained at least
    /// one detection of the class of interest.
    pub fn on_frame(&mut self, qualifying: bool, frame: &Frame) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        if !qualifying {
            // Close immediately on a quiet frame; no-op when nothing is open.
            return self.close_active();
        }

        if let Some(clip) = self.active.as_mut() {
            clip.sink.write_frame(frame)?;
            clip.frames_written += 1;
            if clip.started_at.elapsed() > self.max_duration {
                // Reached the length cap. The next qualifying frame starts
                // a fresh clip rather than extending this one.
                self.close_active()?;
            }
        } else {
            let path = self
                .events_dir
                .join(format!("event_{:04}_{}.mp4", self.next_seq, sortable_timestamp()));
            let mut sink = (self.open_sink)(&path, self.fps, self.frame_size)?;
            sink.write_frame(frame)?;
            warn!("🚨 Event recording started: {}", path.display());
            self.next_seq += 1;
            self.active = Some(ActiveClip {
                sink,
                path,
                started_at: Instant::now(),
                frames_written: 1,
            });
        }

        Ok(())
    }

    /// Close any open clip. Called on quiet frames, on rollover, and at
    /// shutdown so no clip is ever left open.
    pub fn close_active(&mut self) -> Result<()> {
        if let Some(mut clip) = self.active.take() {
            clip.sink.finish()?;
            self.clips_completed += 1;
            info!(
                "🎬 Event recording closed: {} ({} frames)",
                clip.path.display(),
                clip.frames_written
            );
        }
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn clips_completed(&self) -> u64 {
        self.clips_completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct SinkLog {
        writes: u64,
        finished: bool,
    }

    struct MockSink(Arc<Mutex<SinkLog>>);

    impl VideoSink for MockSink {
        fn write_frame(&mut self, _frame: &Frame) -> Result<()> {
            self.0.lock().unwrap().writes += 1;
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.0.lock().unwrap().finished = true;
            Ok(())
        }
    }

    type ClipLogs = Arc<Mutex<Vec<Arc<Mutex<SinkLog>>>>>;

    fn recorder(duration_secs: f64, enabled: bool) -> (EventRecorder<MockSink>, ClipLogs) {
        let logs: ClipLogs = Arc::new(Mutex::new(Vec::new()));
        let opener_logs = logs.clone();
        let recorder = EventRecorder::new(
            &EventConfig {
                enabled,
                duration_secs,
            },
            PathBuf::from("events"),
            25.0,
            (640, 480),
            Box::new(move |_path, _fps, _size| {
                let log = Arc::new(Mutex::new(SinkLog::default()));
                opener_logs.lock().unwrap().push(log.clone());
                Ok(MockSink(log))
            }),
        );
        (recorder, logs)
    }

    fn frame() -> Frame {
        Frame {
            data: vec![0; 640 * 480 * 3],
            width: 640,
            height: 480,
            timestamp_ms: 0.0,
        }
    }

    #[test]
    fn writes_every_qualifying_frame_into_one_clip() {
        // Qualifying on frames 0..=24, quiet on frame 25: one clip holding
        // exactly the 25 qualifying frames, closed by the quiet frame.
        let (mut recorder, logs) = recorder(10.0, true);
        let frame = frame();

        for _ in 0..25 {
            recorder.on_frame(true, &frame).unwrap();
        }
        assert!(recorder.is_recording());

        recorder.on_frame(false, &frame).unwrap();
        assert!(!recorder.is_recording());
        assert_eq!(recorder.clips_completed(), 1);

        let logs = logs.lock().unwrap();
        assert_eq!(logs.len(), 1);
        let clip = logs[0].lock().unwrap();
        assert_eq!(clip.writes, 25);
        assert!(clip.finished);
    }

    #[test]
    fn at_most_one_clip_open_at_a_time() {
        let (mut recorder, logs) = recorder(10.0, true);
        let frame = frame();
        for _ in 0..10 {
            recorder.on_frame(true, &frame).unwrap();
        }
        assert_eq!(logs.lock().unwrap().len(), 1);
    }

    #[test]
    fn quiet_frame_closes_immediately() {
        let (mut recorder, logs) = recorder(10.0, true);
        let frame = frame();
        recorder.on_frame(true, &frame).unwrap();
        recorder.on_frame(false, &frame).unwrap();
        assert!(logs.lock().unwrap()[0].lock().unwrap().finished);

        // A quiet frame with nothing open is a no-op.
        recorder.on_frame(false, &frame).unwrap();
        assert_eq!(logs.lock().unwrap().len(), 1);
    }

    #[test]
    fn duration_cap_rolls_over_to_a_fresh_clip() {
        // Zero max duration: the second write lands past the cap, closing
        // the first clip; the next qualifying frame opens a fresh one.
        let (mut recorder, logs) = recorder(0.0, true);
        let frame = frame();
        for _ in 0..3 {
            recorder.on_frame(true, &frame).unwrap();
            std::thread::sleep(Duration::from_millis(1));
        }

        let logs = logs.lock().unwrap();
        assert_eq!(logs.len(), 2);
        {
            let first = logs[0].lock().unwrap();
            assert_eq!(first.writes, 2);
            assert!(first.finished);
        }
        let second = logs[1].lock().unwrap();
        assert_eq!(second.writes, 1);
        assert!(!second.finished, "fresh clip stays open for more activity");
        assert!(recorder.is_recording());
    }

    #[test]
    fn shutdown_closes_open_clip() {
        let (mut recorder, logs) = recorder(10.0, true);
        recorder.on_frame(true, &frame()).unwrap();
        recorder.close_active().unwrap();
        assert!(logs.lock().unwrap()[0].lock().unwrap().finished);
        assert_eq!(recorder.clips_completed(), 1);
    }

    #[test]
    fn disabled_recorder_never_opens() {
        let (mut recorder, logs) = recorder(10.0, false);
        for _ in 0..5 {
            recorder.on_frame(true, &frame()).unwrap();
        }
        assert!(logs.lock().unwrap().is_empty());
        assert!(!recorder.is_recording());
    }
}
