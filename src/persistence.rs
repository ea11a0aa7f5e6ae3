// src/persistence.rs
//
// Asynchronous evidence persistence. The ingestion loop hands finished
// frames to a background worker over a bounded channel; the worker renders
// the detection overlay, writes the annotated JPEG, and writes a structured
// JSON record beside it. The hand-off is best-effort: when the queue is
// full the task is dropped (newest first) so the ingestion loop never
// blocks on disk.

use crate::stats::{ClassCounts, MonitorStats};
use crate::types::{Frame, ObservedDetection};
use crate::video_io;
use anyhow::{Context, Result};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender, TrySendError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

/// How long the worker blocks on the queue before re-checking for shutdown.
const POP_TIMEOUT: Duration = Duration::from_secs(1);

/// Work item handed to the worker. The frame is an owned copy; the
/// ingestion loop must not touch the buffer after enqueue.
pub struct PersistTask {
    pub frame_index: u64,
    pub frame: Frame,
    pub observations: Vec<ObservedDetection>,
}

/// Structured record written beside every persisted image.
#[derive(Debug, Serialize)]
pub struct DetectionRecord {
    pub timestamp: String,
    pub frame_index: u64,
    pub image_path: String,
    pub detections: Vec<ObservedDetection>,
    pub statistics: ClassCounts,
}

enum WorkerMessage {
    Task(PersistTask),
    Stop,
}

pub struct PersistenceWorker {
    tx: Sender<WorkerMessage>,
    handle: JoinHandle<()>,
    stats: MonitorStats,
}

impl PersistenceWorker {
    /// Start the background worker writing under the given directories.
    /// The directories must already exist (created at startup).
    pub fn spawn(
        images_dir: PathBuf,
        detections_dir: PathBuf,
        capacity: usize,
        stats: MonitorStats,
    ) -> Result<Self> {
        let task_stats = stats.clone();
        Self::spawn_with_processor(capacity, stats, move |task| {
            write_task(&task, &images_dir, &detections_dir, &task_stats)
        })
    }

    /// Worker with a pluggable task processor. Production uses the file
    /// writer above; tests substitute instrumented processors.
    pub(crate) fn spawn_with_processor<P>(
        capacity: usize,
        stats: MonitorStats,
        mut processor: P,
    ) -> Result<Self>
    where
        P: FnMut(PersistTask) -> Result<()> + Send + 'static,
    {
        let (tx, rx) = bounded::<WorkerMessage>(capacity);
        let handle = thread::Builder::new()
            .name("persist-worker".to_string())
            .spawn(move || loop {
                match rx.recv_timeout(POP_TIMEOUT) {
                    Ok(WorkerMessage::Task(task)) => {
                        let frame_index = task.frame_index;
                        if let Err(e) = processor(task) {
                            // One bad write never stops the pipeline.
                            error!("Persistence failed for frame {}: {:#}", frame_index, e);
                        }
                    }
                    Ok(WorkerMessage::Stop) => break,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .context("spawning persistence worker thread")?;

        Ok(Self { tx, handle, stats })
    }

    /// Best-effort enqueue. Returns false when the queue is full and the
    /// task was dropped.
    pub fn submit(&self, task: PersistTask) -> bool {
        match self.tx.try_send(WorkerMessage::Task(task)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.stats.inc(&self.stats.tasks_dropped);
                warn!("Persistence queue full, dropping task");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("Persistence worker gone, dropping task");
                false
            }
        }
    }

    /// Send the stop sentinel and wait for the worker to drain up to it.
    pub fn shutdown(self) {
        if self.tx.send(WorkerMessage::Stop).is_err() {
            warn!("Persistence worker already stopped");
        }
        if self.handle.join().is_err() {
            error!("Persistence worker panicked");
        } else {
            info!("✓ Persistence worker stopped");
        }
    }
}

/// Compact wall-clock stamp, sortable and collision-resistant down to the
/// millisecond, for embedding in output file names.
pub fn sortable_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S_%3f").to_string()
}

pub fn image_file_name(frame_index: u64, stamp: &str) -> String {
    format!("person_{frame_index}_{stamp}.jpg")
}

pub fn record_file_name(frame_index: u64, stamp: &str) -> String {
    format!("detection_{frame_index}_{stamp}.json")
}

fn write_task(
    task: &PersistTask,
    images_dir: &Path,
    detections_dir: &Path,
    stats: &MonitorStats,
) -> Result<()> {
    let stamp = sortable_timestamp();

    let image_path = images_dir.join(image_file_name(task.frame_index, &stamp));
    let annotated = video_io::render_annotated(&task.frame, &task.observations, task.frame_index)?;
    video_io::write_image(&image_path, &annotated)?;
    stats.inc(&stats.images_saved);
    info!("💾 Saved image: {}", image_path.display());

    let record = DetectionRecord {
        timestamp: chrono::Local::now().to_rfc3339(),
        frame_index: task.frame_index,
        image_path: image_path.display().to_string(),
        detections: task.observations.clone(),
        statistics: stats.class_counts(),
    };
    let record_path = detections_dir.join(record_file_name(task.frame_index, &stamp));
    let json = serde_json::to_string_pretty(&record)?;
    std::fs::write(&record_path, json)
        .with_context(|| format!("writing record {}", record_path.display()))?;
    stats.inc(&stats.records_saved);
    info!("📝 Saved record: {}", record_path.display());

    Ok(())
}
