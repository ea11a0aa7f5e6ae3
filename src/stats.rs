// src/stats.rs
//
// Running counters shared between the ingestion loop and the persistence
// worker. Counters are monotonic; the worker only reads snapshots for the
// records it writes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct MonitorStats {
    pub frames_processed: Arc<AtomicU64>,
    pub person_detections: Arc<AtomicU64>,
    pub vehicle_detections: Arc<AtomicU64>,
    pub other_detections: Arc<AtomicU64>,
    pub unique_tracks: Arc<AtomicU64>,
    pub reconnects: Arc<AtomicU64>,
    pub images_saved: Arc<AtomicU64>,
    pub records_saved: Arc<AtomicU64>,
    pub clips_recorded: Arc<AtomicU64>,
    pub tasks_dropped: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl MonitorStats {
    pub fn new() -> Self {
        Self {
            frames_processed: Arc::new(AtomicU64::new(0)),
            person_detections: Arc::new(AtomicU64::new(0)),
            vehicle_detections: Arc::new(AtomicU64::new(0)),
            other_detections: Arc::new(AtomicU64::new(0)),
            unique_tracks: Arc::new(AtomicU64::new(0)),
            reconnects: Arc::new(AtomicU64::new(0)),
            images_saved: Arc::new(AtomicU64::new(0)),
            records_saved: Arc::new(AtomicU64::new(0)),
            clips_recorded: Arc::new(AtomicU64::new(0)),
            tasks_dropped: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Per-class counters as embedded in every persisted record.
    pub fn class_counts(&self) -> ClassCounts {
        ClassCounts {
            person: self.person_detections.load(Ordering::Relaxed),
            vehicle: self.vehicle_detections.load(Ordering::Relaxed),
            other: self.other_detections.load(Ordering::Relaxed),
        }
    }

    pub fn summary(&self) -> StatsSummary {
        StatsSummary {
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            person_detections: self.person_detections.load(Ordering::Relaxed),
            vehicle_detections: self.vehicle_detections.load(Ordering::Relaxed),
            other_detections: self.other_detections.load(Ordering::Relaxed),
            unique_tracks: self.unique_tracks.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            images_saved: self.images_saved.load(Ordering::Relaxed),
            records_saved: self.records_saved.load(Ordering::Relaxed),
            clips_recorded: self.clips_recorded.load(Ordering::Relaxed),
            tasks_dropped: self.tasks_dropped.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for MonitorStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ClassCounts {
    pub person: u64,
    pub vehicle: u64,
    pub other: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatsSummary {
    pub frames_processed: u64,
    pub person_detections: u64,
    pub vehicle_detections: u64,
    pub other_detections: u64,
    pub unique_tracks: u64,
    pub reconnects: u64,
    pub images_saved: u64,
    pub records_saved: u64,
    pub clips_recorded: u64,
    pub tasks_dropped: u64,
    pub elapsed_secs: f64,
}
