// src/types.rs

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub stream: StreamConfig,
    pub detector: DetectorConfig,
    pub tracker: TrackingConfig,
    pub dedup: DedupConfig,
    pub events: EventConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub url: String,
    /// Frames read and discarded before monitoring starts, so model
    /// first-run latency does not distort FPS accounting.
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u32,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub model_path: String,
    pub confidence_threshold: f32,
    /// COCO class id treated as the class of interest (gates persistence
    /// and event recording).
    pub person_class_id: u32,
    /// COCO class ids counted as vehicles in aggregate statistics.
    pub vehicle_class_ids: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Consecutive unmatched frames before a track is dropped.
    pub max_disappeared: u32,
    /// Maximum centroid distance (pixels) for a detection to match a track.
    pub max_distance: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Minimum frame gap before the same track id is persisted again.
    pub window_frames: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    pub enabled: bool,
    /// Maximum length of one event clip in seconds.
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    pub output_dir: String,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

fn default_warmup_frames() -> u32 {
    10
}

fn default_reconnect_delay_ms() -> u64 {
    500
}

impl DetectorConfig {
    pub fn categorize(&self, class_id: u32) -> ObjectCategory {
        if class_id == self.person_class_id {
            ObjectCategory::Person
        } else if self.vehicle_class_ids.contains(&class_id) {
            ObjectCategory::Vehicle
        } else {
            ObjectCategory::Other
        }
    }
}

/// One decoded video frame, RGB row-major. Cloning makes the owned deep
/// copy required before handing a frame to another thread.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp_ms: f64,
}

/// One detector output for one frame.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // [x1, y1, x2, y2] in frame pixels
    pub confidence: f32,
    pub class_id: u32,
    pub class_name: String,
}

impl Detection {
    pub fn centroid(&self) -> (i32, i32) {
        (
            ((self.bbox[0] + self.bbox[2]) / 2.0) as i32,
            ((self.bbox[1] + self.bbox[3]) / 2.0) as i32,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectCategory {
    Person,
    Vehicle,
    Other,
}

impl ObjectCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Vehicle => "vehicle",
            Self::Other => "other",
        }
    }
}

/// One tracked object observed on one frame, as it appears in persisted
/// records and activity logs.
#[derive(Debug, Clone, Serialize)]
pub struct ObservedDetection {
    pub track_id: u32,
    #[serde(rename = "type")]
    pub category: String,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: [i32; 4], // [x1, y1, x2, y2]
    pub behavior: String,
}
