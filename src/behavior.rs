// src/behavior.rs
//
// Coarse spatial behavior tags and persistence dedup. The behavior tag
// places a bounding box in a 3x3 zone grid over the frame; the dedup filter
// decides whether an observation of a tracked id is novel enough to persist.
// Both are owned by the ingestion loop only.

use crate::types::ObjectCategory;
use std::collections::HashMap;
use tracing::debug;

/// Fractional thresholds splitting each axis into three zones.
const ZONE_LOW: f32 = 0.3;
const ZONE_HIGH: f32 = 0.7;

/// Zone tag for a box center: horizontal base (`left`/`center`/`right`)
/// with a `_top`/`_bottom` suffix appended only off the vertical center,
/// e.g. `"center"`, `"left"`, `"right_bottom"`.
pub fn classify_behavior(bbox: &[f32; 4], frame_width: usize, frame_height: usize) -> String {
    let cx = (bbox[0] + bbox[2]) / 2.0;
    let cy = (bbox[1] + bbox[3]) / 2.0;
    let w = frame_width as f32;
    let h = frame_height as f32;

    let mut behavior = if cx < w * ZONE_LOW {
        "left".to_string()
    } else if cx > w * ZONE_HIGH {
        "right".to_string()
    } else {
        "center".to_string()
    };

    if cy < h * ZONE_LOW {
        behavior.push_str("_top");
    } else if cy > h * ZONE_HIGH {
        behavior.push_str("_bottom");
    }

    behavior
}

#[derive(Debug, Clone, Copy)]
pub struct DedupState {
    pub last_saved_frame: u64,
    pub save_count: u64,
}

/// Per-track persistence gate: an id is persisted again only after
/// `window_frames` frames have passed since its last persisted observation.
pub struct DedupFilter {
    window_frames: u64,
    history: HashMap<u32, DedupState>,
}

impl DedupFilter {
    pub fn new(window_frames: u64) -> Self {
        Self {
            window_frames,
            history: HashMap::new(),
        }
    }

    /// Decide whether this observation should be persisted, committing the
    /// dedup bookkeeping when it should. Only the class of interest gates
    /// on the window; other categories never persist on their own.
    pub fn should_persist(
        &mut self,
        track_id: u32,
        category: ObjectCategory,
        current_frame: u64,
    ) -> bool {
        if category != ObjectCategory::Person {
            return false;
        }

        let due = match self.history.get(&track_id) {
            None => true,
            Some(state) => current_frame - state.last_saved_frame >= self.window_frames,
        };
        if !due {
            return false;
        }

        let state = self.history.entry(track_id).or_insert(DedupState {
            last_saved_frame: current_frame,
            save_count: 0,
        });
        state.last_saved_frame = current_frame;
        state.save_count += 1;
        debug!(
            "💾 Track {} accepted for persistence at frame {} (save #{})",
            track_id, current_frame, state.save_count
        );
        true
    }

    pub fn state_of(&self, track_id: u32) -> Option<&DedupState> {
        self.history.get(&track_id)
    }
}
