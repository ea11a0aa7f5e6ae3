// src/tracker.rs
//
// Centroid-based multi-object tracker. Associates per-frame detections to
// persistent track identities by greedy nearest-centroid matching.
//
// Design:
//   - Greedy assignment over the full pairwise distance matrix: all
//     (track, detection) pairs sorted by ascending distance, accepted
//     first-come under `max_distance`. This is deliberately not an optimal
//     bipartite assignment; it is cheap, adequate when objects move slowly
//     relative to the frame rate, and can mis-associate crossing
//     trajectories.
//   - A detection surplus is explained as new objects; a track surplus is
//     explained as disappearance. The two cases are mutually exclusive per
//     update (see `update`).
//   - Class fields are overwritten by the latest matched detection. No
//     smoothing, so a track's label can drift when the detector flickers
//     between classes.

use crate::types::{Detection, TrackingConfig};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

/// Centroids kept per track for trajectory rendering.
const TRAJECTORY_LEN: usize = 30;

/// A persistent identity assigned to a sequence of detections believed to
/// be the same physical object.
#[derive(Debug, Clone)]
pub struct TrackedObject {
    pub id: u32,
    pub centroid: (i32, i32),
    pub class_id: u32,
    pub class_name: String,
    pub bbox: [f32; 4],
    pub confidence: f32,
    pub trajectory: VecDeque<(i32, i32)>,
    /// Consecutive frames without a matching detection.
    pub disappeared_count: u32,
}

impl TrackedObject {
    fn new(id: u32, detection: &Detection) -> Self {
        let centroid = detection.centroid();
        let mut trajectory = VecDeque::with_capacity(TRAJECTORY_LEN);
        trajectory.push_back(centroid);
        Self {
            id,
            centroid,
            class_id: detection.class_id,
            class_name: detection.class_name.clone(),
            bbox: detection.bbox,
            confidence: detection.confidence,
            trajectory,
            disappeared_count: 0,
        }
    }

    fn update_with(&mut self, detection: &Detection) {
        self.centroid = detection.centroid();
        self.bbox = detection.bbox;
        self.class_id = detection.class_id;
        self.class_name = detection.class_name.clone();
        self.confidence = detection.confidence;
        if self.trajectory.len() == TRAJECTORY_LEN {
            self.trajectory.pop_front();
        }
        self.trajectory.push_back(self.centroid);
        self.disappeared_count = 0;
    }
}

pub struct CentroidTracker {
    objects: BTreeMap<u32, TrackedObject>,
    next_id: u32,
    max_disappeared: u32,
    max_distance: f32,
}

impl CentroidTracker {
    pub fn new(config: &TrackingConfig) -> Self {
        Self {
            objects: BTreeMap::new(),
            next_id: 0,
            max_disappeared: config.max_disappeared,
            max_distance: config.max_distance,
        }
    }

    /// Ids handed out so far. Ids are never reused, so this is also the
    /// number of unique objects ever tracked.
    pub fn total_registered(&self) -> u32 {
        self.next_id
    }

    pub fn live_objects(&self) -> &BTreeMap<u32, TrackedObject> {
        &self.objects
    }

    fn register(&mut self, detection: &Detection) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        debug!(
            "🆕 Track {} registered: {} at {:?}",
            id,
            detection.class_name,
            detection.centroid()
        );
        self.objects.insert(id, TrackedObject::new(id, detection));
        id
    }

    fn deregister(&mut self, id: u32) {
        if let Some(obj) = self.objects.remove(&id) {
            debug!(
                "🗑️  Track {} dropped ({}) after {} missed frames",
                id, obj.class_name, obj.disappeared_count
            );
        }
    }

    /// Consume one frame's detections and return the updated live set.
    pub fn update(&mut self, detections: &[Detection]) -> &BTreeMap<u32, TrackedObject> {
        if detections.is_empty() {
            self.age_all();
            return &self.objects;
        }

        if self.objects.is_empty() {
            for detection in detections {
                self.register(detection);
            }
            return &self.objects;
        }

        // Full pairwise distance matrix, flattened and sorted ascending.
        let mut pairs: Vec<(f32, u32, usize)> = Vec::with_capacity(self.objects.len() * detections.len());
        for (&id, obj) in &self.objects {
            for (di, detection) in detections.iter().enumerate() {
                let (cx, cy) = detection.centroid();
                let dx = (obj.centroid.0 - cx) as f32;
                let dy = (obj.centroid.1 - cy) as f32;
                pairs.push(((dx * dx + dy * dy).sqrt(), id, di));
            }
        }
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        // Greedy acceptance: each track and each detection used at most once.
        let mut matched_ids: Vec<u32> = Vec::new();
        let mut matched_dets = vec![false; detections.len()];
        for (dist, id, di) in pairs {
            if dist > self.max_distance {
                break;
            }
            if matched_dets[di] || matched_ids.contains(&id) {
                continue;
            }
            matched_ids.push(id);
            matched_dets[di] = true;
            if let Some(obj) = self.objects.get_mut(&id) {
                obj.update_with(&detections[di]);
            }
        }

        if self.objects.len() >= detections.len() {
            // Track surplus: unmatched tracks age toward removal. Unmatched
            // detections (only possible when every surviving pair exceeded
            // max_distance) are not registered in this branch.
            let unmatched: Vec<u32> = self
                .objects
                .keys()
                .copied()
                .filter(|id| !matched_ids.contains(id))
                .collect();
            for id in unmatched {
                self.age_one(id);
            }
        } else {
            // Detection surplus: every leftover detection becomes a new track.
            for (di, detection) in detections.iter().enumerate() {
                if !matched_dets[di] {
                    self.register(detection);
                }
            }
        }

        &self.objects
    }

    fn age_all(&mut self) {
        let ids: Vec<u32> = self.objects.keys().copied().collect();
        for id in ids {
            self.age_one(id);
        }
    }

    fn age_one(&mut self, id: u32) {
        let expired = match self.objects.get_mut(&id) {
            Some(obj) => {
                obj.disappeared_count += 1;
                obj.disappeared_count > self.max_disappeared
            }
            None => false,
        };
        if expired {
            self.deregister(id);
        }
    }
}
