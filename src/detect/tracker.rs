//! Greedy IoU multi-object tracker.
//!
//! Detections are matched to live tracks of the same class by descending IoU.
//! Unmatched detections open new tracks; tracks coast through short gaps and
//! are dropped after `max_coast_frames` consecutive misses. Track ids are
//! never reused by one tracker.

use crate::detect::result::{BoundingBox, TrackId, VehicleClass};

#[derive(Clone, Debug)]
pub struct TrackerConfig {
    /// Minimum IoU to associate a detection with an existing track.
    pub min_iou: f32,
    /// Frames a track survives without a detection before deletion.
    pub max_coast_frames: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_iou: 0.3,
            max_coast_frames: 30,
        }
    }
}

/// Detection handed to the tracker, already mapped to a vehicle class.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackInput {
    pub bbox: BoundingBox,
    pub class: VehicleClass,
}

/// Object confirmed in the current frame.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackHit {
    pub track_id: TrackId,
    pub class: VehicleClass,
    pub bbox: BoundingBox,
}

/// Result of one tracker step.
#[derive(Clone, Debug, Default)]
pub struct TrackerUpdate {
    pub hits: Vec<TrackHit>,
    /// Tracks deleted during this step.
    pub dropped: Vec<TrackId>,
}

struct Track {
    id: TrackId,
    class: VehicleClass,
    bbox: BoundingBox,
    missed: u32,
}

pub struct IouTracker {
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: TrackId,
}

impl IouTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn update(&mut self, detections: &[TrackInput]) -> TrackerUpdate {
        let mut pairs: Vec<(f32, usize, usize)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, det) in detections.iter().enumerate() {
                if track.class != det.class {
                    continue;
                }
                let iou = track.bbox.iou(&det.bbox);
                if iou >= self.config.min_iou {
                    pairs.push((iou, ti, di));
                }
            }
        }
        pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut track_taken = vec![false; self.tracks.len()];
        let mut det_taken = vec![false; detections.len()];
        let mut hits = Vec::with_capacity(detections.len());

        for (_, ti, di) in pairs {
            if track_taken[ti] || det_taken[di] {
                continue;
            }
            track_taken[ti] = true;
            det_taken[di] = true;
            let track = &mut self.tracks[ti];
            track.bbox = detections[di].bbox;
            track.missed = 0;
            hits.push(TrackHit {
                track_id: track.id,
                class: track.class,
                bbox: track.bbox,
            });
        }

        for (track, taken) in self.tracks.iter_mut().zip(&track_taken) {
            if !taken {
                track.missed += 1;
            }
        }

        let max_coast = self.config.max_coast_frames;
        let mut dropped = Vec::new();
        self.tracks.retain(|track| {
            if track.missed > max_coast {
                dropped.push(track.id);
                false
            } else {
                true
            }
        });

        for (det, taken) in detections.iter().zip(&det_taken) {
            if *taken {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            self.tracks.push(Track {
                id,
                class: det.class,
                bbox: det.bbox,
                missed: 0,
            });
            hits.push(TrackHit {
                track_id: id,
                class: det.class,
                bbox: det.bbox,
            });
        }

        TrackerUpdate { hits, dropped }
    }
}
