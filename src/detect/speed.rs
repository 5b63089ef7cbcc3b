use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use crate::detect::result::TrackId;

/// Default number of anchor samples collected before a speed is computed.
pub const DEFAULT_MAX_HIST: usize = 20;

/// Per-track speed estimation from anchor displacement.
///
/// Once a track has `max_hist` samples its speed is computed from the first
/// and last sample and locked for the rest of the track's life.
pub struct SpeedEstimator {
    meter_per_pixel: f32,
    max_hist: usize,
    history: HashMap<TrackId, VecDeque<((f32, f32), Instant)>>,
    speeds: HashMap<TrackId, u32>,
}

impl SpeedEstimator {
    pub fn new(meter_per_pixel: f32, max_hist: usize) -> Self {
        Self {
            meter_per_pixel,
            max_hist: max_hist.max(2),
            history: HashMap::new(),
            speeds: HashMap::new(),
        }
    }

    /// Record an anchor position for a track. Returns the track's speed, if known.
    pub fn observe(&mut self, track_id: TrackId, anchor: (f32, f32), at: Instant) -> Option<u32> {
        if let Some(speed) = self.speeds.get(&track_id) {
            return Some(*speed);
        }
        let hist = self.history.entry(track_id).or_default();
        hist.push_back((anchor, at));
        if hist.len() < self.max_hist {
            return None;
        }

        let (p0, t0) = hist.front().copied()?;
        let (p1, t1) = hist.back().copied()?;
        let dt = t1.saturating_duration_since(t0).as_secs_f64();
        if dt <= 0.0 {
            hist.pop_front();
            return None;
        }
        let dx = (p1.0 - p0.0) as f64;
        let dy = (p1.1 - p0.1) as f64;
        let meters = (dx * dx + dy * dy).sqrt() * self.meter_per_pixel as f64;
        let speed = (meters / dt * 3.6) as u32;
        self.history.remove(&track_id);
        self.speeds.insert(track_id, speed);
        Some(speed)
    }

    pub fn speed_of(&self, track_id: TrackId) -> Option<u32> {
        self.speeds.get(&track_id).copied()
    }

    /// Forget everything about a track the tracker dropped.
    pub fn forget(&mut self, track_id: TrackId) {
        self.history.remove(&track_id);
        self.speeds.remove(&track_id);
    }
}
