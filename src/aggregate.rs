//! Sliding-window aggregation.
//!
//! Every processed frame contributes a `FrameSample`. The `WindowAggregator`
//! keeps per-class accumulators and, once `window` has elapsed since the last
//! boundary, collapses them into a fresh `RoadSummary`:
//!
//! - value per class = integer-truncated mean of the non-zero samples
//! - no non-zero samples = 0 (never the previous window's value)
//!
//! Accumulators are cleared and the window restarts at the collapse instant.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::detect::VehicleClass;

/// Per-frame aggregation input.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameSample {
    counts: BTreeMap<VehicleClass, u32>,
    speeds: BTreeMap<VehicleClass, Vec<u32>>,
}

impl FrameSample {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one object. Missing or zero speeds are not speed samples.
    pub fn record(&mut self, class: VehicleClass, speed: Option<u32>) {
        *self.counts.entry(class).or_insert(0) += 1;
        if let Some(speed) = speed.filter(|s| *s > 0) {
            self.speeds.entry(class).or_default().push(speed);
        }
    }

    pub fn count(&self, class: VehicleClass) -> u32 {
        self.counts.get(&class).copied().unwrap_or(0)
    }

    pub fn speeds(&self, class: VehicleClass) -> &[u32] {
        self.speeds.get(&class).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Published per-road summary. Replaced whole on every window boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoadSummary {
    count_by_class: BTreeMap<VehicleClass, u32>,
    avg_speed_by_class: BTreeMap<VehicleClass, u32>,
}

impl Default for RoadSummary {
    fn default() -> Self {
        Self {
            count_by_class: VehicleClass::ALL.iter().map(|c| (*c, 0)).collect(),
            avg_speed_by_class: VehicleClass::ALL.iter().map(|c| (*c, 0)).collect(),
        }
    }
}

impl RoadSummary {
    pub fn count(&self, class: VehicleClass) -> u32 {
        self.count_by_class.get(&class).copied().unwrap_or(0)
    }

    pub fn avg_speed(&self, class: VehicleClass) -> u32 {
        self.avg_speed_by_class.get(&class).copied().unwrap_or(0)
    }

    pub fn count_by_class(&self) -> &BTreeMap<VehicleClass, u32> {
        &self.count_by_class
    }

    pub fn avg_speed_by_class(&self) -> &BTreeMap<VehicleClass, u32> {
        &self.avg_speed_by_class
    }

    pub fn is_zero(&self) -> bool {
        self.count_by_class.values().all(|v| *v == 0)
            && self.avg_speed_by_class.values().all(|v| *v == 0)
    }
}

fn summary_key(class: VehicleClass) -> &'static str {
    match class {
        VehicleClass::Car => "car",
        VehicleClass::Motorbike => "motor",
    }
}

// Flat keys (`count_car`, `speed_motor`, ...) are what the dashboard reads.
impl Serialize for RoadSummary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(VehicleClass::ALL.len() * 2))?;
        for class in VehicleClass::ALL {
            map.serialize_entry(&format!("count_{}", summary_key(class)), &self.count(class))?;
        }
        for class in VehicleClass::ALL {
            map.serialize_entry(
                &format!("speed_{}", summary_key(class)),
                &self.avg_speed(class),
            )?;
        }
        map.end()
    }
}

/// Integer-truncated mean of the non-zero values, or 0 when there are none.
pub fn avg_non_zero(values: &[u32]) -> u32 {
    let (sum, n) = values
        .iter()
        .filter(|v| **v != 0)
        .fold((0u64, 0u64), |(sum, n), v| (sum + *v as u64, n + 1));
    if n == 0 {
        0
    } else {
        (sum / n) as u32
    }
}

/// Window state machine. Collecting is the resting state; collapsing happens
/// inline in `observe_at`/`poll_at` and always returns to collecting.
pub struct WindowAggregator {
    window: Duration,
    window_start: Instant,
    counts: BTreeMap<VehicleClass, Vec<u32>>,
    speeds: BTreeMap<VehicleClass, Vec<u32>>,
    frames_in_window: u64,
}

impl WindowAggregator {
    pub fn starting_at(window: Duration, start: Instant) -> Self {
        Self {
            window,
            window_start: start,
            counts: BTreeMap::new(),
            speeds: BTreeMap::new(),
            frames_in_window: 0,
        }
    }

    pub fn frames_in_window(&self) -> u64 {
        self.frames_in_window
    }

    /// Append a sample, then collapse if the window has elapsed.
    pub fn observe_at(&mut self, sample: &FrameSample, now: Instant) -> Option<RoadSummary> {
        for class in VehicleClass::ALL {
            self.counts.entry(class).or_default().push(sample.count(class));
            self.speeds
                .entry(class)
                .or_default()
                .extend_from_slice(sample.speeds(class));
        }
        self.frames_in_window += 1;
        self.poll_at(now)
    }

    /// Collapse without a new sample if the window has elapsed.
    ///
    /// Lets a stream that produces no frames still publish zeros after one window.
    pub fn poll_at(&mut self, now: Instant) -> Option<RoadSummary> {
        if now.saturating_duration_since(self.window_start) < self.window {
            return None;
        }
        Some(self.collapse(now))
    }

    fn collapse(&mut self, now: Instant) -> RoadSummary {
        let mut summary = RoadSummary::default();
        for class in VehicleClass::ALL {
            let counts = self.counts.get(&class).map(Vec::as_slice).unwrap_or(&[]);
            let speeds = self.speeds.get(&class).map(Vec::as_slice).unwrap_or(&[]);
            summary.count_by_class.insert(class, avg_non_zero(counts));
            summary.avg_speed_by_class.insert(class, avg_non_zero(speeds));
        }
        self.counts.clear();
        self.speeds.clear();
        self.frames_in_window = 0;
        self.window_start = now;
        summary
    }
}
