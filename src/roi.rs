//! Region-of-interest filtering.
//!
//! An object counts toward a road's metrics only when its anchor (bounding
//! box center, translated into full-frame coordinates) lies inside or on the
//! boundary of the road's polygon. Filtering never feeds back into the
//! detector's own tracking state.

use anyhow::{anyhow, Result};

use crate::aggregate::FrameSample;
use crate::detect::{TrackId, TrackedObject, VehicleClass};
use crate::frame::CropRegion;

/// Closed polygon in working-frame pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct RoiPolygon {
    points: Vec<(i32, i32)>,
}

/// Position of a point relative to a polygon.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointPlacement {
    Inside,
    OnBoundary,
    Outside,
}

impl RoiPolygon {
    pub fn new(points: Vec<(i32, i32)>) -> Result<Self> {
        if points.len() < 3 {
            return Err(anyhow!(
                "roi polygon needs at least 3 points, got {}",
                points.len()
            ));
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[(i32, i32)] {
        &self.points
    }

    /// Closed edges, last point joined back to the first.
    pub fn edges(&self) -> impl Iterator<Item = ((i32, i32), (i32, i32))> + '_ {
        self.points
            .iter()
            .copied()
            .zip(self.points.iter().copied().cycle().skip(1))
    }

    pub fn placement(&self, point: (f32, f32)) -> PointPlacement {
        let (px, py) = (point.0 as f64, point.1 as f64);
        let mut inside = false;
        for ((ax, ay), (bx, by)) in self.edges() {
            let (ax, ay, bx, by) = (ax as f64, ay as f64, bx as f64, by as f64);

            let cross = (bx - ax) * (py - ay) - (by - ay) * (px - ax);
            if cross.abs() < 1e-9
                && px >= ax.min(bx)
                && px <= ax.max(bx)
                && py >= ay.min(by)
                && py <= ay.max(by)
            {
                return PointPlacement::OnBoundary;
            }

            if (ay > py) != (by > py) {
                let x_at = ax + (py - ay) * (bx - ax) / (by - ay);
                if px < x_at {
                    inside = !inside;
                }
            }
        }
        if inside {
            PointPlacement::Inside
        } else {
            PointPlacement::Outside
        }
    }

    /// True when the point is inside or on the boundary.
    pub fn contains(&self, point: (f32, f32)) -> bool {
        self.placement(point) != PointPlacement::Outside
    }
}

/// An object that passed the ROI test, in full-frame coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct ScopedObject {
    pub track_id: TrackId,
    pub class: VehicleClass,
    pub anchor: (i32, i32),
    pub speed: Option<u32>,
}

/// Output of filtering one frame's tracked objects.
#[derive(Clone, Debug, Default)]
pub struct RoiOutcome {
    pub sample: FrameSample,
    pub in_scope: Vec<ScopedObject>,
}

/// Applies a road's polygon to tracked objects.
#[derive(Clone, Debug)]
pub struct RoiFilter {
    polygon: RoiPolygon,
    crop: CropRegion,
}

impl RoiFilter {
    pub fn new(polygon: RoiPolygon, crop: CropRegion) -> Self {
        Self { polygon, crop }
    }

    pub fn polygon(&self) -> &RoiPolygon {
        &self.polygon
    }

    /// Filter objects and build this frame's sample.
    ///
    /// `speed_of` resolves a speed for objects whose own estimate is absent
    /// (the detector's persistent per-track map).
    pub fn apply<F>(&self, objects: &[TrackedObject], speed_of: F) -> RoiOutcome
    where
        F: Fn(TrackId) -> Option<u32>,
    {
        let mut outcome = RoiOutcome::default();
        for object in objects {
            let anchor = self.crop.to_frame(object.bbox.center());
            if !self.polygon.contains(anchor) {
                continue;
            }
            let speed = object.speed.or_else(|| speed_of(object.track_id));
            outcome.sample.record(object.class, speed);
            outcome.in_scope.push(ScopedObject {
                track_id: object.track_id,
                class: object.class,
                anchor: (anchor.0 as i32, anchor.1 as i32),
                speed,
            });
        }
        outcome
    }
}
