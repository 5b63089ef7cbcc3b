use serde::{Deserialize, Serialize};

/// Vehicle classes the engine aggregates.
///
/// Model class ids: `0 = Car`, `1 = Motorbike`. Anything else is dropped
/// before tracking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Car,
    Motorbike,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 2] = [VehicleClass::Car, VehicleClass::Motorbike];

    pub fn from_class_id(class_id: u32) -> Option<Self> {
        match class_id {
            0 => Some(VehicleClass::Car),
            1 => Some(VehicleClass::Motorbike),
            _ => None,
        }
    }

    pub fn class_id(self) -> u32 {
        match self {
            VehicleClass::Car => 0,
            VehicleClass::Motorbike => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            VehicleClass::Car => "car",
            VehicleClass::Motorbike => "motorbike",
        }
    }
}

impl std::fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Track identifier, stable for one physical object within one tracker.
pub type TrackId = u64;

/// Axis-aligned box in pixel coordinates (`x1,y1` top-left, `x2,y2` bottom-right).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Integer center, truncated like pixel coordinates.
    pub fn center(&self) -> (f32, f32) {
        (
            ((self.x1 + self.x2) / 2.0).floor(),
            ((self.y1 + self.y2) / 2.0).floor(),
        )
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let l = self.x1.max(other.x1);
        let r = self.x2.min(other.x2);
        let t = self.y1.max(other.y1);
        let b = self.y2.min(other.y2);
        let inter = (r - l).max(0.0) * (b - t).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Untracked detection straight out of a backend.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub bbox: BoundingBox,
    pub class_id: u32,
    pub confidence: f32,
}

/// Tracked object for one frame.
///
/// `bbox` is in detection-space coordinates (the cropped sub-frame).
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedObject {
    pub track_id: TrackId,
    pub class: VehicleClass,
    pub bbox: BoundingBox,
    /// Instantaneous speed in km/h, absent until estimated.
    pub speed: Option<u32>,
}
