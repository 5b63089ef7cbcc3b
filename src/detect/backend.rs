use anyhow::Result;

use crate::detect::result::{RawDetection, TrackId, TrackedObject};
use crate::frame::Frame;

/// Per-frame object detector (no tracking state required).
///
/// Implementations treat the frame as read-only. Boxes are returned in the
/// pixel space of the frame they were given.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Tracking + speed estimation capability consumed by a stream worker.
///
/// One instance per stream. Implementations keep their own track history
/// across calls; nothing is shared between streams.
pub trait DetectionCapability: Send {
    /// Detect and track objects in one frame.
    fn infer(&mut self, frame: &Frame) -> Result<Vec<TrackedObject>>;

    /// Latest speed estimate for a track, in km/h.
    fn speed_of(&self, track_id: TrackId) -> Option<u32>;
}

impl<T: DetectionCapability + ?Sized> DetectionCapability for Box<T> {
    fn infer(&mut self, frame: &Frame) -> Result<Vec<TrackedObject>> {
        (**self).infer(frame)
    }

    fn speed_of(&self, track_id: TrackId) -> Option<u32> {
        (**self).speed_of(track_id)
    }
}
