use std::time::Instant;

use anyhow::Result;

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::{TrackId, TrackedObject, VehicleClass};
use crate::detect::speed::{SpeedEstimator, DEFAULT_MAX_HIST};
use crate::detect::tracker::{IouTracker, TrackInput, TrackerConfig};
use crate::frame::Frame;

/// Detection capability built from a per-frame backend, an IoU tracker and a
/// speed estimator.
pub struct TrackingDetector<B: DetectorBackend> {
    backend: B,
    tracker: IouTracker,
    speeds: SpeedEstimator,
    confidence_threshold: f32,
}

impl<B: DetectorBackend> TrackingDetector<B> {
    pub fn new(backend: B, meter_per_pixel: f32) -> Self {
        Self {
            backend,
            tracker: IouTracker::new(TrackerConfig::default()),
            speeds: SpeedEstimator::new(meter_per_pixel, DEFAULT_MAX_HIST),
            confidence_threshold: 0.2,
        }
    }

    pub fn with_threshold(mut self, confidence: f32) -> Self {
        self.confidence_threshold = confidence;
        self
    }

    pub fn with_tracker(mut self, config: TrackerConfig) -> Self {
        self.tracker = IouTracker::new(config);
        self
    }

    pub fn with_max_hist(mut self, meter_per_pixel: f32, max_hist: usize) -> Self {
        self.speeds = SpeedEstimator::new(meter_per_pixel, max_hist);
        self
    }

    fn infer_at(&mut self, frame: &Frame, now: Instant) -> Result<Vec<TrackedObject>> {
        let inputs: Vec<TrackInput> = self
            .backend
            .detect(frame)?
            .into_iter()
            .filter(|det| det.confidence >= self.confidence_threshold)
            .filter_map(|det| {
                VehicleClass::from_class_id(det.class_id).map(|class| TrackInput {
                    bbox: det.bbox,
                    class,
                })
            })
            .collect();

        let update = self.tracker.update(&inputs);
        for id in &update.dropped {
            self.speeds.forget(*id);
        }

        Ok(update
            .hits
            .into_iter()
            .map(|hit| {
                let speed = self.speeds.observe(hit.track_id, hit.bbox.center(), now);
                TrackedObject {
                    track_id: hit.track_id,
                    class: hit.class,
                    bbox: hit.bbox,
                    speed,
                }
            })
            .collect())
    }
}

impl<B: DetectorBackend> DetectionCapability for TrackingDetector<B> {
    fn infer(&mut self, frame: &Frame) -> Result<Vec<TrackedObject>> {
        self.infer_at(frame, Instant::now())
    }

    fn speed_of(&self, track_id: TrackId) -> Option<u32> {
        self.speeds.speed_of(track_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::{BoundingBox, RawDetection};
    use std::time::Duration;

    /// Emits one car moving 10 px right per frame, plus a low-confidence ghost
    /// and an unknown class.
    struct SlidingCar {
        x: f32,
    }

    impl DetectorBackend for SlidingCar {
        fn name(&self) -> &'static str {
            "sliding"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>> {
            self.x += 10.0;
            Ok(vec![
                RawDetection {
                    bbox: BoundingBox::new(self.x, 50.0, self.x + 60.0, 90.0),
                    class_id: 0,
                    confidence: 0.9,
                },
                RawDetection {
                    bbox: BoundingBox::new(300.0, 300.0, 320.0, 320.0),
                    class_id: 1,
                    confidence: 0.05,
                },
                RawDetection {
                    bbox: BoundingBox::new(400.0, 10.0, 420.0, 30.0),
                    class_id: 5,
                    confidence: 0.9,
                },
            ])
        }
    }

    fn frame() -> Frame {
        Frame::from_rgb(vec![0; 8 * 8 * 3], 8, 8, 0).unwrap()
    }

    #[test]
    fn filters_and_tracks_detections() {
        let mut det = TrackingDetector::new(SlidingCar { x: 0.0 }, 0.1);
        let objects = det.infer(&frame()).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].class, VehicleClass::Car);
        assert_eq!(objects[0].speed, None);
    }

    #[test]
    fn speed_appears_after_history_fills() {
        let mut det = TrackingDetector::new(SlidingCar { x: 0.0 }, 0.1).with_max_hist(0.1, 3);
        let t0 = Instant::now();
        det.infer_at(&frame(), t0).unwrap();
        det.infer_at(&frame(), t0 + Duration::from_millis(500)).unwrap();
        let objects = det
            .infer_at(&frame(), t0 + Duration::from_secs(1))
            .unwrap();
        // 20 px * 0.1 m/px in 1 s = 7.2 km/h
        assert_eq!(objects[0].speed, Some(7));
        assert_eq!(det.speed_of(objects[0].track_id), Some(7));
    }
}
