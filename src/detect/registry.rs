use anyhow::Result;

use crate::config::DetectionParams;

use super::backend::{DetectionCapability, DetectorBackend};
use super::backends::StubBackend;
use super::tracker::TrackerConfig;
use super::tracking::TrackingDetector;

/// Square input size of the bundled YOLOv8 export.
pub const MODEL_INPUT_SIZE: u32 = 640;

/// Build one stream's detection capability from its detector settings.
///
/// No model path selects the stub backend. A model path needs the
/// `backend-tract` feature. Only the `cpu` device exists; other selectors
/// are logged and ignored.
pub fn build_capability(
    params: &DetectionParams,
    meter_per_pixel: f32,
) -> Result<Box<dyn DetectionCapability>> {
    if !params.device.eq_ignore_ascii_case("cpu") {
        log::warn!(
            "detection device {:?} is not available, running on cpu",
            params.device
        );
    }
    let tracker = TrackerConfig {
        min_iou: params.iou,
        ..TrackerConfig::default()
    };
    match &params.model_path {
        None => Ok(wrap(StubBackend::new(), params, meter_per_pixel, tracker)),
        #[cfg(feature = "backend-tract")]
        Some(path) => {
            let backend =
                super::backends::TractBackend::new(path, MODEL_INPUT_SIZE, MODEL_INPUT_SIZE)?
                    .with_thresholds(params.confidence, params.iou);
            Ok(wrap(backend, params, meter_per_pixel, tracker))
        }
        #[cfg(not(feature = "backend-tract"))]
        Some(path) => Err(anyhow::anyhow!(
            "model {} requires the backend-tract feature",
            path.display()
        )),
    }
}

fn wrap<B: DetectorBackend + 'static>(
    mut backend: B,
    params: &DetectionParams,
    meter_per_pixel: f32,
    tracker: TrackerConfig,
) -> Box<dyn DetectionCapability> {
    if let Err(err) = backend.warm_up() {
        log::warn!("{} backend warm-up failed: {:#}", backend.name(), err);
    }
    log::debug!(
        "detection backend {} (confidence {}, iou {})",
        backend.name(),
        params.confidence,
        params.iou
    );
    Box::new(
        TrackingDetector::new(backend, meter_per_pixel)
            .with_threshold(params.confidence)
            .with_tracker(tracker),
    )
}
