mod backend;
mod backends;
mod registry;
mod result;
pub mod speed;
pub mod tracker;
mod tracking;

pub use backend::{DetectionCapability, DetectorBackend};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::{build_capability, MODEL_INPUT_SIZE};
pub use result::{BoundingBox, RawDetection, TrackId, TrackedObject, VehicleClass};
pub use speed::SpeedEstimator;
pub use tracker::{IouTracker, TrackerConfig};
pub use tracking::TrackingDetector;
