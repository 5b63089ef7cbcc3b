//! Road Traffic Analytics Engine
//!
//! Processes several road camera streams concurrently. Each stream runs on
//! its own worker thread which detects and tracks vehicles, keeps those whose
//! anchor point falls inside the road's region of interest, and folds them
//! into per-window counts and average speeds.
//!
//! # Architecture
//!
//! 1. **Per-stream isolation**: a worker owns its source, detector and
//!    aggregator. A failing stream never stalls the others.
//! 2. **Latest-value store**: workers publish the newest annotated JPEG and
//!    the newest window summary; readers never see a torn value.
//! 3. **Bounded shutdown**: workers get a grace period, after which they are
//!    detached and can no longer publish.
//!
//! # Module Structure
//!
//! - `frame`: RGB frame type, normalization to the working size, cropping
//! - `ingest`: video sources (local files, synthetic `stub://` streams)
//! - `detect`: detector backends, IoU tracking, speed estimation
//! - `roi`: region-of-interest polygon test and per-frame filtering
//! - `aggregate`: sliding-window counts and average speeds
//! - `annotate` / `encode`: overlay drawing and JPEG encoding
//! - `store`: shared latest-value state for every stream
//! - `worker`: the per-stream processing loop
//! - `orchestrator`: lifecycle, queries and shutdown
//! - `status`: periodic status table in the log
//! - `api`: HTTP read surface over the orchestrator
//! - `config`: daemon and stream configuration

pub mod aggregate;
pub mod annotate;
pub mod api;
pub mod config;
pub mod detect;
pub mod encode;
pub mod frame;
pub mod ingest;
pub mod orchestrator;
pub mod roi;
pub mod status;
pub mod store;
pub mod worker;

pub use aggregate::{FrameSample, RoadSummary, WindowAggregator};
pub use annotate::Annotator;
pub use config::{DaemonConfig, DetectionParams, StreamConfig};
pub use detect::{DetectionCapability, DetectorBackend, TrackedObject, VehicleClass};
pub use frame::{CropRegion, Frame};
pub use ingest::{FileSource, SourceRead, VideoSource};
pub use orchestrator::{
    Orchestrator, OrchestratorOptions, QueryError, ShutdownReport, WorkerState,
};
pub use roi::{RoiFilter, RoiPolygon, ScopedObject};
pub use store::{PublishedFrame, StateStore, StreamSnapshot};
pub use worker::{RenderOptions, StreamWorker, WorkerExit, WorkerStats};
