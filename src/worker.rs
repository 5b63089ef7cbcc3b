//! Per-stream processing loop.
//!
//! A `StreamWorker` owns everything one road needs: its detection capability,
//! ROI filter, overlay renderer and window aggregator. Each iteration reads a
//! frame, runs detection on the operative sub-region, filters, aggregates and
//! hands the results to two injected publishers. The publishers are the only
//! place data leaves the worker.
//!
//! The loop never ends on its own while the source can be read: end of stream
//! rewinds, read failures skip the iteration, and a frame whose processing
//! fails (or panics) is logged and dropped.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::aggregate::{RoadSummary, WindowAggregator};
use crate::annotate::Annotator;
use crate::config::StreamConfig;
use crate::detect::DetectionCapability;
use crate::encode::{encode_jpeg, DEFAULT_JPEG_QUALITY};
use crate::frame::Frame;
use crate::ingest::{SourceRead, VideoSource};
use crate::roi::RoiFilter;
use crate::store::PublishedFrame;

/// Receives every encoded frame, in processing order.
pub type FramePublisher = Box<dyn FnMut(PublishedFrame) + Send>;
/// Receives every collapsed window summary.
pub type SummaryPublisher = Box<dyn FnMut(RoadSummary) + Send>;
/// Monotonic time source. Injected so tests can drive window boundaries.
pub type Clock = Box<dyn Fn() -> Instant + Send>;

/// Pause after a read failure or a source that is empty right after a rewind.
const IDLE_BACKOFF: Duration = Duration::from_millis(20);
const WARN_INTERVAL: Duration = Duration::from_secs(1);

/// Overlay and encoding options shared by all workers of a daemon.
#[derive(Clone)]
pub struct RenderOptions {
    /// `None` publishes the raw resized frame.
    pub annotator: Option<Annotator>,
    pub jpeg_quality: u8,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            annotator: Some(Annotator::new()),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Counters readable from outside the worker thread.
#[derive(Debug, Default)]
pub struct WorkerCounters {
    frames: AtomicU64,
    frame_errors: AtomicU64,
    read_errors: AtomicU64,
    rewinds: AtomicU64,
    windows: AtomicU64,
}

/// Point-in-time copy of `WorkerCounters`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub frames: u64,
    pub frame_errors: u64,
    pub read_errors: u64,
    pub rewinds: u64,
    pub windows: u64,
}

impl WorkerCounters {
    pub fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            frames: self.frames.load(Ordering::Relaxed),
            frame_errors: self.frame_errors.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            rewinds: self.rewinds.load(Ordering::Relaxed),
            windows: self.windows.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Why `run` returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerExit {
    /// The stop flag was raised.
    Stopped,
    /// The source could not be opened or rewound.
    SourceFailed(String),
    /// The detection capability could not be built.
    DetectorFailed(String),
}

/// At most one warning per interval; the rest are counted.
struct WarnLimiter {
    last: Option<Instant>,
    suppressed: u64,
}

impl WarnLimiter {
    fn new() -> Self {
        Self {
            last: None,
            suppressed: 0,
        }
    }

    /// Returns the number of warnings suppressed since the last emitted one,
    /// or `None` if this warning should be suppressed.
    fn admit(&mut self, now: Instant) -> Option<u64> {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < WARN_INTERVAL => {
                self.suppressed += 1;
                None
            }
            _ => {
                self.last = Some(now);
                Some(std::mem::take(&mut self.suppressed))
            }
        }
    }
}

struct FpsMeter {
    last: Option<Instant>,
    fps: f32,
}

impl FpsMeter {
    fn tick(&mut self, now: Instant) -> f32 {
        if let Some(last) = self.last {
            let dt = now.saturating_duration_since(last).as_secs_f32();
            if dt > 0.0 {
                let instant = 1.0 / dt;
                self.fps = if self.fps == 0.0 {
                    instant
                } else {
                    0.9 * self.fps + 0.1 * instant
                };
            }
        }
        self.last = Some(now);
        self.fps
    }
}

pub struct StreamWorker {
    config: StreamConfig,
    capability: Box<dyn DetectionCapability>,
    filter: RoiFilter,
    render: RenderOptions,
    publish_frame: FramePublisher,
    publish_summary: SummaryPublisher,
    stop: Arc<AtomicBool>,
    counters: Arc<WorkerCounters>,
    clock: Clock,
    last_summary: RoadSummary,
    fps: FpsMeter,
    warn: WarnLimiter,
}

impl StreamWorker {
    pub fn new(
        config: StreamConfig,
        capability: Box<dyn DetectionCapability>,
        publish_frame: FramePublisher,
        publish_summary: SummaryPublisher,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let filter = RoiFilter::new(config.roi.clone(), config.crop_origin);
        Self {
            config,
            capability,
            filter,
            render: RenderOptions::default(),
            publish_frame,
            publish_summary,
            stop,
            counters: Arc::new(WorkerCounters::default()),
            clock: Box::new(Instant::now),
            last_summary: RoadSummary::default(),
            fps: FpsMeter {
                last: None,
                fps: 0.0,
            },
            warn: WarnLimiter::new(),
        }
    }

    pub fn with_render(mut self, render: RenderOptions) -> Self {
        self.render = render;
        self
    }

    pub fn with_counters(mut self, counters: Arc<WorkerCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn counters(&self) -> Arc<WorkerCounters> {
        Arc::clone(&self.counters)
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Open the stream's source with `open` and process it until stopped.
    pub fn run<F>(mut self, open: F) -> WorkerExit
    where
        F: FnOnce(&str) -> Result<Box<dyn VideoSource>>,
    {
        let mut source = match open(&self.config.source) {
            Ok(source) => source,
            Err(err) => {
                log::error!(
                    "[{}] failed to open source {}: {:#}",
                    self.config.name,
                    self.config.source,
                    err
                );
                return WorkerExit::SourceFailed(format!("{:#}", err));
            }
        };
        log::info!("[{}] worker started on {}", self.config.name, source.describe());

        let mut aggregator = WindowAggregator::starting_at(self.config.window, (self.clock)());
        let mut empty_since_rewind = false;

        while !self.stopped() {
            match source.read() {
                Ok(SourceRead::Frame(frame)) => {
                    empty_since_rewind = false;
                    if self.process_guarded(frame, &mut aggregator) {
                        continue;
                    }
                }
                Ok(SourceRead::EndOfStream) => {
                    WorkerCounters::bump(&self.counters.rewinds);
                    log::debug!("[{}] end of stream, rewinding", self.config.name);
                    if let Err(err) = source.rewind() {
                        log::error!("[{}] failed to rewind source: {:#}", self.config.name, err);
                        return WorkerExit::SourceFailed(format!("{:#}", err));
                    }
                    if empty_since_rewind {
                        std::thread::sleep(IDLE_BACKOFF);
                    }
                    empty_since_rewind = true;
                }
                Err(err) => {
                    WorkerCounters::bump(&self.counters.read_errors);
                    self.warn_limited(format_args!("frame read failed: {:#}", err));
                    std::thread::sleep(IDLE_BACKOFF);
                }
            }
            // A stalled source or a failing detector still rolls its window over.
            let now = (self.clock)();
            if let Some(summary) = aggregator.poll_at(now) {
                self.publish_window(summary);
            }
        }

        log::info!("[{}] worker stopped", self.config.name);
        WorkerExit::Stopped
    }

    /// Returns false when the frame was dropped.
    fn process_guarded(&mut self, frame: Frame, aggregator: &mut WindowAggregator) -> bool {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.process_frame(frame, aggregator)
        }));
        let failure = match outcome {
            Ok(Ok(())) => {
                WorkerCounters::bump(&self.counters.frames);
                return true;
            }
            Ok(Err(err)) => format!("{:#}", err),
            Err(payload) => format!("panic: {}", panic_message(payload.as_ref())),
        };
        WorkerCounters::bump(&self.counters.frame_errors);
        self.warn_limited(format_args!("frame dropped: {}", failure));
        false
    }

    fn process_frame(&mut self, frame: Frame, aggregator: &mut WindowAggregator) -> Result<()> {
        let mut frame = frame.normalized();
        let sequence = frame.sequence;
        let view = frame.crop(self.config.crop_origin)?;
        let objects = self.capability.infer(&view)?;

        let capability = &self.capability;
        let outcome = self
            .filter
            .apply(&objects, |track_id| capability.speed_of(track_id));

        let now = (self.clock)();
        if let Some(summary) = aggregator.observe_at(&outcome.sample, now) {
            self.publish_window(summary);
        }
        let fps = self.fps.tick(now);

        if let Some(annotator) = &self.render.annotator {
            annotator.draw(
                frame.image_mut(),
                self.filter.polygon(),
                &outcome.in_scope,
                &self.last_summary,
                fps,
            );
        }
        let jpeg = encode_jpeg(frame.image(), self.render.jpeg_quality)?;
        (self.publish_frame)(PublishedFrame::new(jpeg, sequence));
        Ok(())
    }

    fn publish_window(&mut self, summary: RoadSummary) {
        WorkerCounters::bump(&self.counters.windows);
        log::debug!(
            "[{}] window closed: {}",
            self.config.name,
            serde_json::to_string(&summary).unwrap_or_default()
        );
        self.last_summary = summary.clone();
        (self.publish_summary)(summary);
    }

    fn warn_limited(&mut self, message: std::fmt::Arguments<'_>) {
        let now = Instant::now();
        if let Some(suppressed) = self.warn.admit(now) {
            if suppressed > 0 {
                log::warn!(
                    "[{}] {} ({} similar warnings suppressed)",
                    self.config.name,
                    message,
                    suppressed
                );
            } else {
                log::warn!("[{}] {}", self.config.name, message);
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
