//! Worker supervision and the query surface.
//!
//! The orchestrator owns the stream configurations, starts one named OS
//! thread per stream, and answers queries from the shared store. Queries never
//! touch worker state beyond one store read.
//!
//! Shutdown raises every worker's stop flag and waits up to the timeout.
//! Workers still running after that lose their publish permit (their
//! publishers become no-ops) and their threads are detached.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::aggregate::RoadSummary;
use crate::config::{validate_streams, StreamConfig};
use crate::detect::{build_capability, DetectionCapability};
use crate::ingest::{open_source, VideoSource};
use crate::status::{StatusLogger, StatusRow, DEFAULT_STATUS_INTERVAL};
use crate::store::{StateStore, StreamSnapshot};
use crate::worker::{
    FramePublisher, RenderOptions, StreamWorker, SummaryPublisher, WorkerCounters, WorkerExit,
};

pub type SourceFactory = Arc<dyn Fn(&str) -> Result<Box<dyn VideoSource>> + Send + Sync>;
pub type DetectorFactory =
    Arc<dyn Fn(&StreamConfig) -> Result<Box<dyn DetectionCapability>> + Send + Sync>;

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const JOIN_POLL: Duration = Duration::from_millis(10);

/// Query for a stream name that was never configured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryError {
    NotFound(String),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::NotFound(name) => write!(f, "stream not found: {:?}", name),
        }
    }
}

impl std::error::Error for QueryError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    /// The thread returned (stopped, source failure, or panic).
    Exited,
    /// Still running at shutdown deadline; permit revoked and detached.
    Terminated,
}

/// Outcome of one `shutdown` call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub graceful: Vec<String>,
    pub forced: Vec<String>,
}

impl ShutdownReport {
    pub fn is_empty(&self) -> bool {
        self.graceful.is_empty() && self.forced.is_empty()
    }
}

#[derive(Clone)]
pub struct OrchestratorOptions {
    pub render: RenderOptions,
    pub shutdown_timeout: Duration,
    pub show_log: bool,
    pub status_interval: Duration,
    pub source_factory: SourceFactory,
    pub detector_factory: DetectorFactory,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            render: RenderOptions::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            show_log: false,
            status_interval: DEFAULT_STATUS_INTERVAL,
            source_factory: Arc::new(open_source),
            detector_factory: Arc::new(|config: &StreamConfig| {
                build_capability(&config.detection, config.meter_per_pixel)
            }),
        }
    }
}

struct WorkerSlot {
    name: String,
    stop: Arc<AtomicBool>,
    permit: Arc<AtomicBool>,
    counters: Arc<WorkerCounters>,
    handle: Option<JoinHandle<WorkerExit>>,
    state: WorkerState,
}

impl WorkerSlot {
    fn current_state(&self) -> WorkerState {
        match (&self.handle, self.state) {
            (_, WorkerState::Terminated) => WorkerState::Terminated,
            (Some(handle), _) if !handle.is_finished() => WorkerState::Running,
            _ => WorkerState::Exited,
        }
    }
}

#[derive(Default)]
struct Runtime {
    started: bool,
    workers: Vec<WorkerSlot>,
    status: Option<StatusLogger>,
}

pub struct Orchestrator {
    streams: Vec<StreamConfig>,
    store: Arc<StateStore>,
    options: OrchestratorOptions,
    runtime: Mutex<Runtime>,
}

impl Orchestrator {
    /// Validate the stream set. Nothing runs until `start`.
    pub fn new(streams: Vec<StreamConfig>) -> Result<Self> {
        Self::with_options(streams, OrchestratorOptions::default())
    }

    pub fn with_options(streams: Vec<StreamConfig>, options: OrchestratorOptions) -> Result<Self> {
        validate_streams(&streams)?;
        Ok(Self {
            streams,
            store: Arc::new(StateStore::new()),
            options,
            runtime: Mutex::new(Runtime::default()),
        })
    }

    fn runtime(&self) -> MutexGuard<'_, Runtime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register every stream and launch its worker. Fails if already started.
    pub fn start(&self) -> Result<()> {
        let mut runtime = self.runtime();
        if runtime.started {
            return Err(anyhow!("orchestrator already started"));
        }
        runtime.started = true;

        for config in &self.streams {
            self.store.register(&config.name)?;
        }
        for config in &self.streams {
            let slot = self.spawn_worker(config.clone())?;
            runtime.workers.push(slot);
        }
        log::info!("started {} stream workers", runtime.workers.len());

        if self.options.show_log {
            let store = Arc::clone(&self.store);
            let counters: Vec<(String, Arc<WorkerCounters>)> = runtime
                .workers
                .iter()
                .map(|w| (w.name.clone(), Arc::clone(&w.counters)))
                .collect();
            runtime.status = Some(StatusLogger::spawn(
                self.options.status_interval,
                move || status_rows(&store, &counters),
            )?);
        }
        Ok(())
    }

    fn spawn_worker(&self, config: StreamConfig) -> Result<WorkerSlot> {
        let name = config.name.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let permit = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(WorkerCounters::default());

        let publish_frame: FramePublisher = {
            let store = Arc::clone(&self.store);
            let permit = Arc::clone(&permit);
            let name = name.clone();
            Box::new(move |frame| {
                if permit.load(Ordering::SeqCst) {
                    store.publish_frame(&name, frame);
                }
            })
        };
        let publish_summary: SummaryPublisher = {
            let store = Arc::clone(&self.store);
            let permit = Arc::clone(&permit);
            let name = name.clone();
            Box::new(move |summary| {
                if permit.load(Ordering::SeqCst) {
                    store.publish_summary(&name, summary);
                }
            })
        };

        let sources = Arc::clone(&self.options.source_factory);
        let detectors = Arc::clone(&self.options.detector_factory);
        let render = self.options.render.clone();
        let worker_stop = Arc::clone(&stop);
        let worker_counters = Arc::clone(&counters);

        let handle = thread::Builder::new()
            .name(format!("road-worker:{}", name))
            .spawn(move || {
                let capability = match detectors(&config) {
                    Ok(capability) => capability,
                    Err(err) => {
                        log::error!("[{}] failed to build detector: {:#}", config.name, err);
                        return WorkerExit::DetectorFailed(format!("{:#}", err));
                    }
                };
                StreamWorker::new(config, capability, publish_frame, publish_summary, worker_stop)
                    .with_render(render)
                    .with_counters(worker_counters)
                    .run(|uri| sources(uri))
            })
            .with_context(|| format!("failed to spawn worker thread for {:?}", name))?;

        Ok(WorkerSlot {
            name,
            stop,
            permit,
            counters,
            handle: Some(handle),
            state: WorkerState::Running,
        })
    }

    fn is_configured(&self, name: &str) -> bool {
        self.streams.iter().any(|s| s.name == name)
    }

    /// Configured names, in configuration order.
    pub fn list_stream_names(&self) -> Vec<String> {
        self.streams.iter().map(|s| s.name.clone()).collect()
    }

    /// Latest published summary and frame of a stream.
    pub fn snapshot(&self, name: &str) -> Result<StreamSnapshot, QueryError> {
        if !self.is_configured(name) {
            return Err(QueryError::NotFound(name.to_string()));
        }
        Ok(self.store.read(name).unwrap_or_else(|| StreamSnapshot {
            summary: Arc::new(RoadSummary::default()),
            frame: None,
        }))
    }

    /// Latest encoded frame; empty before the stream's first frame.
    pub fn get_frame(&self, name: &str) -> Result<Vec<u8>, QueryError> {
        self.snapshot(name).map(|s| s.frame_bytes().to_vec())
    }

    /// Latest window summary; zeros before the first window closes.
    pub fn get_info(&self, name: &str) -> Result<RoadSummary, QueryError> {
        self.snapshot(name).map(|s| s.summary.as_ref().clone())
    }

    pub fn worker_states(&self) -> Vec<(String, WorkerState)> {
        self.runtime()
            .workers
            .iter()
            .map(|w| (w.name.clone(), w.current_state()))
            .collect()
    }

    /// Stop every worker, waiting up to `timeout` before forcing.
    ///
    /// Safe to call repeatedly and from a signal-handling thread; calls after
    /// the first return an empty report.
    pub fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        // Claim workers under the lock, then wait without it so queries keep
        // answering during the grace period.
        let (status, mut pending) = {
            let mut runtime = self.runtime();
            let pending: Vec<usize> = runtime
                .workers
                .iter()
                .enumerate()
                .filter(|(_, w)| w.handle.is_some() && !w.stop.swap(true, Ordering::SeqCst))
                .map(|(index, _)| index)
                .collect();
            (runtime.status.take(), pending)
        };
        if let Some(mut status) = status {
            status.stop();
        }
        if pending.is_empty() {
            return report;
        }
        log::info!("stopping {} stream workers", pending.len());

        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut runtime = self.runtime();
                pending.retain(|&index| {
                    let worker = &mut runtime.workers[index];
                    if worker.handle.as_ref().is_some_and(|h| h.is_finished()) {
                        join_worker(worker);
                        report.graceful.push(worker.name.clone());
                        false
                    } else {
                        true
                    }
                });
            }
            if pending.is_empty() || Instant::now() >= deadline {
                break;
            }
            thread::sleep(JOIN_POLL);
        }

        let mut runtime = self.runtime();
        for index in pending {
            let worker = &mut runtime.workers[index];
            worker.permit.store(false, Ordering::SeqCst);
            worker.handle = None;
            worker.state = WorkerState::Terminated;
            log::warn!(
                "[{}] worker did not stop within {:?}; publishing revoked, thread detached",
                worker.name,
                timeout
            );
            report.forced.push(worker.name.clone());
        }
        log::info!(
            "shutdown complete: {} graceful, {} forced",
            report.graceful.len(),
            report.forced.len()
        );
        report
    }
}

fn join_worker(worker: &mut WorkerSlot) {
    let Some(handle) = worker.handle.take() else {
        return;
    };
    worker.state = WorkerState::Exited;
    match handle.join() {
        Ok(WorkerExit::Stopped) => log::debug!("[{}] worker joined", worker.name),
        Ok(exit) => log::info!("[{}] worker had exited early: {:?}", worker.name, exit),
        Err(_) => log::error!("[{}] worker thread panicked", worker.name),
    }
}

fn status_rows(store: &StateStore, counters: &[(String, Arc<WorkerCounters>)]) -> Vec<StatusRow> {
    counters
        .iter()
        .map(|(name, counters)| StatusRow {
            name: name.clone(),
            summary: store
                .read(name)
                .map(|s| s.summary.as_ref().clone())
                .unwrap_or_default(),
            stats: counters.snapshot(),
        })
        .collect()
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        let started = self.runtime().started;
        if started {
            self.shutdown(self.options.shutdown_timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roi::RoiPolygon;

    fn stream(name: &str) -> StreamConfig {
        StreamConfig::new(
            name,
            format!("stub://{}?frames=5&width=64&height=48", name),
            0.03,
            RoiPolygon::new(vec![(0, 0), (600, 0), (600, 400), (0, 400)]).unwrap(),
        )
    }

    #[test]
    fn rejects_empty_and_duplicate_stream_sets() {
        assert!(Orchestrator::new(Vec::new()).is_err());
        assert!(Orchestrator::new(vec![stream("a"), stream("a")]).is_err());
    }

    #[test]
    fn queries_before_start_return_defaults() {
        let orchestrator = Orchestrator::new(vec![stream("a")]).unwrap();
        assert!(orchestrator.get_info("a").unwrap().is_zero());
        assert!(orchestrator.get_frame("a").unwrap().is_empty());
        assert_eq!(
            orchestrator.get_info("b"),
            Err(QueryError::NotFound("b".into()))
        );
        assert!(orchestrator.shutdown(Duration::from_millis(10)).is_empty());
    }

    #[test]
    fn double_start_is_an_error() {
        let orchestrator = Orchestrator::new(vec![stream("a")]).unwrap();
        orchestrator.start().unwrap();
        assert!(orchestrator.start().is_err());
        let report = orchestrator.shutdown(Duration::from_secs(5));
        assert_eq!(report.graceful, vec!["a".to_string()]);
    }

    #[test]
    fn query_error_display_names_stream() {
        let err = QueryError::NotFound("Van Quan".into());
        assert_eq!(err.to_string(), "stream not found: \"Van Quan\"");
    }
}
