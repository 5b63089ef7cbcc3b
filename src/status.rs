//! Periodic status table of every road, logged at info level.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::aggregate::RoadSummary;
use crate::detect::VehicleClass;
use crate::worker::WorkerStats;

pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(5);
const STOP_POLL: Duration = Duration::from_millis(50);

/// One line of the table.
#[derive(Clone, Debug)]
pub struct StatusRow {
    pub name: String,
    pub summary: RoadSummary,
    pub stats: WorkerStats,
}

/// Render the table as lines, header first.
pub fn render_table(rows: &[StatusRow]) -> Vec<String> {
    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(format!(
        "| {:<25} | {:>5} {:>9} | {:>5} {:>9} | {:>8} {:>6} |",
        "road", "cars", "car km/h", "motor", "mot km/h", "frames", "errors"
    ));
    lines.push(format!("|{}|", "-".repeat(lines[0].chars().count() - 2)));
    for row in rows {
        lines.push(format!(
            "| {:<25} | {:>5} {:>9} | {:>5} {:>9} | {:>8} {:>6} |",
            row.name,
            row.summary.count(VehicleClass::Car),
            row.summary.avg_speed(VehicleClass::Car),
            row.summary.count(VehicleClass::Motorbike),
            row.summary.avg_speed(VehicleClass::Motorbike),
            row.stats.frames,
            row.stats.frame_errors + row.stats.read_errors,
        ));
    }
    lines
}

pub struct StatusLogger {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StatusLogger {
    /// Log `rows()` every `interval` on a background thread until stopped.
    pub fn spawn<F>(interval: Duration, rows: F) -> Result<Self>
    where
        F: Fn() -> Vec<StatusRow> + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("road-status".into())
            .spawn(move || {
                let mut next = Instant::now();
                while !thread_stop.load(Ordering::SeqCst) {
                    if Instant::now() >= next {
                        for line in render_table(&rows()) {
                            log::info!("{}", line);
                        }
                        next = Instant::now() + interval;
                    }
                    thread::sleep(STOP_POLL.min(interval));
                }
            })
            .context("failed to spawn status logger thread")?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("status logger thread panicked");
            }
        }
    }
}

impl Drop for StatusLogger {
    fn drop(&mut self) {
        self.stop();
    }
}
