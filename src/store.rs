//! Shared per-stream published state.
//!
//! Every registered stream owns one slot holding its latest `RoadSummary` and
//! latest `PublishedFrame`. Values are replaced whole behind `Arc`s, so a
//! reader either sees the previous value or the new one and never a mix.
//! Critical sections only swap pointers.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::SystemTime;

use anyhow::{anyhow, Result};

use crate::aggregate::RoadSummary;

/// Latest annotated frame of a stream, JPEG-encoded.
#[derive(Clone, Debug, PartialEq)]
pub struct PublishedFrame {
    pub jpeg: Vec<u8>,
    pub sequence: u64,
    pub published_at: SystemTime,
}

impl PublishedFrame {
    pub fn new(jpeg: Vec<u8>, sequence: u64) -> Self {
        Self {
            jpeg,
            sequence,
            published_at: SystemTime::now(),
        }
    }
}

/// Consistent view of one stream's published state.
#[derive(Clone, Debug)]
pub struct StreamSnapshot {
    pub summary: Arc<RoadSummary>,
    /// `None` until the stream publishes its first frame.
    pub frame: Option<Arc<PublishedFrame>>,
}

impl StreamSnapshot {
    /// Frame bytes, empty before the first frame.
    pub fn frame_bytes(&self) -> &[u8] {
        self.frame
            .as_deref()
            .map(|f| f.jpeg.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Default)]
struct Slot {
    summary: Mutex<Arc<RoadSummary>>,
    frame: Mutex<Option<Arc<PublishedFrame>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct StateStore {
    slots: RwLock<BTreeMap<String, Arc<Slot>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a zeroed entry for `name`. Names are unique.
    pub fn register(&self, name: &str) -> Result<()> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots.contains_key(name) {
            return Err(anyhow!("stream {:?} is already registered", name));
        }
        slots.insert(name.to_string(), Arc::new(Slot::default()));
        Ok(())
    }

    fn slot(&self, name: &str) -> Option<Arc<Slot>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Replace the stream's summary. Returns false for unknown names.
    pub fn publish_summary(&self, name: &str, summary: RoadSummary) -> bool {
        let Some(slot) = self.slot(name) else {
            return false;
        };
        let summary = Arc::new(summary);
        *lock(&slot.summary) = summary;
        true
    }

    /// Replace the stream's frame. Returns false for unknown names.
    pub fn publish_frame(&self, name: &str, frame: PublishedFrame) -> bool {
        let Some(slot) = self.slot(name) else {
            return false;
        };
        let frame = Arc::new(frame);
        *lock(&slot.frame) = Some(frame);
        true
    }

    /// Latest published values, or `None` if `name` was never registered.
    pub fn read(&self, name: &str) -> Option<StreamSnapshot> {
        let slot = self.slot(name)?;
        let summary = lock(&slot.summary).clone();
        let frame = lock(&slot.frame).clone();
        Some(StreamSnapshot { summary, frame })
    }
}
