//! Video sources.
//!
//! - `stub://<name>?frames=N&width=W&height=H`: synthetic looping source
//! - local file path: FFmpeg decoder (feature: ingest-file-ffmpeg)
//!
//! Sources are finite. They report `SourceRead::EndOfStream` at the end and
//! the worker rewinds them, so every stream behaves as an endless loop.
//! Remote acquisition (RTSP, HTTP) is not supported.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;

use anyhow::Result;

use crate::frame::Frame;

pub use file::{FileSource, SyntheticConfig};

/// Outcome of one read.
#[derive(Debug)]
pub enum SourceRead {
    Frame(Frame),
    EndOfStream,
}

/// Sequential frame reader with seek-to-start.
///
/// Sources are opened on the worker thread that reads them and need not be `Send`.
pub trait VideoSource {
    /// Next frame, or `EndOfStream` once the source is exhausted.
    fn read(&mut self) -> Result<SourceRead>;

    /// Seek back to the first frame.
    fn rewind(&mut self) -> Result<()>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

impl<T: VideoSource + ?Sized> VideoSource for Box<T> {
    fn read(&mut self) -> Result<SourceRead> {
        (**self).read()
    }

    fn rewind(&mut self) -> Result<()> {
        (**self).rewind()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Open the source named by `uri`.
pub fn open_source(uri: &str) -> Result<Box<dyn VideoSource>> {
    let source = FileSource::open(uri)?;
    log::info!("opened video source {}", source.describe());
    Ok(Box::new(source))
}
