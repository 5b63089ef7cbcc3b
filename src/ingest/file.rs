//! Local file frame source.
//!
//! `FileSource` reads frames from a local video file (FFmpeg backend) or from
//! a synthetic `stub://` generator used by tests and demos. The source never
//! fetches remote URLs.

use anyhow::{anyhow, Context, Result};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::{SourceRead, VideoSource};
use crate::frame::{Frame, WORK_HEIGHT, WORK_WIDTH};

const STUB_SCHEME: &str = "stub://";

/// Parameters of a synthetic `stub://` source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticConfig {
    pub name: String,
    /// Frames before end-of-stream.
    pub frames: u64,
    pub width: u32,
    pub height: u32,
    /// When non-zero, every `fail_every`-th read returns an error.
    pub fail_every: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            frames: 300,
            width: WORK_WIDTH,
            height: WORK_HEIGHT,
            fail_every: 0,
        }
    }
}

impl SyntheticConfig {
    /// Parse `stub://<name>[?frames=N&width=W&height=H&fail_every=K]`.
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix(STUB_SCHEME)
            .ok_or_else(|| anyhow!("not a stub:// uri: {}", uri))?;
        let (name, query) = rest.split_once('?').unwrap_or((rest, ""));
        let mut config = SyntheticConfig {
            name: name.to_string(),
            ..SyntheticConfig::default()
        };
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let context = || format!("invalid {} value {:?} in {}", key, value, uri);
            let parse_u64 = || value.parse::<u64>().with_context(context);
            let parse_u32 = || value.parse::<u32>().with_context(context);
            match key.as_ref() {
                "frames" => config.frames = parse_u64()?,
                "width" => config.width = parse_u32()?,
                "height" => config.height = parse_u32()?,
                "fail_every" => config.fail_every = parse_u64()?,
                other => return Err(anyhow!("unknown stub parameter {:?} in {}", other, uri)),
            }
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("stub source dimensions must be non-zero"));
        }
        Ok(config)
    }
}

/// Local file frame source.
pub struct FileSource {
    uri: String,
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn open(uri: &str) -> Result<Self> {
        if !is_local_file_path(uri) {
            return Err(anyhow!(
                "video source {:?} is not a local path (remote URL schemes are not supported)",
                uri
            ));
        }
        if uri.starts_with(STUB_SCHEME) {
            return Ok(Self {
                uri: uri.to_string(),
                backend: FileBackend::Synthetic(SyntheticFileSource::new(
                    SyntheticConfig::parse(uri)?,
                )),
            });
        }
        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            Ok(Self {
                uri: uri.to_string(),
                backend: FileBackend::Ffmpeg(FfmpegFileSource::open(uri)?),
            })
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Err(anyhow!(
                "cannot open {:?}: file decoding requires the ingest-file-ffmpeg feature",
                uri
            ))
        }
    }

    /// Frames produced since open (not reset by rewinds).
    pub fn frames_read(&self) -> u64 {
        match &self.backend {
            FileBackend::Synthetic(source) => source.frames_read,
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.frames_read(),
        }
    }
}

impl VideoSource for FileSource {
    fn read(&mut self) -> Result<SourceRead> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.read(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.read(),
        }
    }

    fn rewind(&mut self) -> Result<()> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => {
                source.position = 0;
                Ok(())
            }
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.rewind(),
        }
    }

    fn describe(&self) -> String {
        match &self.backend {
            FileBackend::Synthetic(_) => format!("{} (synthetic)", self.uri),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(_) => format!("{} (ffmpeg)", self.uri),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

struct SyntheticFileSource {
    config: SyntheticConfig,
    position: u64,
    reads: u64,
    frames_read: u64,
}

impl SyntheticFileSource {
    fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            position: 0,
            reads: 0,
            frames_read: 0,
        }
    }

    fn read(&mut self) -> Result<SourceRead> {
        self.reads += 1;
        if self.config.fail_every > 0 && self.reads % self.config.fail_every == 0 {
            return Err(anyhow!(
                "synthetic read failure on {} (read {})",
                self.config.name,
                self.reads
            ));
        }
        if self.position >= self.config.frames {
            return Ok(SourceRead::EndOfStream);
        }
        let sequence = self.position;
        self.position += 1;
        self.frames_read += 1;
        let pixels = self.generate_pixels(sequence);
        Frame::from_rgb(pixels, self.config.width, self.config.height, sequence)
            .map(SourceRead::Frame)
    }

    fn generate_pixels(&self, sequence: u64) -> Vec<u8> {
        let (w, h) = (self.config.width as usize, self.config.height as usize);
        let mut pixels = vec![0u8; w * h * 3];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let x = (i % w) as u64;
            let y = (i / w) as u64;
            px[0] = ((x + sequence) % 256) as u8;
            px[1] = (y % 256) as u8;
            px[2] = (sequence % 256) as u8;
        }
        pixels
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with(STUB_SCHEME) {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_frame(source: &mut FileSource) -> Frame {
        match source.read().unwrap() {
            SourceRead::Frame(frame) => frame,
            SourceRead::EndOfStream => panic!("unexpected end of stream"),
        }
    }

    #[test]
    fn parses_stub_parameters() {
        let config = SyntheticConfig::parse("stub://Van%20Quan?frames=5&width=64&height=32").unwrap();
        assert_eq!(config.name, "Van%20Quan");
        assert_eq!(config.frames, 5);
        assert_eq!((config.width, config.height), (64, 32));

        let defaults = SyntheticConfig::parse("stub://road").unwrap();
        assert_eq!(defaults.frames, 300);
        assert_eq!((defaults.width, defaults.height), (WORK_WIDTH, WORK_HEIGHT));
    }

    #[test]
    fn rejects_bad_stub_parameters() {
        assert!(SyntheticConfig::parse("stub://road?frames=abc").is_err());
        assert!(SyntheticConfig::parse("stub://road?speed=3").is_err());
        assert!(SyntheticConfig::parse("stub://road?width=0").is_err());
    }

    #[test]
    fn oversized_dimensions_are_rejected_not_wrapped() {
        // 2^32 + 1 would wrap to a 1 pixel wide frame.
        let err = SyntheticConfig::parse("stub://road?width=4294967297").unwrap_err();
        assert!(format!("{:#}", err).contains("invalid width"));
        assert!(SyntheticConfig::parse("stub://road?height=4294967296").is_err());
        let max = SyntheticConfig::parse("stub://road?width=4294967295").unwrap();
        assert_eq!(max.width, u32::MAX);
    }

    #[test]
    fn rejects_remote_schemes() {
        assert!(FileSource::open("rtsp://camera/stream").is_err());
        assert!(FileSource::open("https://example.com/video.mp4").is_err());
        assert!(FileSource::open("  ").is_err());
    }

    #[test]
    fn synthetic_source_ends_and_rewinds() {
        let mut source = FileSource::open("stub://road?frames=2&width=8&height=4").unwrap();
        assert_eq!(read_frame(&mut source).sequence, 0);
        assert_eq!(read_frame(&mut source).sequence, 1);
        assert!(matches!(source.read().unwrap(), SourceRead::EndOfStream));
        source.rewind().unwrap();
        let frame = read_frame(&mut source);
        assert_eq!(frame.sequence, 0);
        assert_eq!((frame.width(), frame.height()), (8, 4));
        assert_eq!(source.frames_read(), 3);
    }

    #[test]
    fn synthetic_failures_are_periodic() {
        let mut source =
            FileSource::open("stub://road?frames=10&width=4&height=4&fail_every=2").unwrap();
        assert!(source.read().is_ok());
        assert!(source.read().is_err());
        assert!(source.read().is_ok());
        assert!(source.read().is_err());
    }

    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    #[test]
    fn local_path_needs_ffmpeg_feature() {
        let err = FileSource::open("./video_test/Van Quan.mp4").err().unwrap();
        assert!(err.to_string().contains("ingest-file-ffmpeg"));
    }
}
