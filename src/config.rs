use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::encode::DEFAULT_JPEG_QUALITY;
use crate::frame::{CropRegion, WORK_HEIGHT, WORK_WIDTH};
use crate::roi::RoiPolygon;

const DEFAULT_API_ADDR: &str = "127.0.0.1:8800";
const DEFAULT_WINDOW_SECS: u64 = 30;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;
const DEFAULT_CONFIDENCE: f32 = 0.2;
const DEFAULT_IOU: f32 = 0.3;
const DEFAULT_DEVICE: &str = "cpu";

#[derive(Debug, Deserialize, Default)]
struct DaemonConfigFile {
    api: Option<ApiConfigFile>,
    draw: Option<bool>,
    show_log: Option<bool>,
    jpeg_quality: Option<u8>,
    font_path: Option<PathBuf>,
    shutdown_timeout_secs: Option<u64>,
    streams: Option<Vec<StreamConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamConfigFile {
    name: Option<String>,
    source: String,
    meter_per_pixel: f32,
    roi: Vec<[i32; 2]>,
    crop_origin: Option<[u32; 2]>,
    window_secs: Option<u64>,
    detection: Option<DetectionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    model_path: Option<PathBuf>,
    confidence: Option<f32>,
    iou: Option<f32>,
    device: Option<String>,
}

/// Detector settings for one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionParams {
    /// ONNX model. `None` runs the stub backend (no detections).
    pub model_path: Option<PathBuf>,
    pub confidence: f32,
    pub iou: f32,
    pub device: String,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            model_path: None,
            confidence: DEFAULT_CONFIDENCE,
            iou: DEFAULT_IOU,
            device: DEFAULT_DEVICE.to_string(),
        }
    }
}

/// Immutable configuration of one monitored road.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub name: String,
    pub source: String,
    pub meter_per_pixel: f32,
    pub roi: RoiPolygon,
    pub crop_origin: CropRegion,
    pub window: Duration,
    pub detection: DetectionParams,
}

impl StreamConfig {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        meter_per_pixel: f32,
        roi: RoiPolygon,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            meter_per_pixel,
            roi,
            crop_origin: CropRegion::default(),
            window: Duration::from_secs(DEFAULT_WINDOW_SECS),
            detection: DetectionParams::default(),
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_crop_origin(mut self, crop_origin: CropRegion) -> Self {
        self.crop_origin = crop_origin;
        self
    }

    pub fn with_detection(mut self, detection: DetectionParams) -> Self {
        self.detection = detection;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("stream name must not be empty"));
        }
        if self.source.trim().is_empty() {
            return Err(anyhow!("stream {:?} has no source", self.name));
        }
        if !(self.meter_per_pixel.is_finite() && self.meter_per_pixel > 0.0) {
            return Err(anyhow!(
                "stream {:?}: meter_per_pixel must be positive",
                self.name
            ));
        }
        if self.window.is_zero() {
            return Err(anyhow!("stream {:?}: window must be non-zero", self.name));
        }
        if self.crop_origin.x >= WORK_WIDTH || self.crop_origin.y >= WORK_HEIGHT {
            return Err(anyhow!(
                "stream {:?}: crop origin ({}, {}) lies outside the {}x{} working frame",
                self.name,
                self.crop_origin.x,
                self.crop_origin.y,
                WORK_WIDTH,
                WORK_HEIGHT
            ));
        }
        for (label, value) in [
            ("confidence", self.detection.confidence),
            ("iou", self.detection.iou),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!(
                    "stream {:?}: detection {} must be within 0..=1",
                    self.name,
                    label
                ));
            }
        }
        Ok(())
    }
}

/// Validate a full stream set: non-empty, each stream valid, names unique.
pub fn validate_streams(streams: &[StreamConfig]) -> Result<()> {
    if streams.is_empty() {
        return Err(anyhow!("no streams configured"));
    }
    let mut seen = BTreeSet::new();
    for stream in streams {
        stream.validate()?;
        if !seen.insert(stream.name.as_str()) {
            return Err(anyhow!("duplicate stream name {:?}", stream.name));
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub api_addr: String,
    pub draw: bool,
    pub show_log: bool,
    pub jpeg_quality: u8,
    pub font_path: Option<PathBuf>,
    pub shutdown_timeout: Duration,
    pub streams: Vec<StreamConfig>,
}

impl DaemonConfig {
    /// Load from `ROAD_CONFIG` (JSON, or TOML for `.toml` paths), apply
    /// environment overrides, validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ROAD_CONFIG").ok();
        let path = config_path
            .as_deref()
            .filter(|path| !path.trim().is_empty())
            .map(Path::new);
        Self::load_from(path)
    }

    /// Same as `load`, with an explicit config file.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DaemonConfigFile) -> Result<Self> {
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let streams = file
            .streams
            .unwrap_or_default()
            .into_iter()
            .map(stream_from_file)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            api_addr,
            draw: file.draw.unwrap_or(true),
            show_log: file.show_log.unwrap_or(false),
            jpeg_quality: file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            font_path: file.font_path,
            shutdown_timeout: Duration::from_secs(
                file.shutdown_timeout_secs
                    .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            ),
            streams,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("ROAD_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(show_log) = std::env::var("ROAD_SHOW_LOG") {
            if !show_log.trim().is_empty() {
                self.show_log = parse_flag(&show_log)
                    .ok_or_else(|| anyhow!("ROAD_SHOW_LOG must be one of 1/0/true/false"))?;
            }
        }
        if let Ok(window) = std::env::var("ROAD_WINDOW_SECS") {
            if !window.trim().is_empty() {
                let seconds: u64 = window.trim().parse().map_err(|_| {
                    anyhow!("ROAD_WINDOW_SECS must be an integer number of seconds")
                })?;
                for stream in &mut self.streams {
                    stream.window = Duration::from_secs(seconds);
                }
            }
        }
        if let Ok(path) = std::env::var("ROAD_FONT_PATH") {
            if !path.trim().is_empty() {
                self.font_path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be within 1..=100"));
        }
        validate_streams(&self.streams)
    }
}

fn stream_from_file(file: StreamConfigFile) -> Result<StreamConfig> {
    let name = match file.name {
        Some(name) => name,
        None => default_stream_name(&file.source)?,
    };
    let roi = RoiPolygon::new(file.roi.iter().map(|[x, y]| (*x, *y)).collect())
        .with_context(|| format!("stream {:?}", name))?;
    let detection = file.detection.unwrap_or_default();
    let defaults = DetectionParams::default();
    let [crop_x, crop_y] = file.crop_origin.unwrap_or([0, 0]);
    Ok(StreamConfig {
        name,
        source: file.source,
        meter_per_pixel: file.meter_per_pixel,
        roi,
        crop_origin: CropRegion::new(crop_x, crop_y),
        window: Duration::from_secs(file.window_secs.unwrap_or(DEFAULT_WINDOW_SECS)),
        detection: DetectionParams {
            model_path: detection.model_path,
            confidence: detection.confidence.unwrap_or(defaults.confidence),
            iou: detection.iou.unwrap_or(defaults.iou),
            device: detection.device.unwrap_or(defaults.device),
        },
    })
}

/// Road name derived from a source: stub name, or the video file stem.
pub fn default_stream_name(source: &str) -> Result<String> {
    if let Some(rest) = source.strip_prefix("stub://") {
        let name = rest.split('?').next().unwrap_or_default();
        if !name.is_empty() {
            return Ok(name.to_string());
        }
    } else if let Some(stem) = Path::new(source).file_stem().and_then(|s| s.to_str()) {
        if !stem.is_empty() {
            return Ok(stem.to_string());
        }
    }
    Err(anyhow!("cannot derive a stream name from source {:?}", source))
}

fn read_config_file(path: &Path) -> Result<DaemonConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn road() -> RoiPolygon {
        RoiPolygon::new(vec![(50, 400), (50, 265), (370, 130), (540, 130), (490, 400)]).unwrap()
    }

    #[test]
    fn derives_names_from_sources() {
        assert_eq!(
            default_stream_name("./video_test/Van Quan.mp4").unwrap(),
            "Van Quan"
        );
        assert_eq!(default_stream_name("stub://Nga Tu So?frames=3").unwrap(), "Nga Tu So");
        assert!(default_stream_name("stub://").is_err());
    }

    #[test]
    fn stream_validation_rejects_bad_values() {
        assert!(StreamConfig::new("a", "stub://a", 0.03, road()).validate().is_ok());
        assert!(StreamConfig::new("", "stub://a", 0.03, road()).validate().is_err());
        assert!(StreamConfig::new("a", "stub://a", 0.0, road()).validate().is_err());
        assert!(StreamConfig::new("a", "stub://a", 0.03, road())
            .with_window(Duration::ZERO)
            .validate()
            .is_err());
        assert!(StreamConfig::new("a", "stub://a", 0.03, road())
            .with_crop_origin(CropRegion::new(600, 0))
            .validate()
            .is_err());
        let detection = DetectionParams {
            confidence: 1.5,
            ..DetectionParams::default()
        };
        assert!(StreamConfig::new("a", "stub://a", 0.03, road())
            .with_detection(detection)
            .validate()
            .is_err());
    }

    #[test]
    fn stream_sets_need_unique_names() {
        assert!(validate_streams(&[]).is_err());
        let a = StreamConfig::new("a", "stub://a", 0.03, road());
        assert!(validate_streams(&[a.clone()]).is_ok());
        assert!(validate_streams(&[a.clone(), a]).is_err());
    }

    #[test]
    fn parses_flags() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" 0 "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
