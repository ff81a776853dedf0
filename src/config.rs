// src/config.rs - Calibration constants and pipeline settings
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::gesture::ScreenRegion;
use crate::joints::{HAND_LEFT, HAND_RIGHT};
use crate::mapping::{MappingMode, SENSOR_DEPTH_HEIGHT, SENSOR_DEPTH_WIDTH};
use crate::sound::Waveform;

/// Highest tick rate accepted; above this the tick interval rounds toward zero.
pub const MAX_TICK_HZ: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub transport: TransportConfig,
    pub mapping: MappingConfig,
    pub smoothing: SmoothingConfig,
    pub control: ControlConfig,
    pub instruments: Vec<InstrumentConfig>,
    pub regions: Vec<ScreenRegion>,
    /// Frames a joint may go unmentioned before it counts as untracked.
    pub stale_after_frames: Option<u64>,
    pub recording: RecordingConfig,
    pub tick_hz: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    /// Only frames carrying this event name are ingested.
    pub event_name: String,
    /// First delay before reconnecting after the bridge drops; doubles per
    /// failed attempt up to `reconnect_max_ms`.
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    pub sensitivity: f64,
    pub sensor_width: f64,
    pub sensor_height: f64,
    pub viewport_width: f64,
    pub viewport_height: f64,
    pub mode: MappingMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Lerp rate per second toward the latest target.
    pub lerp_rate: f64,
    pub pan_joint: String,
    pub pan_speed: f64,
    pub pan_lerp_rate: f64,
    pub pan_max_deviation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisCalibration {
    /// Screen coordinate of the axis origin.
    pub origin: f64,
    /// Distance from the origin at which the control saturates.
    pub length: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub min_pitch: f64,
    pub max_pitch: f64,
    pub min_volume_db: f64,
    pub max_volume_db: f64,
    /// Vertical axis; pitch rises with height above `origin`.
    pub pitch_axis: AxisCalibration,
    /// Horizontal axis; volume rises with distance right of `origin`.
    pub volume_axis: AxisCalibration,
    pub pitch_joint: String,
    pub volume_joint: String,
    pub default_instrument: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub key: String,
    pub label: String,
    pub kind: VoiceKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceKind {
    File { path: PathBuf, base_frequency: f64 },
    Procedural { waveform: Waveform, sample_rate: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub enabled: bool,
    pub output_dir: PathBuf,
    pub session_name: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            mapping: MappingConfig::default(),
            smoothing: SmoothingConfig::default(),
            control: ControlConfig::default(),
            instruments: vec![
                InstrumentConfig {
                    key: "theremin".to_string(),
                    label: "Theremin".to_string(),
                    kind: VoiceKind::Procedural { waveform: Waveform::Sine, sample_rate: 44_100 },
                },
                InstrumentConfig {
                    key: "organ".to_string(),
                    label: "Organ".to_string(),
                    kind: VoiceKind::Procedural { waveform: Waveform::Square, sample_rate: 44_100 },
                },
                InstrumentConfig {
                    key: "strings".to_string(),
                    label: "Strings".to_string(),
                    kind: VoiceKind::Procedural { waveform: Waveform::Saw, sample_rate: 44_100 },
                },
            ],
            regions: vec![
                ScreenRegion::new("theremin", 40.0, 40.0, 200.0, 120.0),
                ScreenRegion::new("organ", 40.0, 200.0, 200.0, 120.0),
                ScreenRegion::new("strings", 40.0, 360.0, 200.0, 120.0),
            ],
            stale_after_frames: None,
            recording: RecordingConfig::default(),
            tick_hz: 60.0,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            event_name: "bodyData".to_string(),
            reconnect_initial_ms: 500,
            reconnect_max_ms: 8_000,
        }
    }
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            sensitivity: 1.5,
            sensor_width: SENSOR_DEPTH_WIDTH,
            sensor_height: SENSOR_DEPTH_HEIGHT,
            viewport_width: 1920.0,
            viewport_height: 1080.0,
            mode: MappingMode::PerJoint,
        }
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            lerp_rate: 15.0,
            pan_joint: HAND_RIGHT.to_string(),
            pan_speed: 0.05,
            pan_lerp_rate: 5.0,
            pan_max_deviation: 40.0,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            min_pitch: 220.0,
            max_pitch: 880.0,
            min_volume_db: -40.0,
            max_volume_db: 0.0,
            pitch_axis: AxisCalibration { origin: 1080.0, length: 900.0 },
            volume_axis: AxisCalibration { origin: 160.0, length: 800.0 },
            pitch_joint: HAND_RIGHT.to_string(),
            volume_joint: HAND_LEFT.to_string(),
            default_instrument: Some("theremin".to_string()),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: directories::UserDirs::new()
                .and_then(|dirs| dirs.document_dir().map(|p| p.join("KinectTheremin")))
                .unwrap_or_else(|| PathBuf::from("./output")),
            session_name: None,
        }
    }
}

impl PipelineConfig {
    /// Load a JSON config file. Missing sections fall back to defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| PipelineError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| PipelineError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.tick_hz > 0.0 && self.tick_hz <= MAX_TICK_HZ) {
            return Err(PipelineError::Config(format!(
                "tick_hz must be in (0, {}], got {}",
                MAX_TICK_HZ, self.tick_hz
            )));
        }
        if self.transport.reconnect_initial_ms == 0
            || self.transport.reconnect_max_ms < self.transport.reconnect_initial_ms
        {
            return Err(PipelineError::Config(
                "reconnect delays must be positive with max >= initial".to_string(),
            ));
        }
        if self.mapping.sensor_width <= 0.0 || self.mapping.sensor_height <= 0.0 {
            return Err(PipelineError::Config("sensor resolution must be positive".to_string()));
        }
        if self.control.pitch_axis.length <= 0.0 || self.control.volume_axis.length <= 0.0 {
            return Err(PipelineError::Config("control axis lengths must be positive".to_string()));
        }
        if self.smoothing.pan_max_deviation < 0.0 {
            return Err(PipelineError::Config("pan_max_deviation must not be negative".to_string()));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.tick_hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.transport.port, 8000);
        assert_eq!(config.mapping.sensor_width, 512.0);
        assert_eq!(config.smoothing.lerp_rate, 15.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "mapping": {"sensitivity": 2.0, "mode": {"type": "skeleton_overlay", "anchor_x": 10, "anchor_y": 20}},
            "control": {"min_pitch": 110.0},
            "stale_after_frames": 30
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.mapping.sensitivity, 2.0);
        assert_eq!(config.mapping.viewport_width, 1920.0);
        assert_eq!(
            config.mapping.mode,
            MappingMode::SkeletonOverlay { anchor_x: 10.0, anchor_y: 20.0 }
        );
        assert_eq!(config.control.min_pitch, 110.0);
        assert_eq!(config.control.max_pitch, 880.0);
        assert_eq!(config.stale_after_frames, Some(30));
        assert_eq!(config.instruments.len(), 3);
    }

    #[test]
    fn test_validate_rejects_bad_axis() {
        let mut config = PipelineConfig::default();
        config.control.volume_axis.length = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_tick_rate() {
        let mut config = PipelineConfig::default();
        config.tick_hz = 1e12;
        assert!(config.validate().is_err());
        config.tick_hz = f64::NAN;
        assert!(config.validate().is_err());
        config.tick_hz = 0.0;
        assert!(config.validate().is_err());

        config.tick_hz = MAX_TICK_HZ;
        assert!(config.validate().is_ok());
        assert!(config.tick_interval() > std::time::Duration::ZERO);
    }

    #[test]
    fn test_validate_rejects_bad_reconnect_delays() {
        let mut config = PipelineConfig::default();
        config.transport.reconnect_max_ms = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = PipelineConfig::from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, PipelineError::ConfigIo { .. }));
    }
}
