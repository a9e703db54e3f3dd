//! JSON configuration of a ranging node.

use crate::calibration::{CalibrationPolicy, CameraInfo};
use marker_ranger_aruco::{DetectorParams, DictionaryError, DictionarySet, SearchStrategy};
use marker_ranger_pose::PoseRefineParams;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Channel carrying annotated frames.
pub const OUTPUT_CHANNEL: &str = "aruco_video/compressed";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Dictionary(#[from] DictionaryError),
    #[error("{field} must be positive and finite, got {value}")]
    NotPositive { field: &'static str, value: f64 },
}

fn default_camera_name() -> String {
    "csi_cam_0".to_string()
}

fn default_dictionaries() -> Vec<String> {
    vec!["DICT_4X4_50".to_string()]
}

/// Node configuration. Every field has a default, so `{}` is valid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangerConfig {
    /// Camera whose channels are consumed.
    #[serde(default = "default_camera_name")]
    pub camera_name: String,
    /// Physical side of the black marker square, in metres.
    pub marker_size_m: f64,
    /// Dictionary names in search order.
    #[serde(default = "default_dictionaries")]
    pub dictionaries: Vec<String>,
    pub search: SearchStrategy,
    /// Drop ids already reported by an earlier dictionary; repeats within one
    /// dictionary are kept. Only has an effect in union mode.
    pub dedup_by_id: bool,
    pub calibration_policy: CalibrationPolicy,
    /// Frames with markers between two "waiting for calibration" notices.
    pub waiting_notice_every: u32,
    pub jpeg_quality: u8,
    /// Drawn axis length in metres; defaults to the marker size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub axis_length_m: Option<f64>,
    pub detector: DetectorParams,
    pub pose: PoseRefineParams,
    /// Calibration offered once at startup, before any camera-info message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_calibration: Option<CameraInfo>,
}

impl Default for RangerConfig {
    fn default() -> Self {
        Self {
            camera_name: default_camera_name(),
            marker_size_m: 0.038,
            dictionaries: default_dictionaries(),
            search: SearchStrategy::default(),
            dedup_by_id: false,
            calibration_policy: CalibrationPolicy::default(),
            waiting_notice_every: 30,
            jpeg_quality: 90,
            axis_length_m: None,
            detector: DetectorParams::default(),
            pose: PoseRefineParams::default(),
            static_calibration: None,
        }
    }
}

impl RangerConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.marker_size_m.is_finite() && self.marker_size_m > 0.0) {
            return Err(ConfigError::NotPositive {
                field: "marker_size_m",
                value: self.marker_size_m,
            });
        }
        if let Some(len) = self.axis_length_m {
            if !(len.is_finite() && len > 0.0) {
                return Err(ConfigError::NotPositive {
                    field: "axis_length_m",
                    value: len,
                });
            }
        }
        self.dictionary_set()?;
        Ok(())
    }

    pub fn dictionary_set(&self) -> Result<DictionarySet, DictionaryError> {
        DictionarySet::from_names(&self.dictionaries)
    }

    pub fn axis_length(&self) -> f64 {
        self.axis_length_m.unwrap_or(self.marker_size_m)
    }

    /// Compressed frames in.
    pub fn image_channel(&self) -> String {
        format!("{}/image_raw/compressed", self.camera_name)
    }

    /// Camera-info messages in.
    pub fn camera_info_channel(&self) -> String {
        format!("{}/camera_info", self.camera_name)
    }

    /// Annotated frames out.
    pub fn output_channel(&self) -> &'static str {
        OUTPUT_CHANNEL
    }
}
