use serde::Deserialize;
use std::path::Path;

use crate::error::{DatasetError, Result};

/// Runtime configuration for discovery, calibration and preparation.
///
/// Every field has a default matching the acquisition protocol, so an
/// empty TOML document is a valid configuration:
///
/// .. code-block:: toml
///
///    [layout]
///    scanner_folder = "ScannerPlatform"
///
///    [calibration]
///    reference_image_count = 100
///    policy = "skip-existing"
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatasetConfig {
    pub layout: LayoutConfig,
    pub extensions: ExtensionConfig,
    pub calibration: CalibrationConfig,
    pub segmentation: SegmentationConfig,
    pub ultrasound: UltrasoundConfig,
    pub verbose: bool,
}

impl DatasetConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| DatasetError::io(path, e))?;
        Self::from_toml_str(&text)
    }
}

/// Folder and file name tokens of the on-disk convention.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LayoutConfig {
    pub scanner_folder: String,
    pub ultrasound_folder: String,
    pub signals_folder: String,
    pub ultrasound_images_folder: String,
    pub poses_folder: String,
    pub point_cloud_folder: String,
    pub camera_config_file: String,
    pub calibration_folder: String,
    pub pose_file_token: String,
    pub signal_file_token: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            scanner_folder: "ScannerPlatform".to_string(),
            ultrasound_folder: "UltrasoundPlatform".to_string(),
            signals_folder: "US_signals".to_string(),
            ultrasound_images_folder: "IMG_pictures".to_string(),
            poses_folder: "CAMERA_poses".to_string(),
            point_cloud_folder: "PointClouds".to_string(),
            camera_config_file: "CAMERA_config.json".to_string(),
            calibration_folder: "CalibrationFiles".to_string(),
            pose_file_token: "Transformation_matrix".to_string(),
            signal_file_token: "_Ascan".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtensionConfig {
    pub scanner_image: String,
    pub ultrasound_image: String,
    pub signal: String,
    pub pose: String,
    pub point_cloud: String,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            scanner_image: "png".to_string(),
            ultrasound_image: "jpg".to_string(),
            signal: "csv".to_string(),
            pose: "json".to_string(),
            point_cloud: "ply".to_string(),
        }
    }
}

/// What to do when a pose file already exists in the destination folder.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CalibrationPolicy {
    #[default]
    Overwrite,
    SkipExisting,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Only acquisitions with exactly this many images have a calibration bundle.
    pub reference_image_count: u32,
    /// Placeholder written into camera configs when the distance was not recorded.
    pub unknown_distance: String,
    pub policy: CalibrationPolicy,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            reference_image_count: 100,
            unknown_distance: "?".to_string(),
            policy: CalibrationPolicy::Overwrite,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SegmentationConfig {
    pub model: String,
    pub foreground_threshold: u8,
    pub background_threshold: u8,
    pub erode_size: u32,
    pub background_color: [u8; 3],
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            model: "u2net".to_string(),
            foreground_threshold: 230,
            background_threshold: 40,
            erode_size: 10,
            background_color: [255, 255, 255],
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct UltrasoundConfig {
    /// Digitiser sampling frequency in Hz
    pub sampling_frequency: f64,
    /// ADC mid-scale offset removed before scaling
    pub offset: f64,
    /// Pulse voltage in V
    pub voltage: f64,
    pub gain_factor: f64,
}

impl Default for UltrasoundConfig {
    fn default() -> Self {
        Self {
            sampling_frequency: 80_000_000.0,
            offset: 2048.0,
            voltage: 40.0,
            gain_factor: 20.0,
        }
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = DatasetConfig::from_toml_str("").unwrap();
        assert_eq!(config, DatasetConfig::default());
        assert_eq!(config.layout.poses_folder, "CAMERA_poses");
        assert_eq!(config.calibration.reference_image_count, 100);
        assert_eq!(config.calibration.policy, CalibrationPolicy::Overwrite);
    }

    #[test]
    fn test_partial_override() {
        let text = r#"
            verbose = true

            [layout]
            scanner_folder = "Scanner"

            [calibration]
            reference_image_count = 80
            policy = "skip-existing"
        "#;
        let config = DatasetConfig::from_toml_str(text).unwrap();
        assert!(config.verbose);
        assert_eq!(config.layout.scanner_folder, "Scanner");
        // untouched fields keep their defaults
        assert_eq!(config.layout.ultrasound_folder, "UltrasoundPlatform");
        assert_eq!(config.calibration.reference_image_count, 80);
        assert_eq!(config.calibration.policy, CalibrationPolicy::SkipExisting);
        assert_eq!(config.calibration.unknown_distance, "?");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = DatasetConfig::from_toml_str("[calibration]\npolicy = 3").unwrap_err();
        assert!(matches!(err, DatasetError::Config(_)));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = DatasetConfig::from_toml_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, DatasetError::NotFound(_)));
    }
}
