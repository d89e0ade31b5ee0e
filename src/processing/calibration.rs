use log::{debug, info};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{CalibrationConfig, CalibrationPolicy, DatasetConfig};
use crate::diagnostics::{Diagnostics, Finding};
use crate::error::{DatasetError, Result};
use crate::io::walker::{file_name, list_child_folders};

#[derive(Debug, Deserialize)]
struct RawCameraConfig {
    #[serde(rename = "Camera distance", default)]
    distance: Value,
    #[serde(rename = "Number of images", default)]
    image_count: Value,
}

/// Camera setup of one acquisition, from `CAMERA_config.json`.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraConfig {
    /// Millimetres; `None` while the distance is the unknown placeholder
    pub distance_mm: Option<f64>,
    pub image_count: Option<u32>,
}

impl CameraConfig {
    /// Name of the calibration bundle matching this setup, if the setup is
    /// complete and uses the reference number of images.
    pub fn bundle_name(&self, calibration: &CalibrationConfig) -> Option<String> {
        let distance = self.distance_mm?;
        let count = self.image_count?;
        if count != calibration.reference_image_count {
            return None;
        }
        Some(calibration_bundle_name(distance, count))
    }
}

/// `CAMERA_poses_<distance>mm_<count>`, distance truncated to whole millimetres.
pub fn calibration_bundle_name(distance_mm: f64, image_count: u32) -> String {
    format!("CAMERA_poses_{}mm_{}", distance_mm.trunc() as i64, image_count)
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn read_camera_config<P: AsRef<Path>>(
    path: P,
    calibration: &CalibrationConfig,
) -> Result<CameraConfig> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| DatasetError::io(path, e))?;
    let raw: RawCameraConfig =
        serde_json::from_str(&text).map_err(|e| DatasetError::MalformedMetadata {
            path: path.to_path_buf(),
            source: e,
        })?;

    let distance_mm = match &raw.distance {
        Value::String(s) if s.trim() == calibration.unknown_distance => None,
        other => number(other),
    };
    let image_count = number(&raw.image_count)
        .filter(|n| *n >= 0.0 && n.fract() == 0.0)
        .map(|n| n as u32);

    Ok(CameraConfig {
        distance_mm,
        image_count,
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvisionReport {
    /// Pose folders that received a calibration bundle
    pub provisioned: Vec<PathBuf>,
    pub copied: Vec<PathBuf>,
    /// Existing pose files left alone under `SkipExisting`
    pub kept: Vec<PathBuf>,
    /// Acquisitions not provisioned, with the reason
    pub skipped: Vec<(PathBuf, String)>,
}

/// Copies the pre-computed camera poses into every acquisition below
/// `acquisition_folder` whose camera configuration has a known distance and
/// the reference image count.
///
/// Acquisitions are `acquisition_folder` itself and its immediate
/// subfolders holding a camera configuration file. Bundles are read from
/// `<calibration_root>/CAMERA_poses_<distance>mm_<count>` and copied, never
/// moved, into `<acquisition>/CAMERA_poses`. A failed copy is recorded and
/// the remaining acquisitions are still provisioned.
pub fn provision_calibration<P: AsRef<Path>, Q: AsRef<Path>>(
    acquisition_folder: P,
    calibration_root: Q,
    config: &DatasetConfig,
    diag: &mut Diagnostics,
) -> Result<ProvisionReport> {
    let root = acquisition_folder.as_ref();
    let calibration_root = calibration_root.as_ref();
    if !root.is_dir() {
        return Err(DatasetError::NotFound(root.to_path_buf()));
    }

    let mut candidates = vec![root.to_path_buf()];
    let mut children = list_child_folders(root, 1);
    children.sort();
    candidates.extend(children.into_iter().filter(|c| c != calibration_root));

    let mut report = ProvisionReport::default();
    for acquisition in candidates {
        let config_path = acquisition.join(&config.layout.camera_config_file);
        if !config_path.is_file() {
            continue;
        }
        let camera = match read_camera_config(&config_path, &config.calibration) {
            Ok(camera) => camera,
            Err(e) => {
                diag.record(Finding::MalformedDocument {
                    path: config_path,
                    message: e.to_string(),
                });
                report.skipped.push((acquisition, e.to_string()));
                continue;
            }
        };
        debug!("{}: {:?}", acquisition.display(), camera);

        let Some(bundle_name) = camera.bundle_name(&config.calibration) else {
            let reason = format!(
                "camera distance {:?}, {:?} images (reference {})",
                camera.distance_mm, camera.image_count, config.calibration.reference_image_count
            );
            debug!("not provisioning {}: {}", acquisition.display(), reason);
            report.skipped.push((acquisition, reason));
            continue;
        };

        let bundle = calibration_root.join(&bundle_name);
        if !bundle.is_dir() {
            diag.record(Finding::MissingFolder {
                context: "calibration bundle".to_string(),
                path: bundle.clone(),
            });
            report
                .skipped
                .push((acquisition, format!("bundle {} absent", bundle_name)));
            continue;
        }

        let destination = acquisition.join(&config.layout.poses_folder);
        match copy_bundle(&bundle, &destination, config.calibration.policy, &mut report) {
            Ok(()) => report.provisioned.push(destination),
            Err(e) => {
                diag.record(Finding::SkippedFile {
                    path: destination,
                    reason: e.to_string(),
                });
                report.skipped.push((acquisition, e.to_string()));
            }
        }
    }

    info!(
        "Calibration files loaded: {} folders, {} files copied",
        report.provisioned.len(),
        report.copied.len()
    );
    Ok(report)
}

fn copy_bundle(
    bundle: &Path,
    destination: &Path,
    policy: CalibrationPolicy,
    report: &mut ProvisionReport,
) -> Result<()> {
    fs::create_dir_all(destination).map_err(|e| DatasetError::io(destination, e))?;

    let mut files: Vec<PathBuf> = fs::read_dir(bundle)
        .map_err(|e| DatasetError::io(bundle, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    for source in files {
        let target = destination.join(file_name(&source));
        if policy == CalibrationPolicy::SkipExisting && target.exists() {
            report.kept.push(target);
            continue;
        }
        fs::copy(&source, &target).map_err(|e| DatasetError::io(&target, e))?;
        report.copied.push(target);
    }
    Ok(())
}
