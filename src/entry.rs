use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use std::path::Path;

use crate::config::DatasetConfig;
use crate::dataset::integrity_check::{check_dataset, DatasetIntegrity};
use crate::dataset::{Dataset, DatasetLoader, Platform};
use crate::diagnostics::{init_logging, Diagnostics, Finding};
use crate::processing::calibration::{provision_calibration, ProvisionReport};
use crate::processing::segmentation::{segment_acquisition, BackgroundRemover, SegmentationReport};
use crate::processing::transform::{transform_acquisition, TransformReport};

#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub dataset: Dataset,
    pub integrity: DatasetIntegrity,
    pub findings: Vec<Finding>,
}

/// Loads one sample and validates every loaded platform.
///
/// Integrity failures are logged and returned, never raised.
pub fn run_load_and_check<P: AsRef<Path>>(
    data_path: P,
    sample_id: &str,
    platforms: &[Platform],
    config: &DatasetConfig,
) -> Result<LoadOutcome> {
    init_logging(config.verbose);
    let data_path = data_path.as_ref();
    let mut diag = Diagnostics::new();

    let dataset = DatasetLoader::new(config)
        .load(data_path, sample_id, platforms, &mut diag)
        .with_context(|| format!("loading sample {} from {}", sample_id, data_path.display()))?;

    let integrity = check_dataset(&dataset, &mut diag);
    if integrity.is_valid() {
        info!("Sample {} passed all integrity checks", sample_id);
    } else {
        warn!("Attention! Sample {} failed integrity checks", sample_id);
    }
    debug!("{} findings", diag.findings().len());

    Ok(LoadOutcome {
        dataset,
        integrity,
        findings: diag.into_findings(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreparationStep {
    RemoveBackground,
    /// Provision calibration poses, then transform point clouds
    Transform { invert: bool },
}

impl PreparationStep {
    /// Comma-separated steps: `remove`, `transform`, `inverse`.
    /// Unknown tokens are ignored.
    pub fn parse_list(list: &str) -> Vec<Self> {
        list.split(',')
            .map(|t| t.trim().to_ascii_lowercase())
            .filter_map(|t| {
                if t.contains("remove") {
                    Some(PreparationStep::RemoveBackground)
                } else if t.contains("inverse") || t.contains("restore") {
                    Some(PreparationStep::Transform { invert: true })
                } else if t.contains("transform") {
                    Some(PreparationStep::Transform { invert: false })
                } else {
                    if !t.is_empty() {
                        debug!("ignoring unknown preparation step '{}'", t);
                    }
                    None
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PreparationOutcome {
    pub segmentation: Option<SegmentationReport>,
    pub calibration: Option<ProvisionReport>,
    pub transform: Option<TransformReport>,
    pub findings: Vec<Finding>,
}

/// Runs `steps` in order on `<data_path>/<sample_id>`. Calibration bundles
/// are taken from `<data_path>/<calibration_folder>`.
pub fn run_preparation<P: AsRef<Path>>(
    data_path: P,
    sample_id: &str,
    steps: &[PreparationStep],
    remover: Option<&dyn BackgroundRemover>,
    config: &DatasetConfig,
) -> Result<PreparationOutcome> {
    init_logging(config.verbose);
    let data_path = data_path.as_ref();
    let acquisition = data_path.join(sample_id);
    let calibration_root = data_path.join(&config.layout.calibration_folder);

    let mut diag = Diagnostics::new();
    let mut outcome = PreparationOutcome::default();

    for step in steps {
        match *step {
            PreparationStep::RemoveBackground => {
                let remover =
                    remover.ok_or_else(|| anyhow!("background removal requested without a remover"))?;
                let report = segment_acquisition(&acquisition, remover, config, &mut diag)
                    .with_context(|| format!("segmenting {}", acquisition.display()))?;
                outcome.segmentation = Some(report);
            }
            PreparationStep::Transform { invert } => {
                let provisioned =
                    provision_calibration(&acquisition, &calibration_root, config, &mut diag)
                        .with_context(|| {
                            format!("provisioning calibration for {}", acquisition.display())
                        })?;
                outcome.calibration = Some(provisioned);

                let report = transform_acquisition(&acquisition, invert, config, &mut diag)
                    .with_context(|| format!("transforming {}", acquisition.display()))?;
                outcome.transform = Some(report);
            }
        }
    }

    debug!("Execution completed");
    outcome.findings = diag.into_findings();
    Ok(outcome)
}

#[cfg(test)]
mod entry_tests {
    use super::*;
    use crate::error::Result as DatasetResult;
    use crate::io::pointcloud::{PlyEncoding, PointCloud};
    use crate::processing::segmentation::SegmentationParams;
    use crate::utils::test_utils::{
        build_sample_tree, hemisphere_path, scanner_path, write_camera_config, write_pose,
        SampleLayout,
    };
    use image::RgbaImage;
    use nalgebra::{Matrix4, Point3, Vector3};
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    struct OpaqueRemover;

    impl BackgroundRemover for OpaqueRemover {
        fn remove(&self, image: &[u8], _params: &SegmentationParams) -> DatasetResult<RgbaImage> {
            Ok(image::load_from_memory(image)?.to_rgba8())
        }
    }

    #[test]
    fn test_parse_steps() {
        assert_eq!(
            PreparationStep::parse_list("remove, transform"),
            vec![
                PreparationStep::RemoveBackground,
                PreparationStep::Transform { invert: false }
            ]
        );
        assert_eq!(
            PreparationStep::parse_list("transform-inverse,plot"),
            vec![PreparationStep::Transform { invert: true }]
        );
    }

    #[test]
    fn test_load_and_check_valid_sample() {
        let dir = TempDir::new().unwrap();
        let layout = SampleLayout::default();
        build_sample_tree(dir.path(), &layout);

        let outcome = run_load_and_check(
            dir.path(),
            &layout.sample_id,
            &[Platform::Scanner, Platform::Ultrasound],
            &DatasetConfig::default(),
        )
        .unwrap();

        assert!(outcome.integrity.is_valid());
        assert_eq!(outcome.integrity.top.unwrap().valid_count, 3);
        assert_eq!(outcome.integrity.ultrasound.unwrap().valid_count, 3);
        assert!(outcome.findings.is_empty());
    }

    #[test]
    fn test_load_and_check_missing_sample() {
        let dir = TempDir::new().unwrap();
        let err = run_load_and_check(dir.path(), "1", &[Platform::Scanner], &DatasetConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("loading sample 1"));
    }

    #[test]
    fn test_remove_background_requires_remover() {
        let dir = TempDir::new().unwrap();
        build_sample_tree(dir.path(), &SampleLayout::default());
        assert!(run_preparation(
            dir.path(),
            "290",
            &[PreparationStep::RemoveBackground],
            None,
            &DatasetConfig::default(),
        )
        .is_err());
    }

    #[test]
    fn test_full_preparation() {
        let dir = TempDir::new().unwrap();
        let layout = SampleLayout {
            with_segmented: false,
            with_poses: false,
            with_ultrasound: false,
            ..Default::default()
        };
        build_sample_tree(dir.path(), &layout);

        write_camera_config(&scanner_path(dir.path(), &layout), json!(130), 100);
        let bundle = dir.path().join("CalibrationFiles/CAMERA_poses_130mm_100");
        for i in 1..=3 {
            write_pose(
                &bundle.join(format!("Transformation_matrix_{}.json", i)),
                &Matrix4::new_translation(&Vector3::new(0.0, 0.0, 10.0 * i as f64)),
            );
        }
        let clouds = hemisphere_path(dir.path(), &layout, "top").join("PointClouds");
        fs::create_dir_all(&clouds).unwrap();
        PointCloud::from_points(&[Point3::origin()], PlyEncoding::BinaryLittleEndian)
            .write(clouds.join("PointCloud_2.ply"))
            .unwrap();

        let outcome = run_preparation(
            dir.path(),
            &layout.sample_id,
            &PreparationStep::parse_list("remove,transform"),
            Some(&OpaqueRemover),
            &DatasetConfig::default(),
        )
        .unwrap();

        assert_eq!(outcome.segmentation.unwrap().color.len(), 6);
        assert_eq!(outcome.calibration.unwrap().copied.len(), 3);
        assert_eq!(outcome.transform.unwrap().transformed.len(), 1);
        let moved = PointCloud::read(clouds.join("PointCloud_2.ply")).unwrap().points();
        assert_eq!(moved[0], Point3::new(0.0, 0.0, 20.0));

        // segmented folders now complete the scanner dataset
        let loaded = run_load_and_check(
            dir.path(),
            &layout.sample_id,
            &[Platform::Scanner],
            &DatasetConfig::default(),
        )
        .unwrap();
        assert!(loaded.integrity.is_valid());
    }
}
