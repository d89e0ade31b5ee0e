use log::{info, warn};
use std::collections::BTreeSet;

use super::scanner::{Hemisphere, HemisphereScan};
use super::ultrasound::{signal_lengths_consistent, UltrasoundDataset};
use super::Dataset;
use crate::diagnostics::{Diagnostics, Finding};

/// Outcome of one platform's validation.
///
/// `identity_ok` is only evaluated when `counts_ok` holds; both false means
/// `valid_count` is 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub counts_ok: bool,
    pub identity_ok: bool,
    pub valid_count: usize,
}

impl IntegrityReport {
    pub fn is_valid(&self) -> bool {
        self.counts_ok && self.identity_ok
    }
}

/// Signals, label rows and images agree in number; returns the number of
/// distinct point ids in the label table. Label rows are counted as stored,
/// including rows the loader could not use.
pub fn check_ultrasound_counts(data: &UltrasoundDataset) -> Option<usize> {
    let n = data.signals.len();
    if n != data.label_row_count() || n != data.images.len() {
        return None;
    }
    let distinct: BTreeSet<&str> = data.metadata.iter().map(|m| m.file_id.as_str()).collect();
    Some(distinct.len())
}

pub fn check_ultrasound_identity(data: &UltrasoundDataset) -> bool {
    let checks: &[(&str, fn(&UltrasoundDataset) -> bool)] = &[
        ("check_label_ids_match_signals", check_label_ids_match_signals),
        ("check_images_reference_points", check_images_reference_points),
    ];

    for (name, f) in checks {
        if !f(data) {
            warn!("Integrity check '{}' failed", name);
            return false;
        }
    }
    true
}

/// Sorted label ids equal sorted signal ids
fn check_label_ids_match_signals(data: &UltrasoundDataset) -> bool {
    let labels: BTreeSet<&str> = data.metadata.iter().map(|m| m.file_id.as_str()).collect();
    let signals: BTreeSet<&str> = data.signals.iter().map(|s| s.file_id.as_str()).collect();
    labels == signals && signals.len() == data.signals.len()
}

/// The i-th image file name contains the i-th label id
fn check_images_reference_points(data: &UltrasoundDataset) -> bool {
    data.images
        .iter()
        .zip(&data.metadata)
        .all(|(image, row)| image.file_name().contains(&row.file_id))
}

pub fn check_ultrasound_integrity(data: &UltrasoundDataset) -> IntegrityReport {
    match check_ultrasound_counts(data) {
        Some(valid_count) => IntegrityReport {
            counts_ok: true,
            identity_ok: check_ultrasound_identity(data),
            valid_count,
        },
        None => IntegrityReport::default(),
    }
}

/// The four image sequences have equal length; returns it.
pub fn check_scanner_counts(scan: &HemisphereScan) -> Option<usize> {
    let n = scan.color.original.len();
    let lengths = [
        scan.color.segmented.len(),
        scan.depth.original.len(),
        scan.depth.segmented.len(),
    ];
    lengths.iter().all(|&l| l == n).then_some(n)
}

pub fn check_scanner_integrity(scan: &HemisphereScan) -> IntegrityReport {
    match check_scanner_counts(scan) {
        Some(valid_count) => IntegrityReport {
            counts_ok: true,
            identity_ok: valid_count == scan.poses.len(),
            valid_count,
        },
        None => IntegrityReport::default(),
    }
}

/// Validation of every loaded platform of a sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetIntegrity {
    pub ultrasound: Option<IntegrityReport>,
    pub signal_lengths_consistent: Option<bool>,
    pub top: Option<IntegrityReport>,
    pub bottom: Option<IntegrityReport>,
}

impl DatasetIntegrity {
    pub fn scanner(&self, hemisphere: Hemisphere) -> Option<IntegrityReport> {
        match hemisphere {
            Hemisphere::Top => self.top,
            Hemisphere::Bottom => self.bottom,
        }
    }

    pub fn is_valid(&self) -> bool {
        [self.ultrasound, self.top, self.bottom]
            .iter()
            .flatten()
            .all(|r| r.is_valid())
            && self.signal_lengths_consistent != Some(false)
    }
}

/// Runs every check on the loaded platforms.
///
/// Never fails: results are logged, failed checks recorded in `diag`,
/// and the caller decides whether to proceed.
pub fn check_dataset(dataset: &Dataset, diag: &mut Diagnostics) -> DatasetIntegrity {
    let mut integrity = DatasetIntegrity::default();

    if let Some(scanner) = &dataset.scanner {
        for hemisphere in Hemisphere::ALL {
            let report = check_scanner_integrity(scanner.get(hemisphere));
            let context = format!("scanner/{}", hemisphere.token());
            if report.counts_ok {
                info!("Scanner ({}) available data points: {}", hemisphere.token(), report.valid_count);
            } else {
                record(diag, &context, "counts");
            }
            if report.identity_ok {
                info!("All scanner ({}) data points and camera poses are valid", hemisphere.token());
            } else if report.counts_ok {
                record(diag, &context, "poses");
            }
            match hemisphere {
                Hemisphere::Top => integrity.top = Some(report),
                Hemisphere::Bottom => integrity.bottom = Some(report),
            }
        }
    }

    if let Some(us) = &dataset.ultrasound {
        let report = check_ultrasound_integrity(us);
        if report.counts_ok {
            info!("Ultrasound available data points: {}", report.valid_count);
        } else {
            record(diag, "ultrasound", "counts");
        }
        if report.identity_ok {
            info!("All ultrasound data points and labels are valid");
        } else if report.counts_ok {
            record(diag, "ultrasound", "identity");
        }
        let consistent = signal_lengths_consistent(us);
        if !consistent {
            record(diag, "ultrasound", "signal lengths");
        }
        integrity.ultrasound = Some(report);
        integrity.signal_lengths_consistent = Some(consistent);
    }

    integrity
}

fn record(diag: &mut Diagnostics, context: &str, check: &str) {
    diag.record(Finding::IntegrityCheckFailed {
        context: context.to_string(),
        check: check.to_string(),
    });
}

#[cfg(test)]
mod integrity_tests {
    use super::*;
    use crate::dataset::scanner::PoseRecord;
    use crate::dataset::ultrasound::{PointMetadata, SignalRecord};
    use crate::dataset::ImageRecord;
    use nalgebra::Matrix4;
    use std::path::PathBuf;

    fn ultrasound(signals: u32, labels: u32, images: u32) -> UltrasoundDataset {
        let file_id = |n: u32| format!("S_{}", n);
        UltrasoundDataset {
            signals: (1..=signals)
                .map(|n| SignalRecord {
                    id: n,
                    file_id: file_id(n),
                    path: PathBuf::from(format!("{}_Ascan.csv", file_id(n))),
                    samples: vec![2048.0; 16],
                })
                .collect(),
            metadata: (1..=labels)
                .map(|n| PointMetadata {
                    id: n,
                    file_id: file_id(n),
                    label: "tumor".into(),
                    gain: Some(30.0),
                    height: None,
                    filter_mhz: Some(10.0),
                })
                .collect(),
            images: (1..=images)
                .map(|n| ImageRecord::new(n, format!("IMG_pictures/{}.jpg", file_id(n))))
                .collect(),
            ..Default::default()
        }
    }

    fn records(n: u32, prefix: &str) -> Vec<ImageRecord> {
        (1..=n)
            .map(|i| ImageRecord::new(i, format!("{}_{}.png", prefix, i)))
            .collect()
    }

    fn hemisphere(color_original: u32, depth_segmented: u32, poses: u32) -> HemisphereScan {
        let mut scan = HemisphereScan::new(Hemisphere::Top);
        scan.color.original = records(color_original, "IMG_color_original");
        scan.color.segmented = records(color_original, "IMG_color_segmented");
        scan.depth.original = records(color_original, "IMG_depth_original");
        scan.depth.segmented = records(depth_segmented, "IMG_depth_segmented");
        scan.poses = (1..=poses)
            .map(|id| PoseRecord {
                id,
                path: PathBuf::from(format!("Transformation_matrix_{}.json", id)),
                matrix: Matrix4::identity(),
            })
            .collect();
        scan
    }

    #[test]
    fn test_ultrasound_all_consistent() {
        let report = check_ultrasound_integrity(&ultrasound(5, 5, 5));
        assert_eq!(
            report,
            IntegrityReport {
                counts_ok: true,
                identity_ok: true,
                valid_count: 5,
            }
        );
    }

    #[test]
    fn test_ultrasound_missing_image() {
        let report = check_ultrasound_integrity(&ultrasound(5, 5, 4));
        assert!(!report.counts_ok);
        assert!(!report.identity_ok);
        assert_eq!(report.valid_count, 0);
    }

    #[test]
    fn test_ultrasound_mismatched_ids() {
        let mut data = ultrasound(5, 5, 5);
        data.metadata[4].file_id = "S_9".into();
        let report = check_ultrasound_integrity(&data);
        assert!(report.counts_ok);
        assert!(!report.identity_ok);
        assert_eq!(report.valid_count, 5);
    }

    #[test]
    fn test_ultrasound_dropped_label_rows_break_counts() {
        let mut data = ultrasound(3, 3, 3);
        data.dropped_labels.push("T_3".into());
        assert_eq!(data.label_row_count(), 4);

        let report = check_ultrasound_integrity(&data);
        assert!(!report.counts_ok);
        assert!(!report.identity_ok);
        assert_eq!(report.valid_count, 0);
    }

    #[test]
    fn test_ultrasound_image_not_referencing_point() {
        let mut data = ultrasound(3, 3, 3);
        data.images.swap(0, 2);
        assert!(!check_ultrasound_identity(&data));
    }

    #[test]
    fn test_scanner_counts_mismatch() {
        let report = check_scanner_integrity(&hemisphere(10, 9, 10));
        assert!(!report.counts_ok);
        assert!(!report.identity_ok);
        assert_eq!(report.valid_count, 0);
    }

    #[test]
    fn test_scanner_poses_mismatch() {
        let report = check_scanner_integrity(&hemisphere(10, 10, 8));
        assert!(report.counts_ok);
        assert!(!report.identity_ok);
        assert_eq!(report.valid_count, 10);

        assert!(check_scanner_integrity(&hemisphere(10, 10, 10)).is_valid());
    }

    #[test]
    fn test_check_dataset_records_failures() {
        let mut scanner = crate::dataset::ScannerDataset::empty();
        scanner.top = hemisphere(4, 4, 4);
        let mut bottom = hemisphere(4, 3, 4);
        bottom.hemisphere = Hemisphere::Bottom;
        scanner.bottom = bottom;

        let mut us = ultrasound(3, 3, 3);
        us.signals[1].samples.truncate(4);

        let dataset = Dataset {
            sample_id: "S".into(),
            path: PathBuf::from("S"),
            ultrasound: Some(us),
            scanner: Some(scanner),
        };
        let mut diag = Diagnostics::new();
        let integrity = check_dataset(&dataset, &mut diag);

        assert!(integrity.scanner(Hemisphere::Top).unwrap().is_valid());
        assert!(!integrity.bottom.unwrap().counts_ok);
        assert_eq!(integrity.signal_lengths_consistent, Some(false));
        assert!(!integrity.is_valid());
        assert_eq!(diag.findings().len(), 2);
    }
}
