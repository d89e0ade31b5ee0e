use log::debug;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{index_folder, require_folder, ImageRecord};
use crate::config::{DatasetConfig, UltrasoundConfig};
use crate::diagnostics::{Diagnostics, Finding};
use crate::error::DatasetError;
use crate::io::metadata::{
    read_metadata, MetadataDocument, MetadataKind, PointLabel, UltrasoundMetadata,
    METADATA_SUFFIX,
};
use crate::io::naming::extract_last_id;
use crate::io::signals::{read_signal, signal_file_id};
use crate::io::walker::find_child_folder;

/// One A-scan acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalRecord {
    /// Point number, the last digit run of `file_id`
    pub id: u32,
    pub file_id: String,
    pub path: PathBuf,
    pub samples: Vec<f64>,
}

/// A row of the "Data labels" table.
#[derive(Debug, Clone, PartialEq)]
pub struct PointMetadata {
    pub id: u32,
    pub file_id: String,
    pub label: String,
    pub gain: Option<f64>,
    pub height: Option<f64>,
    pub filter_mhz: Option<f64>,
}

/// Signal, picture and label of one measurement point, any of which may be absent.
#[derive(Debug, Clone, Copy)]
pub struct UltrasoundPoint<'a> {
    pub file_id: &'a str,
    pub signal: Option<&'a SignalRecord>,
    pub image: Option<&'a ImageRecord>,
    pub metadata: Option<&'a PointMetadata>,
}

/// Ultrasound platform of one sample. Every collection is ordered by point number.
#[derive(Debug, Clone, Default)]
pub struct UltrasoundDataset {
    pub folder: Option<PathBuf>,
    pub signals: Vec<SignalRecord>,
    pub images: Vec<ImageRecord>,
    pub metadata: Vec<PointMetadata>,
    /// Label rows present in the document but left out of `metadata`
    /// (duplicate point number, no point number, unreadable row)
    pub dropped_labels: Vec<String>,
    pub document: Option<UltrasoundMetadata>,
}

impl UltrasoundDataset {
    /// Rows of the label table as stored on disk.
    pub fn label_row_count(&self) -> usize {
        self.metadata.len() + self.dropped_labels.len()
    }

    pub fn file_ids(&self) -> Vec<&str> {
        self.signals.iter().map(|s| s.file_id.as_str()).collect()
    }

    pub fn signal(&self, file_id: &str) -> Option<&SignalRecord> {
        self.signals.iter().find(|s| s.file_id == file_id)
    }

    /// Image whose file stem equals `file_id`.
    pub fn image(&self, file_id: &str) -> Option<&ImageRecord> {
        self.images.iter().find(|i| image_file_id(&i.path) == file_id)
    }

    pub fn point_metadata(&self, file_id: &str) -> Option<&PointMetadata> {
        self.metadata.iter().find(|m| m.file_id == file_id)
    }

    pub fn point<'a>(&'a self, file_id: &'a str) -> UltrasoundPoint<'a> {
        UltrasoundPoint {
            file_id,
            signal: self.signal(file_id),
            image: self.image(file_id),
            metadata: self.point_metadata(file_id),
        }
    }

    /// Offset-removed, gain-compensated signal of one point.
    ///
    /// `None` when the point has no signal or no metadata row. A blank
    /// gain counts as 0 dB.
    pub fn normalized_signal(&self, file_id: &str, settings: &UltrasoundConfig) -> Option<Vec<f64>> {
        let signal = self.signal(file_id)?;
        let gain = self.point_metadata(file_id)?.gain.unwrap_or(0.0);
        Some(normalize(&signal.samples, gain, settings))
    }
}

/// `(x - offset) / (V * 10^(gain / factor))`
pub fn normalize(samples: &[f64], gain: f64, settings: &UltrasoundConfig) -> Vec<f64> {
    let scale = settings.voltage * 10f64.powf(gain / settings.gain_factor);
    samples.iter().map(|x| (x - settings.offset) / scale).collect()
}

/// `n` evenly spaced instants from 0 to `n / fs` inclusive.
pub fn time_axis(n: usize, sampling_frequency: f64) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => {
            let end = n as f64 / sampling_frequency;
            let step = end / (n - 1) as f64;
            (0..n).map(|i| i as f64 * step).collect()
        }
    }
}

fn image_file_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub(crate) fn load_ultrasound(
    sample_path: &Path,
    config: &DatasetConfig,
    diag: &mut Diagnostics,
) -> UltrasoundDataset {
    let layout = &config.layout;
    let expected = sample_path.join(&layout.ultrasound_folder);
    let Some(folder) = require_folder(
        find_child_folder(sample_path, &layout.ultrasound_folder),
        &expected,
        "ultrasound",
        diag,
    ) else {
        return UltrasoundDataset::default();
    };

    let token = layout.signal_file_token.as_str();
    let signals_dir = folder.join(&layout.signals_folder);
    let signal_files = index_folder(
        Some(&signals_dir),
        "ultrasound/signals",
        &config.extensions.signal,
        |_| true,
        |p| {
            let file_id = signal_file_id(p, token)
                .ok_or_else(|| DatasetError::NoIdentifierFound(p.display().to_string()))?;
            extract_last_id(&file_id)
        },
        diag,
    );

    debug!("loading signals");
    let mut signals = Vec::with_capacity(signal_files.len());
    for (&id, path) in &signal_files.by_id {
        let file_id = signal_file_id(path, token).unwrap_or_default();
        match read_signal(path) {
            Ok(samples) => signals.push(SignalRecord {
                id,
                file_id,
                path: path.clone(),
                samples,
            }),
            Err(e) => diag.record(Finding::SkippedFile {
                path: path.clone(),
                reason: e.to_string(),
            }),
        }
    }

    debug!("loading images");
    let image_files = index_folder(
        Some(&folder.join(&layout.ultrasound_images_folder)),
        "ultrasound/images",
        &config.extensions.ultrasound_image,
        |_| true,
        |p| extract_last_id(&image_file_id(p)),
        diag,
    );
    let images = image_files
        .by_id
        .iter()
        .map(|(&id, path)| ImageRecord::new(id, path.clone()))
        .collect();

    let labels = load_labels(&folder, diag);

    UltrasoundDataset {
        folder: Some(folder),
        signals,
        images,
        metadata: labels.rows,
        dropped_labels: labels.dropped,
        document: labels.document,
    }
}

#[derive(Debug, Default)]
struct LabelTable {
    document: Option<UltrasoundMetadata>,
    rows: Vec<PointMetadata>,
    dropped: Vec<String>,
}

/// Reads the "Data labels" table of the ultrasound metadata file.
///
/// The table is read on its own, row by row: a malformed device field or
/// a single bad row never discards the other labels.
fn load_labels(folder: &Path, diag: &mut Diagnostics) -> LabelTable {
    let (raw, file_id) = match read_metadata(folder) {
        Ok(found) => found,
        Err(DatasetError::NotFound(path)) => {
            diag.record(Finding::MissingFolder {
                context: "ultrasound metadata".to_string(),
                path,
            });
            return LabelTable::default();
        }
        Err(DatasetError::MalformedMetadata { path, source }) => {
            diag.record(Finding::MalformedDocument {
                path,
                message: source.to_string(),
            });
            return LabelTable::default();
        }
        Err(e) => {
            diag.record(Finding::SkippedFile {
                path: folder.to_path_buf(),
                reason: e.to_string(),
            });
            return LabelTable::default();
        }
    };
    let path = folder.join(format!("{}{}", file_id, METADATA_SUFFIX));

    let table = raw
        .get("Data labels")
        .or_else(|| raw.get("Data Labels"))
        .cloned();

    let mut labels = LabelTable::default();
    match MetadataDocument::from_document(MetadataKind::Ultrasound, raw) {
        Ok(MetadataDocument::Ultrasound(doc)) => labels.document = Some(doc),
        Ok(_) => {}
        Err(e) => diag.record(Finding::MalformedDocument {
            path: path.clone(),
            message: e.to_string(),
        }),
    }

    let entries = match table {
        Some(Value::Object(entries)) => entries,
        other => {
            let message = match other {
                Some(_) => "'Data labels' is not an object",
                None => "no 'Data labels' table",
            };
            diag.record(Finding::MalformedDocument {
                path,
                message: message.to_string(),
            });
            return labels;
        }
    };

    let mut rows: BTreeMap<u32, PointMetadata> = BTreeMap::new();
    for (file_id, value) in entries {
        let label: PointLabel = match serde_json::from_value(value) {
            Ok(label) => label,
            Err(e) => {
                diag.record(Finding::MalformedDocument {
                    path: path.clone(),
                    message: format!("label '{}': {}", file_id, e),
                });
                labels.dropped.push(file_id);
                continue;
            }
        };
        let Ok(id) = extract_last_id(&file_id) else {
            diag.record(Finding::SkippedFile {
                path: path.clone(),
                reason: format!("label '{}' has no point number", file_id),
            });
            labels.dropped.push(file_id);
            continue;
        };
        if let Some(kept) = rows.get(&id) {
            diag.record(Finding::DuplicateId {
                context: "ultrasound/labels".to_string(),
                id,
                kept: PathBuf::from(&kept.file_id),
                dropped: PathBuf::from(&file_id),
            });
            labels.dropped.push(file_id);
            continue;
        }
        rows.insert(
            id,
            PointMetadata {
                id,
                file_id,
                label: label.label,
                gain: label.gain,
                height: label.height,
                filter_mhz: label.filter_mhz,
            },
        );
    }
    labels.rows = rows.into_values().collect();
    labels
}

/// Every signal has the same number of samples.
pub fn signal_lengths_consistent(dataset: &UltrasoundDataset) -> bool {
    let mut lengths = dataset.signals.iter().map(|s| s.samples.len());
    match lengths.next() {
        Some(first) => lengths.all(|l| l == first),
        None => true,
    }
}

#[cfg(test)]
mod ultrasound_tests {
    use super::*;
    use crate::dataset::integrity_check::check_ultrasound_integrity;
    use crate::io::metadata::{write_metadata, Document};
    use crate::utils::test_utils::{build_sample_tree, ultrasound_path, write_signal, SampleLayout};
    use approx::assert_relative_eq;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn load(layout: &SampleLayout, dir: &TempDir) -> (UltrasoundDataset, Diagnostics) {
        let mut diag = Diagnostics::new();
        let sample = dir.path().join(&layout.sample_id);
        let us = load_ultrasound(&sample, &DatasetConfig::default(), &mut diag);
        (us, diag)
    }

    /// Rewrites the ultrasound metadata document of the default tree.
    fn edit_metadata(dir: &TempDir, layout: &SampleLayout, edit: impl FnOnce(&mut Document)) {
        let folder = ultrasound_path(dir.path(), layout);
        let (mut doc, _) = read_metadata(&folder).unwrap();
        edit(&mut doc);
        write_metadata(&doc, &folder, "ultrasound").unwrap();
    }

    fn labels(doc: &mut Document) -> &mut serde_json::Map<String, Value> {
        doc.get_mut("Data labels").unwrap().as_object_mut().unwrap()
    }

    #[test]
    fn test_points_ordered_by_point_number() {
        let dir = TempDir::new().unwrap();
        let layout = SampleLayout {
            point_count: 12,
            ..Default::default()
        };
        build_sample_tree(dir.path(), &layout);
        let (us, diag) = load(&layout, &dir);

        assert!(diag.is_clean(), "{:?}", diag.findings());
        // lexical order would put 290_10 before 290_2
        let ids: Vec<u32> = us.signals.iter().map(|s| s.id).collect();
        assert_eq!(ids, (1..=12).collect::<Vec<_>>());
        assert_eq!(us.signals[9].file_id, "290_10");
        assert_eq!(us.images[9].file_name(), "290_10.jpg");
        assert_eq!(us.metadata[9].file_id, "290_10");
        assert_eq!(us.metadata[0].gain, Some(20.0));
    }

    #[test]
    fn test_point_joins_collections() {
        let dir = TempDir::new().unwrap();
        let layout = SampleLayout::default();
        build_sample_tree(dir.path(), &layout);
        let (us, _) = load(&layout, &dir);

        let p = us.point("290_2");
        assert_eq!(p.signal.map(|s| s.samples.len()), Some(8));
        assert!(p.image.is_some());
        assert_eq!(p.metadata.map(|m| m.label.as_str()), Some("healthy"));
        assert!(us.point("290_9").signal.is_none());
    }

    #[test]
    fn test_normalized_signal() {
        let dir = TempDir::new().unwrap();
        let layout = SampleLayout::default();
        build_sample_tree(dir.path(), &layout);
        let (us, _) = load(&layout, &dir);

        let settings = UltrasoundConfig::default();
        let norm = us.normalized_signal("290_1", &settings).unwrap();
        // gain 20 dB with factor 20 scales by 40 * 10
        assert_relative_eq!(norm[0], 0.0);
        assert_relative_eq!(norm[4], 4.0 / 400.0);
        assert!(us.normalized_signal("290_7", &settings).is_none());
    }

    #[test]
    fn test_time_axis() {
        let t = time_axis(5, 80e6);
        assert_eq!(t.len(), 5);
        assert_relative_eq!(t[0], 0.0);
        assert_relative_eq!(t[4], 5.0 / 80e6);
        assert!(time_axis(0, 80e6).is_empty());
        assert_eq!(time_axis(1, 80e6), vec![0.0]);
    }

    #[test]
    fn test_missing_platform_folder_is_empty() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("290")).unwrap();
        let (us, diag) = load(&SampleLayout::default(), &dir);
        assert!(us.signals.is_empty() && us.images.is_empty() && us.metadata.is_empty());
        assert!(matches!(diag.findings()[0], Finding::MissingFolder { .. }));
    }

    #[test]
    fn test_uneven_signals_are_loaded_and_flagged() {
        let dir = TempDir::new().unwrap();
        let layout = SampleLayout::default();
        build_sample_tree(dir.path(), &layout);
        write_signal(
            &ultrasound_path(dir.path(), &layout)
                .join("US_signals")
                .join("290_2_Ascan.csv"),
            &[2048.0, 2049.0],
        );
        let (us, _) = load(&layout, &dir);
        assert_eq!(us.signals.len(), 3);
        assert!(!signal_lengths_consistent(&us));
    }

    #[test]
    fn test_broken_metadata_is_a_finding() {
        let dir = TempDir::new().unwrap();
        let layout = SampleLayout::default();
        build_sample_tree(dir.path(), &layout);
        fs::write(
            ultrasound_path(dir.path(), &layout).join("ultrasound_metadata.json"),
            "{ nope",
        )
        .unwrap();
        let (us, diag) = load(&layout, &dir);
        assert!(us.metadata.is_empty());
        assert_eq!(us.signals.len(), 3);
        assert!(diag
            .findings()
            .iter()
            .any(|f| matches!(f, Finding::MalformedDocument { .. })));
    }

    #[test]
    fn test_duplicate_point_number_in_labels() {
        let dir = TempDir::new().unwrap();
        let layout = SampleLayout::default();
        build_sample_tree(dir.path(), &layout);
        edit_metadata(&dir, &layout, |doc| {
            let row = labels(doc)["290_3"].clone();
            labels(doc).insert("291_3".to_string(), row);
        });

        let (us, diag) = load(&layout, &dir);
        assert_eq!(us.metadata.len(), 3);
        assert_eq!(us.metadata[2].file_id, "290_3");
        assert_eq!(us.dropped_labels, vec!["291_3".to_string()]);
        assert!(diag
            .findings()
            .iter()
            .any(|f| matches!(f, Finding::DuplicateId { id: 3, .. })));

        // 3 signals, 4 label rows, 3 images
        let report = check_ultrasound_integrity(&us);
        assert!(!report.counts_ok);
        assert_eq!(report.valid_count, 0);
    }

    #[test]
    fn test_mistyped_device_field_keeps_labels() {
        let dir = TempDir::new().unwrap();
        let layout = SampleLayout::default();
        build_sample_tree(dir.path(), &layout);
        edit_metadata(&dir, &layout, |doc| {
            doc.insert("Number of data points".to_string(), json!("3"));
        });

        let (us, diag) = load(&layout, &dir);
        assert_eq!(us.metadata.len(), 3);
        assert_eq!(us.metadata[0].gain, Some(20.0));
        assert!(us.document.is_none());
        assert_eq!(diag.findings().len(), 1);
        assert!(matches!(diag.findings()[0], Finding::MalformedDocument { .. }));
        assert!(check_ultrasound_integrity(&us).is_valid());
    }

    #[test]
    fn test_malformed_label_row_is_dropped_and_counted() {
        let dir = TempDir::new().unwrap();
        let layout = SampleLayout::default();
        build_sample_tree(dir.path(), &layout);
        edit_metadata(&dir, &layout, |doc| {
            labels(doc).insert("290_2".to_string(), json!("n/a"));
        });

        let (us, diag) = load(&layout, &dir);
        let ids: Vec<&str> = us.metadata.iter().map(|m| m.file_id.as_str()).collect();
        assert_eq!(ids, vec!["290_1", "290_3"]);
        assert_eq!(us.dropped_labels, vec!["290_2".to_string()]);
        assert!(diag.findings().iter().any(|f| matches!(
            f,
            Finding::MalformedDocument { message, .. } if message.contains("290_2")
        )));
        assert_eq!(us.label_row_count(), 3);
        assert!(!check_ultrasound_integrity(&us).identity_ok);
    }

    #[test]
    fn test_missing_label_table_is_a_finding() {
        let dir = TempDir::new().unwrap();
        let layout = SampleLayout::default();
        build_sample_tree(dir.path(), &layout);
        edit_metadata(&dir, &layout, |doc| {
            doc.remove("Data labels");
        });

        let (us, diag) = load(&layout, &dir);
        assert!(us.metadata.is_empty());
        assert!(us.document.is_some());
        assert!(diag.findings().iter().any(|f| matches!(
            f,
            Finding::MalformedDocument { message, .. } if message.contains("Data labels")
        )));
    }

    #[test]
    fn test_signal_without_scan_token_is_reported() {
        let dir = TempDir::new().unwrap();
        let layout = SampleLayout::default();
        build_sample_tree(dir.path(), &layout);
        let stray = ultrasound_path(dir.path(), &layout)
            .join("US_signals")
            .join("290_4.csv");
        write_signal(&stray, &[2048.0; 8]);

        let (us, diag) = load(&layout, &dir);
        assert_eq!(us.signals.len(), 3);
        assert_eq!(diag.findings(), &[Finding::UnidentifiedFile(stray)]);
    }
}
