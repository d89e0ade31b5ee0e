use log::debug;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::walker::{file_name, find_child_folder, list_child_folders, list_files};
use crate::config::DatasetConfig;
use crate::error::{DatasetError, Result};

/// Opaque key-value document as stored on disk, key order preserved.
pub type Document = Map<String, Value>;

pub const METADATA_SUFFIX: &str = "_metadata.json";

/// Semantic anchor of a metadata document in the folder hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKind {
    Sample,
    Scanner,
    Hemisphere,
    ImageType,
    Ultrasound,
}

impl MetadataKind {
    pub const ALL: [MetadataKind; 5] = [
        MetadataKind::Sample,
        MetadataKind::Scanner,
        MetadataKind::Hemisphere,
        MetadataKind::ImageType,
        MetadataKind::Ultrasound,
    ];

    /// File name tag, `<tag>_metadata.json`
    pub fn tag(&self) -> &'static str {
        match self {
            MetadataKind::Sample => "sample",
            MetadataKind::Scanner => "scanner",
            MetadataKind::Hemisphere => "hemisphere",
            MetadataKind::ImageType => "type",
            MetadataKind::Ultrasound => "ultrasound",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }

    /// 0 = sample, 1 = scanner/ultrasound, 2 = hemisphere, 3 = modality type
    pub fn path_level(&self) -> u8 {
        match self {
            MetadataKind::Sample => 0,
            MetadataKind::Scanner | MetadataKind::Ultrasound => 1,
            MetadataKind::Hemisphere => 2,
            MetadataKind::ImageType => 3,
        }
    }
}

/// Serialises `document` to `<folder>/<base_name>_metadata.json`, replacing any
/// existing file. The folder is created if absent.
pub fn write_metadata<P: AsRef<Path>>(
    document: &Document,
    folder: P,
    base_name: &str,
) -> Result<PathBuf> {
    let folder = folder.as_ref();
    fs::create_dir_all(folder).map_err(|e| DatasetError::io(folder, e))?;

    let path = folder.join(format!("{}{}", base_name, METADATA_SUFFIX));
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    document
        .serialize(&mut ser)
        .map_err(|e| DatasetError::MalformedMetadata {
            path: path.clone(),
            source: e,
        })?;

    // whole-file replace
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &buf).map_err(|e| DatasetError::io(&tmp, e))?;
    fs::rename(&tmp, &path).map_err(|e| DatasetError::io(&path, e))?;

    debug!("wrote {} ({} keys)", path.display(), document.len());
    Ok(path)
}

/// Reads the single `*_metadata.json` in `folder`.
///
/// Returns the document and its file id (file name without the
/// `_metadata.json` suffix).
pub fn read_metadata<P: AsRef<Path>>(folder: P) -> Result<(Document, String)> {
    let path = locate_metadata_file(folder.as_ref())?;
    let name = file_name(&path);
    let file_id = name
        .strip_suffix(METADATA_SUFFIX)
        .unwrap_or(&name)
        .to_string();

    debug!("reading metadata file {}", name);
    let text = fs::read_to_string(&path).map_err(|e| DatasetError::io(&path, e))?;
    let document: Document =
        serde_json::from_str(&text).map_err(|e| DatasetError::MalformedMetadata {
            path: path.clone(),
            source: e,
        })?;
    debug!("keys in metadata: {:?}", document.keys().collect::<Vec<_>>());

    Ok((document, file_id))
}

fn locate_metadata_file(folder: &Path) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = list_files(folder, "json")?
        .into_iter()
        .filter(|p| file_name(p).ends_with(METADATA_SUFFIX))
        .collect();

    if candidates.len() > 1 {
        return Err(DatasetError::AmbiguousMatch {
            folder: folder.to_path_buf(),
            candidates,
        });
    }
    candidates
        .pop()
        .ok_or_else(|| DatasetError::NotFound(folder.join(format!("*{}", METADATA_SUFFIX))))
}

fn has_metadata_file(folder: &Path) -> bool {
    list_files(folder, "json")
        .map(|files| files.iter().any(|p| file_name(p).ends_with(METADATA_SUFFIX)))
        .unwrap_or(false)
}

/// Accepts numbers, numeric strings and blanks (as `None`).
fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleMetadata {
    #[serde(rename = "Tissue ID")]
    pub tissue_id: String,
    #[serde(rename = "Species")]
    pub species: String,
    #[serde(rename = "Gender")]
    pub gender: String,
    #[serde(rename = "Age")]
    pub age: Value,
    #[serde(rename = "Tissue (sample)")]
    pub tissue: String,
    #[serde(rename = "Tissue (sample) additional info")]
    pub tissue_additional_info: String,
    #[serde(rename = "Diagnosis")]
    pub diagnosis: String,
    #[serde(rename = "Medical history")]
    pub medical_history: String,
    #[serde(rename = "Fixation method")]
    pub fixation_method: String,
    #[serde(rename = "Diagnostic center")]
    pub diagnostic_center: String,
    // the trailing space is part of the published key
    #[serde(rename = "List of scanner_ultrasound pairs ")]
    pub scanner_ultrasound_pairs: Value,
    pub path_level: u8,
    #[serde(flatten)]
    pub extra: Document,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerMetadata {
    #[serde(rename = "Collector ID")]
    pub collector_id: String,
    #[serde(rename = "Date of acquisition")]
    pub date: String,
    #[serde(rename = "Camera model")]
    pub camera_model: String,
    #[serde(rename = "Camera serial")]
    pub camera_serial: u64,
    /// Millimetres, or the unknown-distance placeholder
    #[serde(rename = "Camera distance")]
    pub camera_distance: Value,
    #[serde(rename = "Camera resolution")]
    pub camera_resolution: String,
    #[serde(rename = "Background")]
    pub background: String,
    #[serde(rename = "Illumination")]
    pub illumination: String,
    #[serde(rename = "Intrinsic matrix")]
    pub intrinsic_matrix: Vec<Vec<f64>>,
    #[serde(rename = "Distortion matrix")]
    pub distortion: Vec<f64>,
    pub path_level: u8,
    #[serde(flatten)]
    pub extra: Document,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HemisphereMetadata {
    #[serde(rename = "Tissue hemisphere")]
    pub hemisphere: String,
    #[serde(rename = "Exposure time")]
    pub exposure: Value,
    pub path_level: u8,
    #[serde(flatten)]
    pub extra: Document,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageTypeMetadata {
    #[serde(rename = "Image type")]
    pub image_type: String,
    #[serde(rename = "Segmentation method")]
    pub segmentation_method: String,
    #[serde(rename = "Number of images")]
    pub image_count: u32,
    pub path_level: u8,
    #[serde(flatten)]
    pub extra: Document,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxRxParams {
    #[serde(rename = "PulseVoltage")]
    pub pulse_voltage: f64,
    #[serde(rename = "Pulsewidth")]
    pub pulse_width: f64,
    #[serde(rename = "PRF[kHz]")]
    pub prf_khz: f64,
    #[serde(flatten)]
    pub extra: Document,
}

/// One row of the ultrasound "Data labels" table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointLabel {
    #[serde(rename = "Label")]
    pub label: String,
    #[serde(rename = "Height", deserialize_with = "lenient_f64")]
    pub height: Option<f64>,
    #[serde(rename = "Gain", deserialize_with = "lenient_f64")]
    pub gain: Option<f64>,
    #[serde(rename = "Filter MHz", deserialize_with = "lenient_f64")]
    pub filter_mhz: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UltrasoundMetadata {
    #[serde(rename = "Collector ID")]
    pub collector_id: String,
    #[serde(rename = "Date of acquisition")]
    pub date: String,
    #[serde(rename = "Probe model")]
    pub transducer_model: String,
    #[serde(rename = "TX/RX device model")]
    pub device_model: String,
    #[serde(rename = "TX/RX device params")]
    pub device_params: TxRxParams,
    #[serde(rename = "Number of data points")]
    pub point_count: u32,
    #[serde(rename = "Data labels", alias = "Data Labels")]
    pub labels: BTreeMap<String, PointLabel>,
    pub path_level: u8,
    #[serde(flatten)]
    pub extra: Document,
}

/// Sample description supplied at acquisition setup.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AcquisitionInfo {
    pub species: String,
    pub gender: String,
    pub age: Value,
    pub tissue: String,
    pub tissue_additional_info: String,
    pub diagnosis: String,
    pub medical_history: String,
    pub scan_date: String,
    pub camera_distance: Value,
    pub resolution: String,
    pub exposure: Value,
    pub ultrasound: Option<UltrasoundAcquisition>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct UltrasoundAcquisition {
    pub date: String,
    pub point_count: u32,
}

impl SampleMetadata {
    pub fn new(sample_id: &str, info: &AcquisitionInfo) -> Self {
        let mut pairs = Document::new();
        pairs.insert("point".to_string(), Value::String(String::new()));
        Self {
            tissue_id: sample_id.to_string(),
            species: info.species.clone(),
            gender: info.gender.clone(),
            age: info.age.clone(),
            tissue: info.tissue.clone(),
            tissue_additional_info: info.tissue_additional_info.clone(),
            diagnosis: info.diagnosis.clone(),
            medical_history: info.medical_history.clone(),
            fixation_method: String::new(),
            diagnostic_center: "University of Camerino".to_string(),
            scanner_ultrasound_pairs: Value::Object(pairs),
            path_level: MetadataKind::Sample.path_level(),
            extra: Document::new(),
        }
    }
}

impl ScannerMetadata {
    pub fn new(date: &str, distance: Value, resolution: &str) -> Self {
        Self {
            collector_id: "MCM".to_string(),
            date: date.to_string(),
            camera_model: "Intel RealSense D405".to_string(),
            camera_serial: 218622277156,
            camera_distance: distance,
            camera_resolution: resolution.to_string(),
            background: "white".to_string(),
            illumination: "LED".to_string(),
            intrinsic_matrix: vec![
                vec![647.8780517578125, 0.0, 639.9894409179688],
                vec![0.0, 647.115478515625, 363.3221740722656],
                vec![0.0, 0.0, 1.0],
            ],
            distortion: vec![
                -0.0521327443420887,
                0.059997934848070145,
                -1.2732599316223059e-05,
                0.0001820140314521268,
                -0.01927928999066353,
            ],
            path_level: MetadataKind::Scanner.path_level(),
            extra: Document::new(),
        }
    }
}

impl HemisphereMetadata {
    pub fn new(hemisphere: &str, exposure: Value) -> Self {
        Self {
            hemisphere: hemisphere.to_string(),
            exposure,
            path_level: MetadataKind::Hemisphere.path_level(),
            extra: Document::new(),
        }
    }
}

impl ImageTypeMetadata {
    pub fn new(image_type: &str) -> Self {
        Self {
            image_type: image_type.to_string(),
            segmentation_method: "remBG u2-general".to_string(),
            image_count: 100,
            path_level: MetadataKind::ImageType.path_level(),
            extra: Document::new(),
        }
    }
}

impl UltrasoundMetadata {
    /// Blank label rows `<sample>_1 ..= <sample>_<n>`.
    pub fn new(date: &str, point_count: u32, sample_id: &str) -> Self {
        let labels = (1..=point_count)
            .map(|n| {
                (
                    format!("{}_{}", sample_id, n),
                    PointLabel {
                        label: String::new(),
                        height: Some(0.0),
                        gain: Some(0.0),
                        filter_mhz: Some(10.0),
                    },
                )
            })
            .collect();
        Self {
            collector_id: "IB".to_string(),
            date: date.to_string(),
            transducer_model: "SPW16".to_string(),
            device_model: "US-KEY Lecoeur Electronique".to_string(),
            device_params: TxRxParams {
                pulse_voltage: 40.0,
                pulse_width: 14.0,
                prf_khz: 1.0,
                extra: Document::new(),
            },
            point_count,
            labels,
            path_level: MetadataKind::Ultrasound.path_level(),
            extra: Document::new(),
        }
    }
}

/// The five canonical document shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataDocument {
    Sample(SampleMetadata),
    Scanner(ScannerMetadata),
    Hemisphere(HemisphereMetadata),
    ImageType(ImageTypeMetadata),
    Ultrasound(UltrasoundMetadata),
}

impl MetadataDocument {
    pub fn kind(&self) -> MetadataKind {
        match self {
            MetadataDocument::Sample(_) => MetadataKind::Sample,
            MetadataDocument::Scanner(_) => MetadataKind::Scanner,
            MetadataDocument::Hemisphere(_) => MetadataKind::Hemisphere,
            MetadataDocument::ImageType(_) => MetadataKind::ImageType,
            MetadataDocument::Ultrasound(_) => MetadataKind::Ultrasound,
        }
    }

    pub fn path_level(&self) -> u8 {
        self.kind().path_level()
    }

    pub fn to_document(&self) -> std::result::Result<Document, serde_json::Error> {
        let value = match self {
            MetadataDocument::Sample(m) => serde_json::to_value(m)?,
            MetadataDocument::Scanner(m) => serde_json::to_value(m)?,
            MetadataDocument::Hemisphere(m) => serde_json::to_value(m)?,
            MetadataDocument::ImageType(m) => serde_json::to_value(m)?,
            MetadataDocument::Ultrasound(m) => serde_json::to_value(m)?,
        };
        match value {
            Value::Object(map) => Ok(map),
            other => Ok(Document::from_iter([("value".to_string(), other)])),
        }
    }

    pub fn from_document(
        kind: MetadataKind,
        document: Document,
    ) -> std::result::Result<Self, serde_json::Error> {
        let value = Value::Object(document);
        Ok(match kind {
            MetadataKind::Sample => MetadataDocument::Sample(serde_json::from_value(value)?),
            MetadataKind::Scanner => MetadataDocument::Scanner(serde_json::from_value(value)?),
            MetadataKind::Hemisphere => {
                MetadataDocument::Hemisphere(serde_json::from_value(value)?)
            }
            MetadataKind::ImageType => MetadataDocument::ImageType(serde_json::from_value(value)?),
            MetadataKind::Ultrasound => {
                MetadataDocument::Ultrasound(serde_json::from_value(value)?)
            }
        })
    }
}

/// Writes a typed document under its canonical tag.
pub fn write_document<P: AsRef<Path>>(document: &MetadataDocument, folder: P) -> Result<PathBuf> {
    let folder = folder.as_ref();
    let tag = document.kind().tag();
    let body = document
        .to_document()
        .map_err(|e| DatasetError::MalformedMetadata {
            path: folder.join(format!("{}{}", tag, METADATA_SUFFIX)),
            source: e,
        })?;
    write_metadata(&body, folder, tag)
}

/// Reads the folder's metadata and types it by its file tag.
pub fn read_document<P: AsRef<Path>>(folder: P) -> Result<(MetadataDocument, String)> {
    let folder = folder.as_ref();
    let (document, file_id) = read_metadata(folder)?;
    let path = folder.join(format!("{}{}", file_id, METADATA_SUFFIX));

    let kind = MetadataKind::from_tag(&file_id)
        .ok_or_else(|| DatasetError::NotFound(path.clone()))?;
    let typed = MetadataDocument::from_document(kind, document)
        .map_err(|e| DatasetError::MalformedMetadata { path, source: e })?;
    Ok((typed, file_id))
}

fn child_with_token(parent: &Path, token: &str) -> Result<PathBuf> {
    find_child_folder(parent, token).ok_or_else(|| DatasetError::NotFound(parent.join(token)))
}

/// Writes the full document set of one sample at acquisition setup.
///
/// Folders are resolved by name token: scanner platform, `top`/`bottom`
/// hemispheres, `color`/`depth` type folders and, when `info.ultrasound`
/// is set, the ultrasound platform. Returns the written paths.
pub fn set_metadata<P: AsRef<Path>>(
    data_path: P,
    sample_id: &str,
    info: &AcquisitionInfo,
    config: &DatasetConfig,
) -> Result<Vec<PathBuf>> {
    let sample_path = data_path.as_ref().join(sample_id);
    if !sample_path.is_dir() {
        return Err(DatasetError::NotFound(sample_path));
    }
    let scanner_path = child_with_token(&sample_path, &config.layout.scanner_folder)?;

    let mut plan: Vec<(PathBuf, MetadataDocument)> = vec![
        (
            sample_path.clone(),
            MetadataDocument::Sample(SampleMetadata::new(sample_id, info)),
        ),
        (
            scanner_path.clone(),
            MetadataDocument::Scanner(ScannerMetadata::new(
                &info.scan_date,
                info.camera_distance.clone(),
                &info.resolution,
            )),
        ),
    ];

    for hemisphere in ["top", "bottom"] {
        let hemisphere_path = child_with_token(&scanner_path, hemisphere)?;
        plan.push((
            hemisphere_path.clone(),
            MetadataDocument::Hemisphere(HemisphereMetadata::new(
                hemisphere,
                info.exposure.clone(),
            )),
        ));
        for image_type in ["color", "depth"] {
            let type_path = child_with_token(&hemisphere_path, image_type)?;
            plan.push((
                type_path,
                MetadataDocument::ImageType(ImageTypeMetadata::new(image_type)),
            ));
        }
    }

    if let Some(us) = &info.ultrasound {
        let us_path = child_with_token(&sample_path, &config.layout.ultrasound_folder)?;
        plan.push((
            us_path,
            MetadataDocument::Ultrasound(UltrasoundMetadata::new(
                &us.date,
                us.point_count,
                sample_id,
            )),
        ));
    }

    let mut written = Vec::with_capacity(plan.len());
    for (folder, document) in &plan {
        written.push(write_document(document, folder)?);
    }
    log::info!("created metadata for sample {} ({} files)", sample_id, written.len());
    Ok(written)
}

/// Reads the metadata anchored `level` folders below the sample.
///
/// Level 0 is the sample folder itself. Only folders holding a metadata
/// file are candidates; `selector` narrows them by name substring (e.g.
/// `"top"`). More than one remaining candidate is an `AmbiguousMatch`.
/// Returns (document, folder, file id).
pub fn get_metadata<P: AsRef<Path>>(
    data_path: P,
    sample_id: &str,
    level: usize,
    selector: Option<&str>,
) -> Result<(Document, PathBuf, String)> {
    let parent = data_path.as_ref().join(sample_id);

    let children = list_child_folders(&parent, level);
    let folder = if children.is_empty() {
        parent
    } else {
        let mut candidates: Vec<PathBuf> = children
            .into_iter()
            .filter(|p| selector.map_or(true, |s| file_name(p).contains(s)))
            .filter(|p| has_metadata_file(p))
            .collect();
        candidates.sort();

        match candidates.len() {
            0 => {
                return Err(DatasetError::NotFound(
                    parent.join(format!("<level {}>", level)),
                ))
            }
            1 => candidates.remove(0),
            _ => {
                return Err(DatasetError::AmbiguousMatch {
                    folder: parent,
                    candidates,
                })
            }
        }
    };

    let (document, file_id) = read_metadata(&folder)?;
    Ok((document, folder, file_id))
}

#[cfg(test)]
mod metadata_tests {
    use super::*;
    use crate::utils::test_utils::{build_sample_tree, SampleLayout};
    use serde_json::json;
    use tempfile::TempDir;

    fn example_document() -> Document {
        let value = json!({
            "Collector ID": "MCM",
            "Camera distance": 130,
            "Intrinsic matrix": [[1.5, 0.0], [0.0, 2.25]],
            "nested": {"a": "b", "depth": {"c": 3}},
            "path_level": 1
        });
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("not/yet/there");
        let doc = example_document();

        let written = write_metadata(&doc, &folder, "scanner").unwrap();
        assert_eq!(file_name(&written), "scanner_metadata.json");

        let (read, file_id) = read_metadata(written.parent().unwrap()).unwrap();
        assert_eq!(read, doc);
        assert_eq!(file_id, "scanner");
        // key order survives
        assert_eq!(read.keys().next().map(|k| k.as_str()), Some("Collector ID"));
    }

    #[test]
    fn test_write_overwrites() {
        let dir = TempDir::new().unwrap();
        let mut doc = example_document();
        write_metadata(&doc, dir.path(), "scanner").unwrap();
        doc.insert("Collector ID".into(), json!("XYZ"));
        write_metadata(&doc, dir.path(), "scanner").unwrap();

        let (read, _) = read_metadata(dir.path()).unwrap();
        assert_eq!(read["Collector ID"], json!("XYZ"));
        assert_eq!(list_files(dir.path(), "json").unwrap().len(), 1);
    }

    #[test]
    fn test_read_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            read_metadata(dir.path()).unwrap_err(),
            DatasetError::NotFound(_)
        ));

        fs::write(dir.path().join("broken_metadata.json"), "{ not json").unwrap();
        assert!(matches!(
            read_metadata(dir.path()).unwrap_err(),
            DatasetError::MalformedMetadata { .. }
        ));

        fs::write(dir.path().join("other_metadata.json"), "{}").unwrap();
        match read_metadata(dir.path()).unwrap_err() {
            DatasetError::AmbiguousMatch { candidates, .. } => assert_eq!(candidates.len(), 2),
            e => panic!("unexpected error {e}"),
        }
    }

    #[test]
    fn test_non_metadata_json_is_ignored() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("CAMERA_config.json"), "{}").unwrap();
        write_metadata(&example_document(), dir.path(), "hemisphere").unwrap();

        let (_, file_id) = read_metadata(dir.path()).unwrap();
        assert_eq!(file_id, "hemisphere");
    }

    #[test]
    fn test_kind_tags_and_levels() {
        for kind in MetadataKind::ALL {
            assert_eq!(MetadataKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(MetadataKind::ImageType.tag(), "type");
        assert_eq!(MetadataKind::Sample.path_level(), 0);
        assert_eq!(MetadataKind::Ultrasound.path_level(), 1);
        assert_eq!(MetadataKind::ImageType.path_level(), 3);
    }

    #[test]
    fn test_typed_document_round_trip_keeps_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let mut scanner = ScannerMetadata::new("20240618", json!(130), "1280x720");
        scanner
            .extra
            .insert("Operator note".into(), json!("hand edited"));
        let doc = MetadataDocument::Scanner(scanner);

        write_document(&doc, dir.path()).unwrap();
        let (read, file_id) = read_document(dir.path()).unwrap();

        assert_eq!(file_id, "scanner");
        assert_eq!(read, doc);
        assert_eq!(read.path_level(), 1);
    }

    #[test]
    fn test_ultrasound_labels_accept_both_spellings() {
        let doc = match json!({
            "Number of data points": 2,
            "Data Labels": {
                "S_1": {"Label": "tumor", "Gain": "30", "Height": 1.5, "Filter MHz": 10},
                "S_2": {"Label": "", "Gain": "", "Height": 0}
            },
            "path_level": 1
        }) {
            Value::Object(m) => m,
            _ => unreachable!(),
        };
        let typed = MetadataDocument::from_document(MetadataKind::Ultrasound, doc).unwrap();
        let MetadataDocument::Ultrasound(us) = typed else {
            panic!("wrong variant");
        };
        assert_eq!(us.labels.len(), 2);
        assert_eq!(us.labels["S_1"].gain, Some(30.0));
        assert_eq!(us.labels["S_2"].gain, None);
        assert_eq!(us.labels["S_2"].filter_mhz, None);
    }

    #[test]
    fn test_set_and_get_metadata() {
        let dir = TempDir::new().unwrap();
        let layout = SampleLayout::default();
        build_sample_tree(dir.path(), &layout);
        let config = DatasetConfig::default();

        let info = AcquisitionInfo {
            species: "dog".into(),
            age: json!(10),
            diagnosis: "Perianal gland epithelioma".into(),
            scan_date: "20240618".into(),
            camera_distance: json!(130),
            resolution: "1280x720".into(),
            exposure: json!(3800),
            ultrasound: Some(UltrasoundAcquisition {
                date: "20240620".into(),
                point_count: 3,
            }),
            ..Default::default()
        };

        let written = set_metadata(dir.path(), &layout.sample_id, &info, &config).unwrap();
        assert_eq!(written.len(), 9);

        let (sample, folder, file_id) =
            get_metadata(dir.path(), &layout.sample_id, 0, None).unwrap();
        assert_eq!(file_id, "sample");
        assert_eq!(folder, dir.path().join(&layout.sample_id));
        assert_eq!(sample["Tissue ID"], json!(layout.sample_id));

        // scanner and ultrasound both sit at level 1
        assert!(matches!(
            get_metadata(dir.path(), &layout.sample_id, 1, None).unwrap_err(),
            DatasetError::AmbiguousMatch { .. }
        ));
        let (us, _, file_id) =
            get_metadata(dir.path(), &layout.sample_id, 1, Some("Ultrasound")).unwrap();
        assert_eq!(file_id, "ultrasound");
        assert_eq!(us["Data labels"].as_object().unwrap().len(), 3);

        let (top, _, _) = get_metadata(dir.path(), &layout.sample_id, 2, Some("top")).unwrap();
        assert_eq!(top["Tissue hemisphere"], json!("top"));
        assert_eq!(top["path_level"], json!(2));
    }

    #[test]
    fn test_set_metadata_requires_scanner_folder() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("42")).unwrap();
        let err = set_metadata(dir.path(), "42", &AcquisitionInfo::default(), &DatasetConfig::default())
            .unwrap_err();
        assert!(matches!(err, DatasetError::NotFound(_)));
    }
}
