use csv::Writer;
use image::{ImageBuffer, Luma, Rgb, RgbImage};
use nalgebra::Matrix4;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::io::metadata::{write_document, MetadataDocument, UltrasoundMetadata};

/// Shape of a synthetic sample folder tree.
#[derive(Debug, Clone)]
pub struct SampleLayout {
    pub sample_id: String,
    pub scan_count: u32,
    pub point_count: u32,
    pub with_segmented: bool,
    pub with_poses: bool,
    pub with_ultrasound: bool,
}

impl Default for SampleLayout {
    fn default() -> Self {
        Self {
            sample_id: "290".to_string(),
            scan_count: 3,
            point_count: 3,
            with_segmented: true,
            with_poses: true,
            with_ultrasound: true,
        }
    }
}

pub fn scanner_path(root: &Path, layout: &SampleLayout) -> PathBuf {
    root.join(&layout.sample_id)
        .join(format!("{}_ScannerPlatform", layout.sample_id))
}

pub fn hemisphere_path(root: &Path, layout: &SampleLayout, hemisphere: &str) -> PathBuf {
    scanner_path(root, layout).join(format!("{}_{}", layout.sample_id, hemisphere))
}

pub fn ultrasound_path(root: &Path, layout: &SampleLayout) -> PathBuf {
    root.join(&layout.sample_id)
        .join(format!("{}_UltrasoundPlatform", layout.sample_id))
}

/// Builds `<root>/<sample>` following the acquisition layout:
///
/// .. code-block:: text
///
///    290/
///      290_ScannerPlatform/
///        CAMERA_poses/Transformation_matrix_<i>.json
///        290_top/IMG_color/IMG_color_{original,segmented}/IMG_color_<state>_<i>.png
///        290_top/IMG_depth/IMG_depth_{original,segmented}/IMG_depth_<state>_<i>.png
///        290_bottom/...
///      290_UltrasoundPlatform/
///        ultrasound_metadata.json
///        US_signals/290_<n>_Ascan.csv
///        IMG_pictures/290_<n>.jpg
///
/// Returns the sample folder.
pub fn build_sample_tree(root: &Path, layout: &SampleLayout) -> PathBuf {
    let sample = root.join(&layout.sample_id);
    let scanner = scanner_path(root, layout);

    for hemisphere in ["top", "bottom"] {
        let hemi = hemisphere_path(root, layout, hemisphere);
        let mut states = vec!["original"];
        if layout.with_segmented {
            states.push("segmented");
        }
        for state in states {
            let color = hemi
                .join("IMG_color")
                .join(format!("IMG_color_{}", state));
            let depth = hemi
                .join("IMG_depth")
                .join(format!("IMG_depth_{}", state));
            for i in 1..=layout.scan_count {
                write_rgb_png(
                    &color.join(format!("IMG_color_{}_{}.png", state, i)),
                    4,
                    4,
                    [200, 30, 30],
                );
                write_depth_png(
                    &depth.join(format!("IMG_depth_{}_{}.png", state, i)),
                    4,
                    4,
                    1000,
                );
            }
        }
    }

    if layout.with_poses {
        let poses = scanner.join("CAMERA_poses");
        for i in 1..=layout.scan_count {
            let m = Matrix4::new_translation(&nalgebra::Vector3::new(i as f64, 0.0, 0.0));
            write_pose(&poses.join(format!("Transformation_matrix_{}.json", i)), &m);
        }
    }

    if layout.with_ultrasound {
        let us = ultrasound_path(root, layout);
        for n in 1..=layout.point_count {
            let samples: Vec<f64> = (0..8).map(|k| 2048.0 + k as f64).collect();
            write_signal(
                &us.join("US_signals")
                    .join(format!("{}_{}_Ascan.csv", layout.sample_id, n)),
                &samples,
            );
            write_rgb_jpg(
                &us.join("IMG_pictures")
                    .join(format!("{}_{}.jpg", layout.sample_id, n)),
            );
        }
        let mut meta = UltrasoundMetadata::new("20240620", layout.point_count, &layout.sample_id);
        for label in meta.labels.values_mut() {
            label.gain = Some(20.0);
            label.label = "healthy".to_string();
        }
        write_document(&MetadataDocument::Ultrasound(meta), &us).unwrap();
    }

    sample
}

fn ensure_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
}

pub fn write_rgb_png(path: &Path, width: u32, height: u32, rgb: [u8; 3]) {
    ensure_parent(path);
    RgbImage::from_pixel(width, height, Rgb(rgb))
        .save(path)
        .unwrap();
}

pub fn write_rgb_jpg(path: &Path) {
    ensure_parent(path);
    RgbImage::from_pixel(8, 8, Rgb([90, 90, 90])).save(path).unwrap();
}

pub fn write_depth_png(path: &Path, width: u32, height: u32, value: u16) {
    ensure_parent(path);
    ImageBuffer::<Luma<u16>, Vec<u16>>::from_pixel(width, height, Luma([value]))
        .save(path)
        .unwrap();
}

pub fn write_pose(path: &Path, matrix: &Matrix4<f64>) {
    ensure_parent(path);
    let rows: Vec<Vec<f64>> = (0..4)
        .map(|r| (0..4).map(|c| matrix[(r, c)]).collect())
        .collect();
    fs::write(path, serde_json::to_string_pretty(&rows).unwrap()).unwrap();
}

/// One-column A-scan CSV with an `hf` header.
pub fn write_signal(path: &Path, samples: &[f64]) {
    ensure_parent(path);
    let mut wtr = Writer::from_path(path).unwrap();
    wtr.write_record(["hf"]).unwrap();
    for s in samples {
        wtr.write_record([s.to_string()]).unwrap();
    }
    wtr.flush().unwrap();
}

pub fn write_camera_config(folder: &Path, distance: Value, image_count: u32) {
    fs::create_dir_all(folder).unwrap();
    let doc = serde_json::json!({
        "Camera distance": distance,
        "Number of images": image_count,
    });
    fs::write(
        folder.join("CAMERA_config.json"),
        serde_json::to_string_pretty(&doc).unwrap(),
    )
    .unwrap();
}
