//! Background removal of scanner images.
//!
//! The segmentation model itself is an external service behind
//! [`BackgroundRemover`]; this module only routes files, composites the
//! returned RGBA image and derives the depth mask from its alpha channel.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Pixel, Primitive, RgbImage, RgbaImage};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{DatasetConfig, SegmentationConfig};
use crate::dataset::scanner::{image_folder_name, Hemisphere, ImageState, Modality};
use crate::diagnostics::{Diagnostics, Finding};
use crate::error::{DatasetError, Result};
use crate::io::naming::extract_path_id;
use crate::io::walker::{file_name, list_files, walk_folders};

/// Alpha-matting settings forwarded to the remover.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationParams {
    pub model: String,
    pub foreground_threshold: u8,
    pub background_threshold: u8,
    pub erode_size: u32,
}

impl From<&SegmentationConfig> for SegmentationParams {
    fn from(config: &SegmentationConfig) -> Self {
        Self {
            model: config.model.clone(),
            foreground_threshold: config.foreground_threshold,
            background_threshold: config.background_threshold,
            erode_size: config.erode_size,
        }
    }
}

/// Image-in, RGBA-out segmentation service.
pub trait BackgroundRemover {
    /// `image` is the encoded color image as stored on disk.
    fn remove(&self, image: &[u8], params: &SegmentationParams) -> Result<RgbaImage>;
}

/// Blends `rgba` over a solid background.
pub fn composite_over(rgba: &RgbaImage, background: [u8; 3]) -> RgbImage {
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let px = rgba.get_pixel(x, y);
        let alpha = px[3] as f32 / 255.0;
        let mut out = [0u8; 3];
        for c in 0..3 {
            out[c] = (background[c] as f32 * (1.0 - alpha) + px[c] as f32 * alpha) as u8;
        }
        image::Rgb(out)
    })
}

/// `clamp(2 * alpha - 255, 0, 255)`: only confidently opaque pixels survive.
pub fn depth_mask(rgba: &RgbaImage) -> GrayImage {
    GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let a = rgba.get_pixel(x, y)[3] as f32;
        Luma([(2.0 * a - 255.0).clamp(0.0, 255.0) as u8])
    })
}

fn mask_buffer<P: Pixel>(buffer: &mut ImageBuffer<P, Vec<P::Subpixel>>, mask: &GrayImage) {
    for (x, y, px) in buffer.enumerate_pixels_mut() {
        if mask.get_pixel(x, y)[0] == 0 {
            px.apply(|_| <P::Subpixel as Primitive>::DEFAULT_MIN_VALUE);
        }
    }
}

/// Zeroes every pixel of `depth` where the mask is 0, keeping its pixel
/// format. The mask is resized (nearest neighbour) to the depth resolution.
pub fn apply_mask(mut depth: DynamicImage, mask: &GrayImage) -> DynamicImage {
    let (w, h) = (depth.width(), depth.height());
    let resized;
    let mask = if mask.dimensions() != (w, h) {
        resized = imageops::resize(mask, w, h, FilterType::Nearest);
        &resized
    } else {
        mask
    };

    match &mut depth {
        DynamicImage::ImageLuma8(b) => mask_buffer(b, mask),
        DynamicImage::ImageLumaA8(b) => mask_buffer(b, mask),
        DynamicImage::ImageRgb8(b) => mask_buffer(b, mask),
        DynamicImage::ImageRgba8(b) => mask_buffer(b, mask),
        DynamicImage::ImageLuma16(b) => mask_buffer(b, mask),
        DynamicImage::ImageLumaA16(b) => mask_buffer(b, mask),
        DynamicImage::ImageRgb16(b) => mask_buffer(b, mask),
        DynamicImage::ImageRgba16(b) => mask_buffer(b, mask),
        other => {
            let mut b = other.to_rgba8();
            mask_buffer(&mut b, mask);
            *other = DynamicImage::ImageRgba8(b);
        }
    }
    depth
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentationReport {
    pub color: Vec<PathBuf>,
    pub depth: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

fn is_hemisphere_folder(path: &Path) -> bool {
    let name = file_name(path);
    Hemisphere::ALL
        .iter()
        .any(|h| name.contains(&format!("_{}", h.token())))
}

/// `<hemisphere>/IMG_<modality>/IMG_<modality>_<state>`
fn sequence_folder(hemisphere: &Path, modality: Modality, state: ImageState) -> PathBuf {
    hemisphere
        .join(format!("IMG_{}", modality.token()))
        .join(image_folder_name(modality, state))
}

fn segmented_name(original: &Path) -> String {
    file_name(original).replace(ImageState::Original.token(), ImageState::Segmented.token())
}

/// Segments every original color image of every hemisphere folder below
/// `acquisition` and masks the depth image with the same id.
///
/// Outputs go to the `segmented` sibling folders, created on demand, with
/// `original` replaced by `segmented` in the file name. A failing image is
/// recorded and skipped.
pub fn segment_acquisition<P: AsRef<Path>>(
    acquisition: P,
    remover: &dyn BackgroundRemover,
    config: &DatasetConfig,
    diag: &mut Diagnostics,
) -> Result<SegmentationReport> {
    let root = acquisition.as_ref();
    if !root.is_dir() {
        return Err(DatasetError::NotFound(root.to_path_buf()));
    }
    info!("Started background segmentation");
    let params = SegmentationParams::from(&config.segmentation);
    let extension = &config.extensions.scanner_image;
    let mut report = SegmentationReport::default();

    for hemisphere in walk_folders(root, diag).into_iter().filter(|p| is_hemisphere_folder(p)) {
        let color_dir = sequence_folder(&hemisphere, Modality::Color, ImageState::Original);
        if !color_dir.is_dir() {
            debug!("no color images in {}", hemisphere.display());
            continue;
        }
        let color_prefix = image_folder_name(Modality::Color, ImageState::Original);
        let depth_prefix = image_folder_name(Modality::Depth, ImageState::Original);
        let depth_dir = sequence_folder(&hemisphere, Modality::Depth, ImageState::Original);
        let depth_files = list_files(&depth_dir, extension).unwrap_or_default();

        for image in list_files(&color_dir, extension)? {
            if !file_name(&image).contains(&color_prefix) {
                continue;
            }
            debug!("Processing {}", file_name(&image));
            let depth = extract_path_id(&image).ok().and_then(|id| {
                depth_files
                    .iter()
                    .filter(|d| file_name(d).contains(&depth_prefix))
                    .find(|d| extract_path_id(d).map_or(false, |did| did == id))
                    .cloned()
            });

            match segment_pair(&hemisphere, &image, depth.as_deref(), remover, &params, config) {
                Ok((color_out, depth_out)) => {
                    report.color.push(color_out);
                    report.depth.extend(depth_out);
                }
                Err(e) => {
                    diag.record(Finding::SkippedFile {
                        path: image.clone(),
                        reason: e.to_string(),
                    });
                    report.failed.push((image, e.to_string()));
                }
            }
        }
    }

    info!(
        "Segmented {} color and {} depth images ({} failed)",
        report.color.len(),
        report.depth.len(),
        report.failed.len()
    );
    Ok(report)
}

/// Segments one color image and its depth partner. Both outputs are built
/// in memory before either is written; a failed depth write removes the
/// color output again.
fn segment_pair(
    hemisphere: &Path,
    color: &Path,
    depth: Option<&Path>,
    remover: &dyn BackgroundRemover,
    params: &SegmentationParams,
    config: &DatasetConfig,
) -> Result<(PathBuf, Option<PathBuf>)> {
    let bytes = fs::read(color).map_err(|e| DatasetError::io(color, e))?;
    let rgba = remover.remove(&bytes, params)?;

    let color_image = composite_over(&rgba, config.segmentation.background_color);
    let depth_image = match depth {
        Some(depth) => Some((depth, apply_mask(image::open(depth)?, &depth_mask(&rgba)))),
        None => None,
    };

    let color_dir = sequence_folder(hemisphere, Modality::Color, ImageState::Segmented);
    fs::create_dir_all(&color_dir).map_err(|e| DatasetError::io(&color_dir, e))?;
    let color_out = color_dir.join(segmented_name(color));
    color_image.save(&color_out)?;

    let Some((depth, masked)) = depth_image else {
        return Ok((color_out, None));
    };
    let depth_dir = sequence_folder(hemisphere, Modality::Depth, ImageState::Segmented);
    let depth_out = depth_dir.join(segmented_name(depth));
    let written = fs::create_dir_all(&depth_dir)
        .map_err(|e| DatasetError::io(&depth_dir, e))
        .and_then(|()| masked.save(&depth_out).map_err(DatasetError::from));
    if let Err(e) = written {
        if let Err(cleanup) = fs::remove_file(&color_out) {
            debug!("cannot remove {}: {}", color_out.display(), cleanup);
        }
        return Err(e);
    }

    Ok((color_out, Some(depth_out)))
}
