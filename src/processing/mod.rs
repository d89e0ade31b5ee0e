pub mod calibration;
pub mod segmentation;
pub mod transform;
