pub mod metadata;
pub mod naming;
pub mod pointcloud;
pub mod signals;
pub mod walker;
