//! Backing image creation: size estimation, allocation, formatting.

pub mod allocate;
pub mod format;
pub mod size;

pub use allocate::{allocate_image, AllocationMode};
pub use format::format_image;
pub use size::{estimate_total_kib, measure_dir_kib};
