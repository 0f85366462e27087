//! Backing-file allocation.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::File;
use std::path::Path;

/// How the backing file's space is claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationMode {
    /// Apparent size only; storage is consumed as data is written.
    Sparse,
    /// Storage reserved immediately; fails fast when the disk is full.
    Preallocated,
}

/// Create a regular file of exactly `size_bytes` at `path`.
///
/// The file does not yet contain a filesystem. In preallocated mode an
/// insufficient-disk condition surfaces here instead of midway through the
/// copy.
pub fn allocate_image(path: &Path, size_bytes: u64, mode: AllocationMode) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create image file {}", path.display()))?;

    match mode {
        AllocationMode::Sparse => file
            .set_len(size_bytes)
            .with_context(|| format!("Failed to extend image file to {} bytes", size_bytes))?,
        AllocationMode::Preallocated => file.allocate(size_bytes).with_context(|| {
            format!(
                "Failed to preallocate {} bytes for {} (insufficient disk space?)",
                size_bytes,
                path.display()
            )
        })?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_allocation_sets_apparent_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparse.img");
        allocate_image(&path, 60 * 1024 * 1024, AllocationMode::Sparse).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.len(), 60 * 1024 * 1024);
    }

    #[test]
    fn test_preallocated_file_has_exact_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prealloc.img");
        allocate_image(&path, 1024 * 1024, AllocationMode::Preallocated).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.len(), 1024 * 1024);
    }

    #[test]
    fn test_unwritable_target_is_error() {
        let result = allocate_image(
            Path::new("/nonexistent_dir_12345/img"),
            1024,
            AllocationMode::Sparse,
        );
        assert!(result.is_err());
    }
}
