//! Backing-file size estimation.
//!
//! The image must hold the measured rootfs plus filesystem metadata
//! overhead. Metadata overhead grows with inode count, so a fixed buffer
//! that works for small images routinely runs out of space past the 1 GiB
//! mark; the estimate escalates to a larger buffer there unless the caller
//! chose a buffer explicitly.

use anyhow::{Context, Result};
use std::path::Path;

/// Buffer added when the caller did not pick one, in MiB.
pub const DEFAULT_BUFFER_MIB: u64 = 50;

/// Buffer used for large images under the default policy, in MiB.
pub const LARGE_IMAGE_BUFFER_MIB: u64 = 100;

/// Source size above which the default buffer escalates (1 GiB, in KiB).
pub const LARGE_IMAGE_THRESHOLD_KIB: u64 = 1024 * 1024;

/// Compute the backing-file size in whole KiB.
///
/// `buffer_mib` of `None` means "default policy": 50 MiB, escalated to
/// 100 MiB once the source crosses the large-image threshold. An explicit
/// buffer always wins, even if it equals the default numerically.
pub fn estimate_total_kib(source_kib: u64, buffer_mib: Option<u64>) -> u64 {
    let buffer_kib = match buffer_mib {
        Some(mib) => mib * 1024,
        None if source_kib > LARGE_IMAGE_THRESHOLD_KIB => LARGE_IMAGE_BUFFER_MIB * 1024,
        None => DEFAULT_BUFFER_MIB * 1024,
    };
    source_kib + buffer_kib
}

/// Measure the total size of a directory tree in whole KiB (rounded up).
///
/// Symlinks are counted by their own (link) size, never followed, so a
/// link pointing outside the tree cannot inflate the estimate.
pub fn measure_dir_kib(path: &Path) -> Result<u64> {
    let bytes = measure_dir_bytes(path)
        .with_context(|| format!("Failed to measure directory size of {}", path.display()))?;
    Ok(bytes.div_ceil(1024))
}

fn measure_dir_bytes(path: &Path) -> Result<u64> {
    let mut total = 0;

    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let metadata = std::fs::symlink_metadata(entry.path())?;

        if metadata.is_dir() {
            total += measure_dir_bytes(&entry.path())?;
        } else {
            total += metadata.len();
        }
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_buffer() {
        // 10 MiB source, default buffer: 10 + 50 MiB
        let source = 10 * 1024;
        assert_eq!(estimate_total_kib(source, None), (10 + 50) * 1024);
    }

    #[test]
    fn test_large_image_escalation() {
        // 2 GiB source, untouched buffer: escalates to 100 MiB
        let source = 2 * 1024 * 1024;
        assert_eq!(estimate_total_kib(source, None), source + 100 * 1024);
    }

    #[test]
    fn test_explicit_buffer_wins_over_escalation() {
        let source = 2 * 1024 * 1024;
        assert_eq!(estimate_total_kib(source, Some(50)), source + 50 * 1024);
    }

    #[test]
    fn test_explicit_default_value_is_still_explicit() {
        // Passing 50 explicitly must not escalate even past the threshold.
        let source = LARGE_IMAGE_THRESHOLD_KIB + 1;
        assert_eq!(
            estimate_total_kib(source, Some(DEFAULT_BUFFER_MIB)),
            source + DEFAULT_BUFFER_MIB * 1024
        );
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let source = LARGE_IMAGE_THRESHOLD_KIB;
        assert_eq!(estimate_total_kib(source, None), source + 50 * 1024);
    }

    #[test]
    fn test_measure_dir_kib() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), vec![0u8; 2048]).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b"), vec![0u8; 100]).unwrap();

        // 2048 bytes + 100 bytes rounds up to 3 KiB
        let kib = measure_dir_kib(dir.path()).unwrap();
        assert_eq!(kib, 3);
    }

    #[test]
    fn test_measure_missing_dir_is_error() {
        assert!(measure_dir_kib(Path::new("/nonexistent_path_12345")).is_err());
    }
}
