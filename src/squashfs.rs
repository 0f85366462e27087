//! Squashfs companion image builder.
//!
//! Dual-output mode produces a compressed squashfs alongside the primary
//! filesystem image, built from the same unpacked tree after the primary
//! image is unmounted.

use crate::process::Cmd;
use anyhow::{bail, Result};
use std::path::Path;

/// Build a squashfs image from a directory tree.
pub fn create_squashfs(source_dir: &Path, output: &Path) -> Result<()> {
    if !source_dir.is_dir() {
        bail!(
            "Squashfs source is not a directory: {}",
            source_dir.display()
        );
    }

    Cmd::new("mksquashfs")
        .arg_path(source_dir)
        .arg_path(output)
        .arg("-noappend")
        .error_msg("mksquashfs failed. Install squashfs-tools.")
        .run()
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_source_is_error() {
        let result = create_squashfs(
            Path::new("/nonexistent_path_12345"),
            Path::new("/tmp/out.squashfs"),
        );
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("not a directory"));
    }
}
