//! Filesystem formatting for the backing file.
//!
//! `mkfs.<type>` refuses to overwrite recognizable signatures unless
//! forced, and the force flag differs per filesystem family. The mapping
//! is table-driven so adding a family is one entry; unknown types are
//! passed through unflagged and `mkfs` itself rejects what it cannot do.

use crate::process::Cmd;
use anyhow::{Context, Result};
use std::path::Path;

/// Force/overwrite flags per filesystem type.
const FORCE_FLAGS: &[(&str, &[&str])] = &[
    ("ext2", &["-F"]),
    ("ext3", &["-F"]),
    ("ext4", &["-F"]),
    ("xfs", &["-f"]),
    ("btrfs", &["-f"]),
];

/// Package providing the mkfs tool, per filesystem type. Used only for
/// advisory hints when formatting fails.
const TOOLSET_HINTS: &[(&str, &str)] = &[
    ("ext2", "e2fsprogs"),
    ("ext3", "e2fsprogs"),
    ("ext4", "e2fsprogs"),
    ("xfs", "xfsprogs"),
    ("btrfs", "btrfs-progs"),
];

/// The mkfs command name for a filesystem type.
pub fn mkfs_command(fs_type: &str) -> String {
    format!("mkfs.{}", fs_type)
}

/// Force flags for a filesystem type, empty for unknown types.
pub fn force_flags(fs_type: &str) -> &'static [&'static str] {
    FORCE_FLAGS
        .iter()
        .find(|(name, _)| *name == fs_type)
        .map(|(_, flags)| *flags)
        .unwrap_or(&[])
}

fn toolset_hint(fs_type: &str) -> Option<&'static str> {
    TOOLSET_HINTS
        .iter()
        .find(|(name, _)| *name == fs_type)
        .map(|(_, package)| *package)
}

/// Apply a filesystem layout to an existing backing file.
pub fn format_image(image: &Path, fs_type: &str) -> Result<()> {
    let result = Cmd::new(&mkfs_command(fs_type))
        .args(force_flags(fs_type).iter().copied())
        .arg_path(image)
        .error_msg(&format!(
            "{} failed on {}",
            mkfs_command(fs_type),
            image.display()
        ))
        .run();

    match toolset_hint(fs_type) {
        Some(package) => result
            .with_context(|| format!("Hint: make sure {} is installed", package))
            .map(|_| ()),
        None => result.map(|_| ()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ext_family_uses_capital_f() {
        assert_eq!(force_flags("ext2"), &["-F"]);
        assert_eq!(force_flags("ext3"), &["-F"]);
        assert_eq!(force_flags("ext4"), &["-F"]);
    }

    #[test]
    fn test_xfs_and_btrfs_use_lowercase_f() {
        assert_eq!(force_flags("xfs"), &["-f"]);
        assert_eq!(force_flags("btrfs"), &["-f"]);
    }

    #[test]
    fn test_unknown_type_gets_no_flags() {
        assert!(force_flags("vfat").is_empty());
        assert!(force_flags("zfs").is_empty());
    }

    #[test]
    fn test_mkfs_command_name() {
        assert_eq!(mkfs_command("ext4"), "mkfs.ext4");
        assert_eq!(mkfs_command("xfs"), "mkfs.xfs");
    }

    #[test]
    fn test_failure_carries_toolset_hint() {
        // mkfs.ext4 on a nonexistent path fails regardless of environment;
        // the hint must ride along with the underlying error.
        if !crate::process::exists("mkfs.ext4") {
            return;
        }
        let err = format_image(Path::new("/nonexistent_path_12345/img"), "ext4").unwrap_err();
        assert!(format!("{:#}", err).contains("e2fsprogs"));
    }
}
