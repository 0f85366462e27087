//! Preflight checks for conversion prerequisites.
//!
//! Validates that the host has every external tool the pipeline will
//! invoke before any work starts. All missing tools are reported together,
//! not just the first, so one failed run is enough to fix the host.

use anyhow::{bail, Result};

/// Host tools required for every conversion.
///
/// Each tuple is (command_name, package_name).
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("skopeo", "skopeo"),
    ("umoci", "umoci"),
    ("losetup", "util-linux"),
    ("mount", "util-linux"),
    ("umount", "util-linux"),
];

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Check that specific tools are available.
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err` listing every missing tool and its package
pub fn check_required_tools(tools: &[(String, String)]) -> Result<()> {
    let mut missing = Vec::new();

    for (tool, package) in tools {
        if !command_exists(tool) {
            missing.push(format!("  {} (install: {})", tool, package));
        }
    }

    if !missing.is_empty() {
        bail!(
            "Missing required host tools:\n{}\n\n{}",
            missing.join("\n"),
            install_hint()
        );
    }

    Ok(())
}

/// Check everything a conversion with the given options will invoke.
///
/// Adds the filesystem-specific mkfs tool, and mksquashfs when a
/// dual-output run was requested.
pub fn check_host_tools(fs_type: &str, dual_output: bool) -> Result<()> {
    let mut tools: Vec<(String, String)> = REQUIRED_TOOLS
        .iter()
        .map(|(tool, package)| (tool.to_string(), package.to_string()))
        .collect();

    tools.push((
        crate::image::format::mkfs_command(fs_type),
        mkfs_package(fs_type),
    ));

    if dual_output {
        tools.push(("mksquashfs".to_string(), "squashfs-tools".to_string()));
    }

    check_required_tools(&tools)
}

fn mkfs_package(fs_type: &str) -> String {
    match fs_type {
        "ext2" | "ext3" | "ext4" => "e2fsprogs".to_string(),
        "xfs" => "xfsprogs".to_string(),
        "btrfs" => "btrfs-progs".to_string(),
        other => format!("{}-progs", other),
    }
}

fn install_hint() -> &'static str {
    "Install them first. For example:\n\
     \x20 Debian/Ubuntu: sudo apt-get install skopeo umoci util-linux e2fsprogs\n\
     \x20 Fedora/RHEL:   sudo dnf install skopeo umoci util-linux e2fsprogs\n\
     For additional filesystems: xfsprogs, btrfs-progs"
}
