//! Loop device attach/detach and mount/unmount.
//!
//! Release operations are idempotent: "already unmounted" and "already
//! detached" count as success. Both the happy path and interrupt-driven
//! cleanup call them, and at interruption time the exact mount/attach
//! state is not perfectly known.

use crate::process::Cmd;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Unmount attempts before giving up on a busy target.
const UNMOUNT_ATTEMPTS: u32 = 5;

/// Delay between unmount attempts. Async writeback can keep a freshly
/// written filesystem busy for a moment.
const UNMOUNT_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Attach a backing file to a free loop device, returning the device path.
///
/// There is no fallback: no free devices, a busy file, or missing
/// permissions fail the whole pipeline.
pub fn attach(image: &Path) -> Result<PathBuf> {
    let result = Cmd::new("losetup")
        .args(["--find", "--show"])
        .arg_path(image)
        .error_msg(&format!(
            "Failed to attach {} to a loop device",
            image.display()
        ))
        .run()?;

    let device = result.stdout.trim();
    if device.is_empty() {
        bail!("losetup did not return a device path for {}", image.display());
    }
    Ok(PathBuf::from(device))
}

/// Mount an attached loop device at the target directory.
///
/// The target must already exist and be empty. A failure here leaves the
/// loop device attached; the cleanup coordinator detaches it.
pub fn mount(device: &Path, mount_point: &Path) -> Result<()> {
    Cmd::new("mount")
        .arg_path(device)
        .arg_path(mount_point)
        .error_msg(&format!(
            "Failed to mount {} at {}",
            device.display(),
            mount_point.display()
        ))
        .run()
        .map(|_| ())
}

/// Unmount the target directory, retrying while it is transiently busy.
///
/// Succeeds without error when the target is already unmounted.
pub fn unmount(mount_point: &Path) -> Result<()> {
    let mut last_stderr = String::new();

    for attempt in 0..UNMOUNT_ATTEMPTS {
        if attempt > 0 {
            thread::sleep(UNMOUNT_RETRY_DELAY);
        }

        let result = Cmd::new("umount")
            .arg_path(mount_point)
            .allow_fail()
            .run()
            .context("Failed to run umount")?;

        if result.success() || is_not_mounted(&result.stderr) {
            return Ok(());
        }
        last_stderr = result.stderr;
    }

    bail!(
        "Failed to unmount {} after {} attempts: {}",
        mount_point.display(),
        UNMOUNT_ATTEMPTS,
        last_stderr.trim()
    );
}

/// Detach a loop device. Succeeds without error when already detached.
pub fn detach(device: &Path) -> Result<()> {
    let result = Cmd::new("losetup")
        .arg("-d")
        .arg_path(device)
        .allow_fail()
        .run()
        .context("Failed to run losetup -d")?;

    if result.success() || is_not_attached(&result.stderr) {
        return Ok(());
    }

    bail!(
        "Failed to detach loop device {}: {}",
        device.display(),
        result.stderr.trim()
    );
}

/// Does this umount error mean the target is already unmounted?
fn is_not_mounted(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("not mounted") || stderr.contains("no mount point specified")
}

/// Does this losetup error mean the device is already detached?
fn is_not_attached(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("no such device") || stderr.contains("no such file or directory")
}
