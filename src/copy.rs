//! Rootfs tree replication onto the mounted image.
//!
//! Two passes: the first sums regular-file bytes to size the progress bar,
//! the second walks and copies. Directories are mirrored, symlinks are
//! recreated by target string (never followed), regular files keep their
//! permission bits. Any I/O error aborts the whole copy with the offending
//! path; progress reporting is a side effect and never affects the copy.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::symlink;
use std::path::Path;
use walkdir::WalkDir;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Sum the byte size of all regular files under `root`.
///
/// Directories and symlink entries are excluded; the result is the exact
/// progress total for [`copy_tree`].
pub fn measure_copy_total(root: &Path) -> Result<u64> {
    let mut total = 0;

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if entry.file_type().is_file() {
            let meta = entry
                .metadata()
                .with_context(|| format!("Failed to stat {}", entry.path().display()))?;
            total += meta.len();
        }
    }

    Ok(total)
}

/// Build the byte-progress bar for the copy step.
///
/// Hidden in quiet mode, so the copy code can update it unconditionally.
pub fn byte_progress_bar(total: u64, quiet: bool, no_color: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let template = if no_color {
        "{msg} [{bar:30}] {bytes}/{total_bytes} ({bytes_per_sec})"
    } else {
        "{msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})"
    };
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::default_bar()
            .template(template)
            .expect("Invalid progress bar template")
            .progress_chars("=>-"),
    );
    bar.set_message("Copying files to image");
    bar
}

/// Replicate every entry under `source` into `dest`.
///
/// `dest` must exist (it is the mount point). Progress advances by exactly
/// the number of bytes written.
pub fn copy_tree(source: &Path, dest: &Path, progress: &ProgressBar) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", source.display()))?;
        let src_path = entry.path();

        let rel = src_path
            .strip_prefix(source)
            .with_context(|| format!("Walked path {} escapes source root", src_path.display()))?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let dest_path = dest.join(rel);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&dest_path).with_context(|| {
                format!("Failed to create directory {}", dest_path.display())
            })?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(src_path)
                .with_context(|| format!("Failed to read symlink {}", src_path.display()))?;
            symlink(&target, &dest_path).with_context(|| {
                format!(
                    "Failed to create symlink {} -> {}",
                    dest_path.display(),
                    target.display()
                )
            })?;
        } else {
            copy_file(src_path, &dest_path, progress)?;
        }
    }

    Ok(())
}

/// Copy one regular file, preserving its permission bits.
fn copy_file(src_path: &Path, dest_path: &Path, progress: &ProgressBar) -> Result<()> {
    let mut src = File::open(src_path)
        .with_context(|| format!("Failed to open source file {}", src_path.display()))?;
    let perms = src
        .metadata()
        .with_context(|| format!("Failed to stat {}", src_path.display()))?
        .permissions();

    let mut dst = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(dest_path)
        .with_context(|| format!("Failed to create destination file {}", dest_path.display()))?;

    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = src
            .read(&mut buf)
            .with_context(|| format!("Failed to read {}", src_path.display()))?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n])
            .with_context(|| format!("Failed to write {}", dest_path.display()))?;
        progress.inc(n as u64);
    }

    // Set bits after the copy; the open-time mode would be filtered by umask.
    fs::set_permissions(dest_path, perms)
        .with_context(|| format!("Failed to set permissions on {}", dest_path.display()))?;

    Ok(())
}
