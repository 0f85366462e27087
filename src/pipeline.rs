//! The conversion pipeline: ordered steps from image reference to
//! formatted, populated disk image.
//!
//! Steps run strictly in order on one thread. The first failure stops the
//! sequence, wrapped with the failing step's label; cleanup runs on every
//! exit path via [`CleanupCoordinator`]. Partial artifacts live only in the
//! working directory and are discarded with it; nothing appears at the
//! final output path until the pipeline has fully succeeded.

use crate::cleanup::CleanupCoordinator;
use crate::context::{ConversionContext, ConversionRequest};
use crate::{copy, image, loopdev, oci, squashfs};
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Result of a successful conversion.
///
/// The primary image is always present; the squashfs companion only in
/// dual-output mode. Callers needing the companion get its real path here
/// instead of re-deriving the naming convention.
pub struct Conversion {
    pub image: PathBuf,
    pub squashfs: Option<PathBuf>,
}

type StepFn = fn(&mut ConversionContext, &CleanupCoordinator) -> Result<()>;

struct Step {
    label: &'static str,
    run: StepFn,
}

/// Run the full conversion for `request`.
///
/// Creates the working directory, installs the termination-signal handler,
/// runs every step, moves outputs to their final paths, and tears down
/// mounts, loop devices, and the working directory no matter how the run
/// ends.
pub fn convert(request: ConversionRequest) -> Result<Conversion> {
    let work_dir = tempfile::Builder::new()
        .prefix("fsify-")
        .tempdir()
        .context("Failed to create working directory")?
        .keep();

    let mut ctx = ConversionContext::new(request, work_dir);
    let coordinator = CleanupCoordinator::new();
    coordinator.register_work_dir(&ctx.work_dir);
    coordinator.install_signal_handler()?;

    let result = (|| {
        prepare_dirs(&ctx)?;
        run_steps(&steps(ctx.request.dual_output), &mut ctx, &coordinator)?;
        finalize(&ctx)
    })();

    coordinator.teardown();
    result
}

fn prepare_dirs(ctx: &ConversionContext) -> Result<()> {
    for dir in [&ctx.oci_layout, &ctx.unpacked, &ctx.mount_point] {
        fs::create_dir(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }
    Ok(())
}

fn steps(dual_output: bool) -> Vec<Step> {
    let mut steps = vec![
        Step { label: "Downloading OCI image", run: step_pull },
        Step { label: "Unpacking image layers", run: step_unpack },
        Step { label: "Extracting OCI config", run: step_embed_config },
        Step { label: "Calculating disk size", run: step_allocate },
        Step { label: "Creating filesystem", run: step_format },
        Step { label: "Mounting image", run: step_mount },
        Step { label: "Copying files to image", run: step_copy },
        Step { label: "Unmounting image", run: step_unmount },
    ];
    if dual_output {
        steps.push(Step {
            label: "Creating squashfs image",
            run: step_squashfs,
        });
    }
    steps
}

fn run_steps(
    steps: &[Step],
    ctx: &mut ConversionContext,
    coordinator: &CleanupCoordinator,
) -> Result<()> {
    for step in steps {
        if !ctx.request.quiet {
            println!("{}...", step.label);
        }
        (step.run)(ctx, coordinator).with_context(|| format!("step '{}' failed", step.label))?;
    }
    Ok(())
}

fn step_pull(ctx: &mut ConversionContext, _: &CleanupCoordinator) -> Result<()> {
    oci::pull_image(
        &ctx.request.image_ref,
        &ctx.oci_layout,
        ctx.request.verbose,
    )
}

fn step_unpack(ctx: &mut ConversionContext, _: &CleanupCoordinator) -> Result<()> {
    oci::unpack_image(&ctx.oci_layout, &ctx.unpacked, ctx.request.verbose)?;
    if !ctx.rootfs_dir().is_dir() {
        bail!(
            "umoci did not produce a rootfs directory at {}",
            ctx.rootfs_dir().display()
        );
    }
    Ok(())
}

fn step_embed_config(ctx: &mut ConversionContext, _: &CleanupCoordinator) -> Result<()> {
    // Best-effort enrichment; absence of metadata is a normal outcome.
    match oci::embed_config(&ctx.oci_layout, &ctx.rootfs_dir()) {
        Some(path) if ctx.request.verbose => {
            println!("  Embedded image config at {}", path.display());
        }
        _ => {}
    }
    Ok(())
}

fn step_allocate(ctx: &mut ConversionContext, _: &CleanupCoordinator) -> Result<()> {
    let source_kib = image::measure_dir_kib(&ctx.unpacked)?;
    let total_kib = image::estimate_total_kib(source_kib, ctx.request.buffer_mib);
    let total_bytes = total_kib * 1024;

    if ctx.request.verbose {
        println!(
            "  Rootfs: {} KiB, total image size: {} KiB",
            source_kib, total_kib
        );
    }

    let mode = if ctx.request.preallocate {
        image::AllocationMode::Preallocated
    } else {
        image::AllocationMode::Sparse
    };
    image::allocate_image(&ctx.image_path, total_bytes, mode)
}

fn step_format(ctx: &mut ConversionContext, _: &CleanupCoordinator) -> Result<()> {
    image::format_image(&ctx.image_path, &ctx.request.fs_type)
}

fn step_mount(ctx: &mut ConversionContext, coordinator: &CleanupCoordinator) -> Result<()> {
    let device = loopdev::attach(&ctx.image_path)?;
    // Record before mounting: a failed mount must still detach the device.
    coordinator.register_loop_device(&device);
    ctx.loop_device = Some(device.clone());

    if ctx.request.verbose {
        println!("  Attached image to loop device {}", device.display());
    }

    loopdev::mount(&device, &ctx.mount_point)?;
    coordinator.register_mount(&ctx.mount_point);
    Ok(())
}

fn step_copy(ctx: &mut ConversionContext, _: &CleanupCoordinator) -> Result<()> {
    let rootfs = ctx.rootfs_dir();
    let total = copy::measure_copy_total(&rootfs)?;
    let bar = copy::byte_progress_bar(total, ctx.request.quiet, ctx.request.no_color);
    copy::copy_tree(&rootfs, &ctx.mount_point, &bar)?;
    bar.finish();
    Ok(())
}

fn step_unmount(ctx: &mut ConversionContext, coordinator: &CleanupCoordinator) -> Result<()> {
    loopdev::unmount(&ctx.mount_point)?;
    coordinator.clear_mount();

    if let Some(device) = ctx.loop_device.take() {
        loopdev::detach(&device)?;
    }
    coordinator.clear_loop_device();
    Ok(())
}

fn step_squashfs(ctx: &mut ConversionContext, _: &CleanupCoordinator) -> Result<()> {
    squashfs::create_squashfs(&ctx.rootfs_dir(), &ctx.squashfs_path)
}

/// Move outputs from the working directory to their final locations.
///
/// A failure here is fatal even after a fully successful pipeline: without
/// the move, the output is not at its advertised path.
fn finalize(ctx: &ConversionContext) -> Result<Conversion> {
    move_output(&ctx.image_path, &ctx.final_image)?;

    let squashfs = match &ctx.final_squashfs {
        Some(dest) => {
            move_output(&ctx.squashfs_path, dest)?;
            Some(dest.clone())
        }
        None => None,
    };

    let image = fs::canonicalize(&ctx.final_image)
        .with_context(|| format!("Failed to resolve {}", ctx.final_image.display()))?;
    Ok(Conversion { image, squashfs })
}

fn move_output(src: &Path, dest: &Path) -> Result<()> {
    fs::rename(src, dest)
        .or_else(|_| {
            // Cross-filesystem: copy then remove
            fs::copy(src, dest)?;
            fs::remove_file(src)?;
            Ok::<(), std::io::Error>(())
        })
        .with_context(|| format!("Failed to move output to {}", dest.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_context() -> ConversionContext {
        let work_dir = tempfile::tempdir().unwrap().keep();
        let request = ConversionRequest {
            image_ref: "test:latest".to_string(),
            quiet: true,
            ..Default::default()
        };
        ConversionContext::new(request, work_dir)
    }

    fn touch_a(ctx: &mut ConversionContext, _: &CleanupCoordinator) -> Result<()> {
        fs::write(ctx.work_dir.join("a"), b"")?;
        Ok(())
    }

    fn always_fails(_: &mut ConversionContext, _: &CleanupCoordinator) -> Result<()> {
        bail!("boom");
    }

    fn touch_c(ctx: &mut ConversionContext, _: &CleanupCoordinator) -> Result<()> {
        fs::write(ctx.work_dir.join("c"), b"")?;
        Ok(())
    }

    #[test]
    fn test_halts_at_first_failing_step() {
        let mut ctx = test_context();
        let coordinator = CleanupCoordinator::new();
        coordinator.register_work_dir(&ctx.work_dir);

        let steps = [
            Step { label: "A", run: touch_a },
            Step { label: "B", run: always_fails },
            Step { label: "C", run: touch_c },
        ];

        let err = run_steps(&steps, &mut ctx, &coordinator).unwrap_err();
        assert!(err.to_string().contains("step 'B' failed"));
        assert!(ctx.work_dir.join("a").exists());
        assert!(!ctx.work_dir.join("c").exists());

        // Cleanup still runs after the failure and discards partial output.
        coordinator.teardown();
        assert!(!ctx.work_dir.exists());
    }

    #[test]
    fn test_all_steps_run_on_success() {
        let mut ctx = test_context();
        let coordinator = CleanupCoordinator::new();
        coordinator.register_work_dir(&ctx.work_dir);

        let steps = [
            Step { label: "A", run: touch_a },
            Step { label: "C", run: touch_c },
        ];

        run_steps(&steps, &mut ctx, &coordinator).unwrap();
        assert!(ctx.work_dir.join("a").exists());
        assert!(ctx.work_dir.join("c").exists());
        coordinator.teardown();
    }

    #[test]
    fn test_step_order_matches_pipeline_contract() {
        let labels: Vec<&str> = steps(false).iter().map(|s| s.label).collect();
        assert_eq!(
            labels,
            [
                "Downloading OCI image",
                "Unpacking image layers",
                "Extracting OCI config",
                "Calculating disk size",
                "Creating filesystem",
                "Mounting image",
                "Copying files to image",
                "Unmounting image",
            ]
        );

        let dual: Vec<&str> = steps(true).iter().map(|s| s.label).collect();
        assert_eq!(dual.last(), Some(&"Creating squashfs image"));
    }

    #[test]
    fn test_move_output_across_rename_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.img");
        let dest = dir.path().join("dest.img");
        fs::write(&src, b"image-bytes").unwrap();

        move_output(&src, &dest).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"image-bytes");
    }

    #[test]
    fn test_move_output_missing_source_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = move_output(
            &dir.path().join("missing.img"),
            &dir.path().join("dest.img"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("Failed to move output"));
    }
}
