use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;

use fsify::context::ConversionRequest;
use fsify::{pipeline, preflight};

#[derive(Parser)]
#[command(
    name = "fsify",
    version,
    about = "Convert OCI container images into bootable filesystem images",
    after_help = "Requires root privileges for mount operations.\n\
                  EXAMPLES:\n\
                  \x20 sudo fsify nginx:latest\n\
                  \x20 sudo fsify -v --fs xfs -s 100 alpine:3.18\n\
                  \x20 sudo fsify -o my-image.img ubuntu:22.04\n\
                  \x20 sudo fsify --dual-output redis:7.0"
)]
struct Cli {
    /// Source image reference, e.g. nginx:latest
    image: String,

    /// Output file path (default: <image-name>.img)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Filesystem type for the image (ext4, xfs, btrfs)
    #[arg(long = "fs", default_value = "ext4")]
    fs_type: String,

    /// Extra space in MiB to add to the image
    /// (default: 50, auto-raised to 100 for images over 1 GiB)
    #[arg(short = 's', long = "size-buffer", value_name = "MIB")]
    buffer_mib: Option<u64>,

    /// Preallocate disk space instead of sparse allocation
    #[arg(long)]
    preallocate: bool,

    /// Also generate a squashfs image alongside the primary filesystem
    #[arg(long)]
    dual_output: bool,

    /// Verbose output with per-command details
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (minimal output, just the final path)
    #[arg(short, long)]
    quiet: bool,

    /// Disable colored progress output
    #[arg(long)]
    no_color: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if unsafe { libc::geteuid() } != 0 {
        bail!("fsify requires root privileges for mount operations. Run with sudo.");
    }

    preflight::check_host_tools(&cli.fs_type, cli.dual_output)?;

    let request = ConversionRequest {
        image_ref: cli.image.clone(),
        output: cli.output,
        fs_type: cli.fs_type.clone(),
        buffer_mib: cli.buffer_mib,
        preallocate: cli.preallocate,
        dual_output: cli.dual_output,
        verbose: cli.verbose,
        quiet: cli.quiet,
        no_color: cli.no_color,
    };

    if !cli.quiet {
        let format = if cli.dual_output {
            format!("{}+squashfs", cli.fs_type)
        } else {
            cli.fs_type.clone()
        };
        println!("Converting image '{}' to {} filesystem...", cli.image, format);
    }

    let conversion = pipeline::convert(request)?;

    if cli.quiet {
        println!("{}", conversion.image.display());
    } else {
        println!("Successfully created image: {}", conversion.image.display());
        if let Some(squashfs) = &conversion.squashfs {
            println!("Created squashfs image: {}", squashfs.display());
        }
    }

    Ok(())
}
