//! Conversion state shared across pipeline steps.

use std::path::PathBuf;

/// Caller-facing configuration for one conversion.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    /// Source image reference, e.g. "nginx:latest".
    pub image_ref: String,
    /// Explicit output path. `None` derives the name from the image ref.
    pub output: Option<PathBuf>,
    /// Filesystem type for the image (ext4, xfs, btrfs, ...).
    pub fs_type: String,
    /// Extra space in MiB added on top of the measured rootfs size.
    /// `None` means the default buffer, which may auto-escalate for
    /// large images; an explicit value never does.
    pub buffer_mib: Option<u64>,
    /// Reserve backing storage up front instead of sparse allocation.
    pub preallocate: bool,
    /// Also produce a squashfs companion image.
    pub dual_output: bool,
    pub verbose: bool,
    pub quiet: bool,
    pub no_color: bool,
}

impl Default for ConversionRequest {
    fn default() -> Self {
        Self {
            image_ref: String::new(),
            output: None,
            fs_type: "ext4".to_string(),
            buffer_mib: None,
            preallocate: false,
            dual_output: false,
            verbose: false,
            quiet: false,
            no_color: false,
        }
    }
}

/// All state for one conversion run.
///
/// Created once per invocation, mutated by pipeline steps as their outputs
/// become known. `loop_device` is `Some` exactly while a loop device is
/// attached to the backing file.
pub struct ConversionContext {
    /// Working directory, owned exclusively by this run.
    pub work_dir: PathBuf,
    /// Raw OCI layout pulled by skopeo.
    pub oci_layout: PathBuf,
    /// Unpacked image tree (contains a `rootfs/` subdirectory).
    pub unpacked: PathBuf,
    /// Backing image file inside the work dir.
    pub image_path: PathBuf,
    /// Squashfs companion inside the work dir (dual-output only).
    pub squashfs_path: PathBuf,
    /// Mount target for the formatted image.
    pub mount_point: PathBuf,
    /// Currently attached loop device, `None` while detached.
    pub loop_device: Option<PathBuf>,
    /// Final destination for the primary image.
    pub final_image: PathBuf,
    /// Final destination for the squashfs companion (dual-output only).
    pub final_squashfs: Option<PathBuf>,
    pub request: ConversionRequest,
}

impl ConversionContext {
    /// Lay out the fixed-name paths inside a fresh working directory.
    pub fn new(request: ConversionRequest, work_dir: PathBuf) -> Self {
        let final_image = match &request.output {
            Some(path) => path.clone(),
            None => PathBuf::from(derived_image_name(&request.image_ref)),
        };
        let final_squashfs = request
            .dual_output
            .then(|| final_image.with_extension("squashfs"));

        Self {
            oci_layout: work_dir.join("oci-layout"),
            unpacked: work_dir.join("unpacked-rootfs"),
            image_path: work_dir.join("fs-image.img"),
            squashfs_path: work_dir.join("fs-image.squashfs"),
            mount_point: work_dir.join("mnt"),
            loop_device: None,
            final_image,
            final_squashfs,
            work_dir,
            request,
        }
    }

    /// The actual root filesystem tree to copy into the image.
    ///
    /// umoci unpacks into `<unpacked>/rootfs`; the layout root also holds
    /// umoci metadata that must not end up in the image.
    pub fn rootfs_dir(&self) -> PathBuf {
        self.unpacked.join("rootfs")
    }
}

/// Derive the default output filename from an image reference:
/// the last path segment with colons normalized to hyphens, plus ".img".
/// "docker.io/library/nginx:latest" becomes "nginx-latest.img".
pub fn derived_image_name(image_ref: &str) -> String {
    let last = image_ref.rsplit('/').next().unwrap_or(image_ref);
    format!("{}.img", last.replace(':', "-"))
}
