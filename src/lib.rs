//! Convert OCI container images into bootable filesystem images.
//!
//! The pipeline pulls an image (skopeo), unpacks it into a flat rootfs
//! (umoci), then assembles a mountable disk image from that tree:
//!
//! - **image** - Size estimation, backing-file allocation, formatting
//! - **loopdev** - Loop device attach/detach, mount/unmount with retry
//! - **copy** - Rootfs replication with byte-accurate progress
//! - **oci** - Pull/unpack wrappers and config-blob embedding
//! - **cleanup** - Guaranteed teardown on completion and interruption
//! - **pipeline** - The ordered steps tying it all together
//!
//! Mounting a loop device requires root; everything else is unprivileged.
//!
//! # Example
//!
//! ```rust,ignore
//! use fsify::context::ConversionRequest;
//! use fsify::pipeline::convert;
//!
//! let request = ConversionRequest {
//!     image_ref: "alpine:3.18".to_string(),
//!     fs_type: "ext4".to_string(),
//!     ..Default::default()
//! };
//! let conversion = convert(request)?;
//! println!("{}", conversion.image.display());
//! ```

pub mod cleanup;
pub mod context;
pub mod copy;
pub mod image;
pub mod loopdev;
pub mod oci;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod squashfs;

pub use cleanup::CleanupCoordinator;
pub use context::{ConversionContext, ConversionRequest};
pub use pipeline::{convert, Conversion};
