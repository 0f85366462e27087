//! OCI image acquisition and metadata embedding.
//!
//! Pulling and unpacking are thin wrappers over skopeo and umoci; this
//! crate never parses layers itself. The one piece of OCI metadata handled
//! natively is the image config blob, embedded into the rootfs so
//! downstream tooling can recover entrypoint/env information from the
//! booted image.

use crate::process::Cmd;
use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Where the image config blob lands inside the rootfs.
pub const EMBEDDED_CONFIG_PATH: &str = "etc/fsify-entrypoint";

#[derive(Deserialize)]
struct OciIndex {
    #[serde(default)]
    manifests: Vec<OciManifest>,
}

#[derive(Deserialize)]
struct OciManifest {
    config: Option<OciDescriptor>,
}

#[derive(Deserialize)]
struct OciDescriptor {
    #[serde(default)]
    digest: String,
}

/// Pull the source image into an OCI layout directory.
///
/// Tries the local Docker daemon first to avoid a network round-trip for
/// images that are already present, then falls back to the remote
/// registry. Verbose mode streams the registry pull's own progress output.
pub fn pull_image(image_ref: &str, layout: &Path, verbose: bool) -> Result<()> {
    let oci_dest = format!("oci:{}:latest", layout.display());

    let daemon = Cmd::new("skopeo")
        .arg("copy")
        .arg(format!("docker-daemon:{}", image_ref))
        .arg(oci_dest.clone())
        .allow_fail()
        .run()?;
    if daemon.success() {
        return Ok(());
    }

    let registry = Cmd::new("skopeo")
        .arg("copy")
        .arg(format!("docker://{}", image_ref))
        .arg(oci_dest)
        .error_msg(&format!("Failed to pull image '{}'", image_ref));
    if verbose {
        registry.run_interactive()
    } else {
        registry.run().map(|_| ())
    }
}

/// Unpack the OCI layout into a flat tree with a `rootfs/` subdirectory.
pub fn unpack_image(layout: &Path, unpacked: &Path, verbose: bool) -> Result<()> {
    let unpack = Cmd::new("umoci")
        .args(["unpack", "--image"])
        .arg(format!("{}:latest", layout.display()))
        .arg_path(unpacked)
        .error_msg("umoci unpack failed");
    if verbose {
        unpack.run_interactive()
    } else {
        unpack.run().map(|_| ())
    }
}

/// Best-effort: copy the image's config blob into the rootfs.
///
/// Follows index.json to the first manifest's config digest and resolves
/// it against the layout's blob store. Absent or malformed metadata at any
/// point in that chain means "no metadata available", not an error; the
/// returned `Option` is the only signal.
pub fn embed_config(layout: &Path, rootfs: &Path) -> Option<PathBuf> {
    let index_data = fs::read(layout.join("index.json")).ok()?;
    let index: OciIndex = serde_json::from_slice(&index_data).ok()?;

    let digest = &index.manifests.first()?.config.as_ref()?.digest;
    let hex = digest.strip_prefix("sha256:")?;
    if hex.is_empty() {
        return None;
    }

    let blob = layout.join("blobs/sha256").join(hex);
    if !blob.is_file() {
        return None;
    }

    let dest = rootfs.join(EMBEDDED_CONFIG_PATH);
    fs::create_dir_all(dest.parent()?).ok()?;
    fs::copy(&blob, &dest).ok()?;
    Some(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout_with_index(index_json: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.json"), index_json).unwrap();
        dir
    }

    #[test]
    fn test_missing_index_is_not_found() {
        let layout = tempfile::tempdir().unwrap();
        let rootfs = tempfile::tempdir().unwrap();
        assert!(embed_config(layout.path(), rootfs.path()).is_none());
    }

    #[test]
    fn test_malformed_index_is_not_found() {
        let layout = layout_with_index("{not json");
        let rootfs = tempfile::tempdir().unwrap();
        assert!(embed_config(layout.path(), rootfs.path()).is_none());
    }

    #[test]
    fn test_empty_manifest_list_is_not_found() {
        let layout = layout_with_index(r#"{"manifests": []}"#);
        let rootfs = tempfile::tempdir().unwrap();
        assert!(embed_config(layout.path(), rootfs.path()).is_none());
    }

    #[test]
    fn test_unknown_digest_scheme_is_not_found() {
        let layout = layout_with_index(
            r#"{"manifests": [{"config": {"digest": "md5:abcdef"}}]}"#,
        );
        let rootfs = tempfile::tempdir().unwrap();
        assert!(embed_config(layout.path(), rootfs.path()).is_none());
    }

    #[test]
    fn test_missing_blob_is_not_found() {
        let layout = layout_with_index(
            r#"{"manifests": [{"config": {"digest": "sha256:deadbeef"}}]}"#,
        );
        let rootfs = tempfile::tempdir().unwrap();
        assert!(embed_config(layout.path(), rootfs.path()).is_none());
    }

    #[test]
    fn test_config_blob_is_embedded() {
        let layout = layout_with_index(
            r#"{"manifests": [{"config": {"digest": "sha256:deadbeef"}}]}"#,
        );
        let blobs = layout.path().join("blobs/sha256");
        fs::create_dir_all(&blobs).unwrap();
        fs::write(blobs.join("deadbeef"), br#"{"Entrypoint": ["/bin/sh"]}"#).unwrap();

        let rootfs = tempfile::tempdir().unwrap();
        let embedded = embed_config(layout.path(), rootfs.path()).unwrap();

        assert_eq!(embedded, rootfs.path().join(EMBEDDED_CONFIG_PATH));
        assert_eq!(
            fs::read(embedded).unwrap(),
            br#"{"Entrypoint": ["/bin/sh"]}"#
        );
    }
}
