//! Guaranteed teardown of mounts, loop devices, and the working directory.
//!
//! Two triggers converge on [`CleanupCoordinator::teardown`]: the pipeline's
//! completion path (success or failure) and the termination-signal handler.
//! Teardown takes each recorded resource out of the shared state before
//! releasing it, and the release operations themselves are idempotent, so
//! whichever trigger runs first does the real work and the other finds
//! nothing left to do.

use crate::loopdev;
use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct CleanupState {
    mount_point: Option<PathBuf>,
    loop_device: Option<PathBuf>,
    work_dir: Option<PathBuf>,
}

/// Process-wide cleanup state for one conversion run.
///
/// Cloning shares the underlying state; the signal handler holds a clone.
#[derive(Clone, Default)]
pub struct CleanupCoordinator {
    state: Arc<Mutex<CleanupState>>,
}

impl CleanupCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CleanupState> {
        // A panic while holding the lock must not block teardown.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record the working directory for removal at teardown.
    pub fn register_work_dir(&self, path: &Path) {
        self.lock().work_dir = Some(path.to_path_buf());
    }

    /// Record an established mount for unmounting at teardown.
    pub fn register_mount(&self, path: &Path) {
        self.lock().mount_point = Some(path.to_path_buf());
    }

    /// Record an attached loop device for detaching at teardown.
    pub fn register_loop_device(&self, path: &Path) {
        self.lock().loop_device = Some(path.to_path_buf());
    }

    /// Forget the mount after the pipeline has unmounted it itself.
    pub fn clear_mount(&self) {
        self.lock().mount_point = None;
    }

    /// Forget the loop device after the pipeline has detached it itself.
    pub fn clear_loop_device(&self) {
        self.lock().loop_device = None;
    }

    /// Release everything still recorded: unmount, detach, remove workdir.
    ///
    /// Idempotent; failures are reported to stderr but never propagate,
    /// since teardown runs on paths where a better error already exists.
    pub fn teardown(&self) {
        let (mount_point, loop_device, work_dir) = {
            let mut state = self.lock();
            (
                state.mount_point.take(),
                state.loop_device.take(),
                state.work_dir.take(),
            )
        };

        if let Some(mount_point) = mount_point {
            if let Err(err) = loopdev::unmount(&mount_point) {
                eprintln!("Warning: failed to unmount {}: {}", mount_point.display(), err);
            }
        }

        if let Some(device) = loop_device {
            if let Err(err) = loopdev::detach(&device) {
                eprintln!(
                    "Warning: failed to detach loop device {}: {}",
                    device.display(),
                    err
                );
            }
        }

        if let Some(work_dir) = work_dir {
            if let Err(err) = fs::remove_dir_all(&work_dir) {
                eprintln!(
                    "Warning: failed to remove work dir {}: {}",
                    work_dir.display(),
                    err
                );
            }
        }
    }

    /// Run teardown on SIGINT/SIGTERM, then exit non-zero.
    ///
    /// Installable once per process; one conversion runs per process.
    pub fn install_signal_handler(&self) -> Result<()> {
        let coordinator = self.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nInterrupt received, cleaning up...");
            coordinator.teardown();
            std::process::exit(130);
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teardown_removes_work_dir() {
        let dir = tempfile::tempdir().unwrap().keep();
        let coordinator = CleanupCoordinator::new();
        coordinator.register_work_dir(&dir);

        coordinator.teardown();
        assert!(!dir.exists());
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let dir = tempfile::tempdir().unwrap().keep();
        let coordinator = CleanupCoordinator::new();
        coordinator.register_work_dir(&dir);

        coordinator.teardown();
        // Second call finds nothing recorded and must not error or warn.
        coordinator.teardown();
        assert!(!dir.exists());
    }

    #[test]
    fn test_cleared_resources_are_skipped() {
        let dir = tempfile::tempdir().unwrap().keep();
        let coordinator = CleanupCoordinator::new();
        coordinator.register_work_dir(&dir);
        coordinator.register_mount(Path::new("/nonexistent/mnt"));
        coordinator.register_loop_device(Path::new("/dev/loop999"));
        coordinator.clear_mount();
        coordinator.clear_loop_device();

        // Only the work dir remains recorded; teardown must not touch
        // mount or loop state.
        coordinator.teardown();
        assert!(!dir.exists());
    }

    #[test]
    fn test_clones_share_state() {
        let dir = tempfile::tempdir().unwrap().keep();
        let coordinator = CleanupCoordinator::new();
        let handler_view = coordinator.clone();
        coordinator.register_work_dir(&dir);

        handler_view.teardown();
        assert!(!dir.exists());
    }
}
