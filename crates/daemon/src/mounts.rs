//! Mount root inspection: volume discovery and stale mount cleanup.
//!
//! Removable media are auto-mounted as subdirectories of a single mount root.
//! A subdirectory counts as a volume only if the process can list and enter it.
//! Improper removal can leave behind directories nobody can access; those are
//! removed once at startup so they never look like a volume.

use nix::unistd::{access, AccessFlags};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{info, warn};

/// Error type for stale mount cleanup
#[derive(Debug, Error)]
pub enum CleanupError {
    /// Listing the mount root failed
    #[error("Failed to list mount root {path}: {source}")]
    ListFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The removal command could not be started
    #[error("Failed to run removal command: {0}")]
    Spawn(#[from] io::Error),

    /// The removal command exited with non-zero status
    #[error("Removal of {path} failed with exit code: {code:?}")]
    RemoveFailed { path: PathBuf, code: Option<i32> },
}

/// True if `path` is a directory this process can read and traverse.
pub fn is_accessible_dir(path: &Path) -> bool {
    path.is_dir() && access(path, AccessFlags::R_OK | AccessFlags::X_OK).is_ok()
}

/// Lists the usable volumes under `mount_root`, sorted by name.
pub fn list_volumes(mount_root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut volumes = Vec::new();
    for entry in std::fs::read_dir(mount_root)? {
        let path = entry?.path();
        if is_accessible_dir(&path) {
            volumes.push(path);
        }
    }
    volumes.sort();
    Ok(volumes)
}

/// Removes a stale mount directory.
pub trait MountRemover {
    fn remove(&self, path: &Path) -> Result<(), CleanupError>;
}

/// Removes directories with `sudo rm -r`, since stale mount points are
/// usually owned by root.
#[derive(Debug, Clone, Copy, Default)]
pub struct SudoRemover;

/// Build the privileged removal command for one directory.
pub fn build_remove_command(path: &Path) -> Command {
    let mut cmd = Command::new("sudo");
    cmd.arg("rm").arg("-r").arg(path);
    cmd
}

impl MountRemover for SudoRemover {
    fn remove(&self, path: &Path) -> Result<(), CleanupError> {
        let status = build_remove_command(path).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(CleanupError::RemoveFailed {
                path: path.to_path_buf(),
                code: status.code(),
            })
        }
    }
}

/// Directories handled by one cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

/// Removes every inaccessible directory under `mount_root`.
pub fn cleanup_stale_mounts<R: MountRemover>(
    mount_root: &Path,
    remover: &R,
) -> Result<CleanupSummary, CleanupError> {
    cleanup_stale_mounts_with(mount_root, is_accessible_dir, remover)
}

/// Like [`cleanup_stale_mounts`] with a custom accessibility check.
///
/// Only listing the mount root can fail; individual removal failures are
/// logged and recorded in the summary.
pub fn cleanup_stale_mounts_with<F, R>(
    mount_root: &Path,
    is_accessible: F,
    remover: &R,
) -> Result<CleanupSummary, CleanupError>
where
    F: Fn(&Path) -> bool,
    R: MountRemover,
{
    let entries = std::fs::read_dir(mount_root).map_err(|source| CleanupError::ListFailed {
        path: mount_root.to_path_buf(),
        source,
    })?;

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|path| path.is_dir())
        .collect();
    candidates.sort();

    let mut summary = CleanupSummary::default();
    for path in candidates {
        if is_accessible(&path) {
            continue;
        }

        warn!(
            path = %path.display(),
            "Stale or inaccessible mount detected, attempting to remove"
        );
        match remover.remove(&path) {
            Ok(()) => {
                info!(path = %path.display(), "Removed stale mount folder");
                summary.removed.push(path);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove stale mount folder");
                summary.failed.push(path);
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs::{self, File};
    use tempfile::TempDir;

    /// Remover double that records calls and fails for chosen names.
    #[derive(Default)]
    struct RecordingRemover {
        calls: RefCell<Vec<PathBuf>>,
        fail_for: Vec<&'static str>,
    }

    impl MountRemover for RecordingRemover {
        fn remove(&self, path: &Path) -> Result<(), CleanupError> {
            self.calls.borrow_mut().push(path.to_path_buf());
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if self.fail_for.iter().any(|f| *f == name) {
                return Err(CleanupError::RemoveFailed {
                    path: path.to_path_buf(),
                    code: Some(1),
                });
            }
            fs::remove_dir_all(path)?;
            Ok(())
        }
    }

    fn name_is_not(stale: &'static [&'static str]) -> impl Fn(&Path) -> bool {
        move |path: &Path| {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            !stale.iter().any(|s| *s == name)
        }
    }

    #[test]
    fn test_list_volumes_sorted_directories_only() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("diskB")).unwrap();
        fs::create_dir(root.path().join("diskA")).unwrap();
        File::create(root.path().join("not-a-volume")).unwrap();

        let volumes = list_volumes(root.path()).unwrap();
        assert_eq!(
            volumes,
            vec![root.path().join("diskA"), root.path().join("diskB")]
        );
    }

    #[test]
    fn test_list_volumes_missing_root_is_error() {
        let root = TempDir::new().unwrap();
        assert!(list_volumes(&root.path().join("absent")).is_err());
    }

    #[test]
    fn test_build_remove_command() {
        let cmd = build_remove_command(Path::new("/media/pi/STALE"));
        let args: Vec<String> = cmd
            .get_args()
            .filter_map(|a| a.to_str().map(String::from))
            .collect();
        assert_eq!(cmd.get_program(), "sudo");
        assert_eq!(args, vec!["rm", "-r", "/media/pi/STALE"]);
    }

    #[test]
    fn test_cleanup_removes_only_inaccessible_dirs() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("good")).unwrap();
        fs::create_dir(root.path().join("stale")).unwrap();
        File::create(root.path().join("stale-file")).unwrap();

        let remover = RecordingRemover::default();
        let summary = cleanup_stale_mounts_with(
            root.path(),
            name_is_not(&["stale", "stale-file"]),
            &remover,
        )
        .unwrap();

        assert_eq!(summary.removed, vec![root.path().join("stale")]);
        assert!(summary.failed.is_empty());
        assert_eq!(*remover.calls.borrow(), vec![root.path().join("stale")]);
        assert!(root.path().join("good").exists());
        assert!(!root.path().join("stale").exists());
    }

    #[test]
    fn test_cleanup_continues_after_failure() {
        let root = TempDir::new().unwrap();
        for name in ["a-stuck", "b-stale", "c-ok"] {
            fs::create_dir(root.path().join(name)).unwrap();
        }

        let remover = RecordingRemover {
            fail_for: vec!["a-stuck"],
            ..Default::default()
        };
        let summary =
            cleanup_stale_mounts_with(root.path(), name_is_not(&["a-stuck", "b-stale"]), &remover)
                .unwrap();

        assert_eq!(summary.failed, vec![root.path().join("a-stuck")]);
        assert_eq!(summary.removed, vec![root.path().join("b-stale")]);
        assert!(root.path().join("c-ok").exists());
    }

    #[test]
    fn test_cleanup_missing_root_is_error() {
        let root = TempDir::new().unwrap();
        let result = cleanup_stale_mounts(&root.path().join("absent"), &RecordingRemover::default());
        assert!(matches!(result, Err(CleanupError::ListFailed { .. })));
    }
}
