//! Standard filesystem paths for loopvol.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;

use crate::error::{VolumeError, VolumeResult};

/// Default directory holding volume backing files.
pub static LOOPVOL_DATA_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("LOOPVOL_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/loopvol"))
});

/// Default directory holding per-volume lease markers.
pub static LOOPVOL_STATE_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("LOOPVOL_STATE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/run/loopvol"))
});

/// Default directory under which volumes are mounted.
pub static LOOPVOL_MOUNT_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("LOOPVOL_MOUNT_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/mnt"))
});

/// On-disk layout of the volume store.
///
/// ```text
/// <data>/<name>            backing file
/// <state>/<name>/<lease>   lease markers
/// <mount>/<name>           mount point
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumePaths {
    /// Directory with backing files (default: /var/lib/loopvol).
    pub data: PathBuf,
    /// Directory with lease state (default: /run/loopvol).
    pub state: PathBuf,
    /// Directory with mount points (default: /mnt).
    pub mount: PathBuf,
}

impl VolumePaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths that all live below a single root.
    ///
    /// Handy for tests and rootless experiments.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            data: root.join("data"),
            state: root.join("state"),
            mount: root.join("mnt"),
        }
    }

    /// Backing file of a volume.
    #[must_use]
    pub fn data_file(&self, name: &str) -> PathBuf {
        self.data.join(name)
    }

    /// State directory of a volume.
    #[must_use]
    pub fn state_dir(&self, name: &str) -> PathBuf {
        self.state.join(name)
    }

    /// Lease marker of a volume.
    #[must_use]
    pub fn lease_file(&self, name: &str, lease: &str) -> PathBuf {
        self.state_dir(name).join(lease)
    }

    /// Mount point of a volume.
    #[must_use]
    pub fn mount_point(&self, name: &str) -> PathBuf {
        self.mount.join(name)
    }

    /// Check that every directory is specified as an absolute path.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Config`] naming the first offending directory.
    pub fn validate(&self) -> VolumeResult<()> {
        for (label, dir) in [
            ("data dir", &self.data),
            ("state dir", &self.state),
            ("mount dir", &self.mount),
        ] {
            check_absolute(label, dir)?;
        }
        Ok(())
    }
}

fn check_absolute(label: &str, dir: &Path) -> VolumeResult<()> {
    if dir.as_os_str().is_empty() {
        return Err(VolumeError::Config {
            message: format!("{label} is not specified"),
        });
    }
    if !dir.is_absolute() {
        return Err(VolumeError::Config {
            message: format!("{label} ({}) must be an absolute path", dir.display()),
        });
    }
    Ok(())
}

impl Default for VolumePaths {
    fn default() -> Self {
        Self {
            data: LOOPVOL_DATA_DIR.clone(),
            state: LOOPVOL_STATE_DIR.clone(),
            mount: LOOPVOL_MOUNT_DIR.clone(),
        }
    }
}
