//! Manager configuration.

use std::path::PathBuf;

use loopvol_common::{ByteSize, VolumePaths, VolumeResult};

/// Default size of volumes created without an explicit `size` option.
pub const DEFAULT_VOLUME_SIZE: ByteSize = ByteSize::gibibytes(1);

/// Configuration of a [`VolumeManager`](crate::volume::VolumeManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Store layout.
    pub paths: VolumePaths,
    /// Size used when a create request names none.
    pub default_size: ByteSize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            paths: VolumePaths::new(),
            default_size: DEFAULT_VOLUME_SIZE,
        }
    }
}

impl ManagerConfig {
    /// Keep every directory below `root`.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.paths = VolumePaths::with_root(root);
        self
    }

    /// Set the directory holding backing files.
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.paths.data = dir.into();
        self
    }

    /// Set the directory holding lease markers.
    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.paths.state = dir.into();
        self
    }

    /// Set the directory holding mount points.
    #[must_use]
    pub fn with_mount_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.paths.mount = dir.into();
        self
    }

    /// Set the default volume size.
    #[must_use]
    pub const fn with_default_size(mut self, size: ByteSize) -> Self {
        self.default_size = size;
        self
    }

    /// Check the configuration before use.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a directory is not absolute.
    pub fn validate(&self) -> VolumeResult<()> {
        self.paths.validate()
    }
}
