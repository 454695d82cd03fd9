//! The volume entity.
//!
//! A [`Volume`] is a read-only snapshot derived from the backing file and its
//! sibling directories each time it is loaded. Nothing about a volume is kept
//! in memory between calls.

use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use loopvol_common::{VolumeError, VolumeName, VolumePaths, VolumeResult};
use once_cell::sync::OnceCell;
use serde::Serialize;

use super::lease::LeaseTracker;
use crate::filesystem::{Filesystem, detect};

/// A file-backed volume.
#[derive(Debug, Clone)]
pub struct Volume {
    /// Volume name.
    pub name: VolumeName,
    /// Backing file holding the filesystem image.
    pub data_file: PathBuf,
    /// Logical size: the backing file's length.
    pub max_size_bytes: u64,
    /// Physical size: blocks consumed by the backing file.
    pub allocated_size_bytes: u64,
    /// Directory holding the volume's lease markers.
    pub state_dir: PathBuf,
    /// Where the volume is (or would be) mounted.
    pub mount_point: PathBuf,
    /// Last modification of the backing file, used as creation time.
    pub created_at: DateTime<Utc>,
    filesystem: OnceCell<Filesystem>,
}

impl Volume {
    /// Derive a volume from the store layout.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::NotFound`] unless the backing file exists and is
    /// a regular file.
    pub fn load(paths: &VolumePaths, name: &VolumeName) -> VolumeResult<Self> {
        let data_file = paths.data_file(name.as_str());

        let meta = match std::fs::metadata(&data_file) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VolumeError::NotFound {
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if !meta.is_file() {
            tracing::debug!(
                path = %data_file.display(),
                "Data path exists but is not a regular file"
            );
            return Err(VolumeError::NotFound {
                name: name.to_string(),
            });
        }

        Ok(Self {
            name: name.clone(),
            max_size_bytes: meta.len(),
            allocated_size_bytes: meta.blocks() * 512,
            state_dir: paths.state_dir(name.as_str()),
            mount_point: paths.mount_point(name.as_str()),
            created_at: DateTime::<Utc>::from(meta.modified()?),
            data_file,
            filesystem: OnceCell::new(),
        })
    }

    /// Filesystem stored in the backing file.
    ///
    /// Detected from the content on first use and remembered for the
    /// lifetime of this value.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::UnrecognizedFilesystem`] if the content carries no
    /// supported signature.
    pub fn filesystem(&self) -> VolumeResult<Filesystem> {
        self.filesystem
            .get_or_try_init(|| {
                detect(&self.data_file)?.ok_or_else(|| VolumeError::UnrecognizedFilesystem {
                    path: self.data_file.clone(),
                })
            })
            .copied()
    }

    /// Lease bookkeeping for this volume.
    #[must_use]
    pub fn leases(&self) -> LeaseTracker<'_> {
        LeaseTracker::new(self.name.as_str(), &self.state_dir)
    }

    /// Summary in the shape container engines expect from a volume driver.
    ///
    /// Content without a known signature is reported with no `fs`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the backing file cannot be read.
    pub fn status(&self) -> VolumeResult<VolumeStatus> {
        let fs = match self.filesystem() {
            Ok(fs) => Some(fs),
            Err(VolumeError::UnrecognizedFilesystem { .. }) => None,
            Err(e) => return Err(e),
        };

        Ok(VolumeStatus {
            name: self.name.to_string(),
            created_at: self.created_at.to_rfc3339(),
            mountpoint: self.mount_point.clone(),
            status: StatusDetails {
                fs,
                size_max: self.max_size_bytes.to_string(),
                size_allocated: self.allocated_size_bytes.to_string(),
            },
        })
    }
}

/// Serializable description of a volume.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeStatus {
    /// Volume name.
    pub name: String,
    /// RFC 3339 timestamp.
    pub created_at: String,
    /// Mount point path.
    pub mountpoint: PathBuf,
    /// Driver specific details.
    pub status: StatusDetails,
}

/// Driver specific part of [`VolumeStatus`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct StatusDetails {
    /// Filesystem type, if recognized.
    pub fs: Option<Filesystem>,
    /// Logical size in bytes.
    pub size_max: String,
    /// Allocated size in bytes.
    pub size_allocated: String,
}
