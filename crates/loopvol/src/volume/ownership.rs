//! Root ownership and permissions of a fresh volume.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use loopvol_common::{LeaseId, VolumeError, VolumeResult};

use super::{Volume, VolumeManager};

/// Suffix of the internal lease held while adjusting ownership.
pub const OWNERSHIP_LEASE: &str = "loopvol-ownership";

/// Requested owner and mode of a volume's root directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ownership {
    /// Owner user id.
    pub uid: Option<u32>,
    /// Owner group id.
    pub gid: Option<u32>,
    /// Permission bits, including setuid/setgid/sticky.
    pub mode: Option<u32>,
}

impl Ownership {
    /// Whether anything needs changing.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.uid.is_some() || self.gid.is_some() || self.effective_mode().is_some()
    }

    /// Mode to apply. Zero means "leave the mode alone".
    #[must_use]
    pub fn effective_mode(&self) -> Option<u32> {
        self.mode.filter(|mode| *mode > 0)
    }

    /// Apply the mode, then the owner, to `root`.
    ///
    /// # Errors
    ///
    /// Returns the failing `chmod`/`chown` error.
    pub fn apply_to(&self, root: &Path) -> std::io::Result<()> {
        if let Some(mode) = self.effective_mode() {
            std::fs::set_permissions(root, std::fs::Permissions::from_mode(mode))?;
        }
        if self.uid.is_some() || self.gid.is_some() {
            std::os::unix::fs::chown(root, self.uid, self.gid)?;
        }
        Ok(())
    }
}

/// Parse a lease being released.
///
/// Besides consumer ids this accepts the ownership lease, which stays behind
/// when the unmount after an adjustment fails.
pub(super) fn releasable_lease(lease: &str) -> VolumeResult<LeaseId> {
    let reserved = LeaseId::reserved(OWNERSHIP_LEASE);
    if lease == reserved.as_str() {
        Ok(reserved)
    } else {
        LeaseId::new(lease)
    }
}

/// Mount `volume` privately, adjust its root, then unmount it again.
///
/// Runs with the manager lock already held.
pub(super) fn adjust(
    manager: &VolumeManager,
    volume: &Volume,
    ownership: &Ownership,
) -> VolumeResult<()> {
    let lease = LeaseId::reserved(OWNERSHIP_LEASE);
    let failed = |reason: String| VolumeError::PermissionAdjustment {
        name: volume.name.to_string(),
        reason,
    };

    let root = manager
        .mount_locked(volume, &lease)
        .map_err(|e| failed(e.to_string()))?;

    tracing::debug!(
        volume = %volume.name,
        root = %root.display(),
        uid = ?ownership.uid,
        gid = ?ownership.gid,
        mode = ?ownership.effective_mode().map(|m| format!("{m:o}")),
        "Adjusting volume root"
    );

    let adjusted = ownership
        .apply_to(&root)
        .map_err(|e| failed(e.to_string()));
    let unmounted = manager.unmount_locked(volume, &lease);

    match (adjusted, unmounted) {
        (Err(err), Err(e)) => {
            tracing::warn!(
                volume = %volume.name,
                error = %e,
                "Failed to unmount volume after adjusting ownership"
            );
            Err(err)
        }
        (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
        (Ok(()), Ok(())) => Ok(()),
    }
}
