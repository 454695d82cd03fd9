//! Lease markers.
//!
//! Every consumer that needs a volume mounted owns one empty marker file in
//! the volume's state directory. The set of markers is the reference count:
//! there is no in-memory counter, so the count survives restarts.

use std::fs::{DirBuilder, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;

use loopvol_common::{LeaseId, VolumeError, VolumeResult};

/// Mode of newly created state directories.
const STATE_DIR_MODE: u32 = 0o755;

/// Reads and writes the lease markers of one volume.
#[derive(Debug, Clone, Copy)]
pub struct LeaseTracker<'a> {
    volume: &'a str,
    state_dir: &'a Path,
}

impl<'a> LeaseTracker<'a> {
    /// Create a tracker for `volume` keeping markers in `state_dir`.
    #[must_use]
    pub const fn new(volume: &'a str, state_dir: &'a Path) -> Self {
        Self { volume, state_dir }
    }

    /// Whether at least one lease exists.
    ///
    /// A missing state directory means no leases.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the state directory cannot be read.
    pub fn has_any_lease(&self) -> VolumeResult<bool> {
        let mut entries = match std::fs::read_dir(self.state_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        match entries.next() {
            None => Ok(false),
            Some(entry) => {
                entry?;
                Ok(true)
            }
        }
    }

    /// All current lease ids, sorted.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the state directory cannot be read.
    pub fn leases(&self) -> VolumeResult<Vec<String>> {
        let entries = match std::fs::read_dir(self.state_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut leases = Vec::new();
        for entry in entries {
            leases.push(entry?.file_name().to_string_lossy().into_owned());
        }
        leases.sort();
        Ok(leases)
    }

    /// Record a lease, creating the state directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::AlreadyLeased`] if the marker already exists.
    pub fn acquire(&self, lease: &LeaseId) -> VolumeResult<()> {
        DirBuilder::new()
            .recursive(true)
            .mode(STATE_DIR_MODE)
            .create(self.state_dir)?;

        let marker = self.state_dir.join(lease.as_str());
        match OpenOptions::new().write(true).create_new(true).open(&marker) {
            Ok(_) => {
                tracing::debug!(volume = self.volume, %lease, "Lease acquired");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(VolumeError::AlreadyLeased {
                name: self.volume.to_string(),
                lease: lease.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a lease.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::LeaseNotFound`] if there is no such marker.
    pub fn release(&self, lease: &LeaseId) -> VolumeResult<()> {
        match std::fs::remove_file(self.state_dir.join(lease.as_str())) {
            Ok(()) => {
                tracing::debug!(volume = self.volume, %lease, "Lease released");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(VolumeError::LeaseNotFound {
                name: self.volume.to_string(),
                lease: lease.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the (empty) state directory. A missing directory is fine.
    ///
    /// # Errors
    ///
    /// Fails if the directory still holds markers or cannot be removed.
    pub fn remove_state_dir(&self) -> VolumeResult<()> {
        match std::fs::remove_dir(self.state_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn lease(id: &str) -> LeaseId {
        LeaseId::new(id).unwrap()
    }

    #[test]
    fn missing_state_dir_has_no_leases() {
        let temp = tempdir().unwrap();
        let state = temp.path().join("vol1");
        let tracker = LeaseTracker::new("vol1", &state);

        assert!(!tracker.has_any_lease().unwrap());
        assert!(tracker.leases().unwrap().is_empty());
    }

    #[test]
    fn empty_state_dir_has_no_leases() {
        let temp = tempdir().unwrap();
        let state = temp.path().join("vol1");
        std::fs::create_dir(&state).unwrap();

        assert!(!LeaseTracker::new("vol1", &state).has_any_lease().unwrap());
    }

    #[test]
    fn acquire_and_release() {
        let temp = tempdir().unwrap();
        let state = temp.path().join("state").join("vol1");
        let tracker = LeaseTracker::new("vol1", &state);

        tracker.acquire(&lease("c2")).unwrap();
        tracker.acquire(&lease("c1")).unwrap();
        assert!(tracker.has_any_lease().unwrap());
        assert_eq!(tracker.leases().unwrap(), vec!["c1", "c2"]);
        assert_eq!(std::fs::metadata(state.join("c1")).unwrap().len(), 0);

        tracker.release(&lease("c1")).unwrap();
        assert_eq!(tracker.leases().unwrap(), vec!["c2"]);

        tracker.release(&lease("c2")).unwrap();
        assert!(!tracker.has_any_lease().unwrap());
        tracker.remove_state_dir().unwrap();
        assert!(!state.exists());
        tracker.remove_state_dir().unwrap();
    }

    #[test]
    fn duplicate_acquire_is_rejected() {
        let temp = tempdir().unwrap();
        let state = temp.path().join("vol1");
        let tracker = LeaseTracker::new("vol1", &state);

        tracker.acquire(&lease("c1")).unwrap();
        let err = tracker.acquire(&lease("c1")).unwrap_err();
        assert!(matches!(err, VolumeError::AlreadyLeased { .. }));
        assert_eq!(tracker.leases().unwrap(), vec!["c1"]);
    }

    #[test]
    fn releasing_unknown_lease_fails() {
        let temp = tempdir().unwrap();
        let state = temp.path().join("vol1");
        let tracker = LeaseTracker::new("vol1", &state);

        let err = tracker.release(&lease("nobody")).unwrap_err();
        assert!(matches!(err, VolumeError::LeaseNotFound { .. }));
    }

    #[test]
    fn state_dir_with_leases_is_kept() {
        let temp = tempdir().unwrap();
        let state = temp.path().join("vol1");
        let tracker = LeaseTracker::new("vol1", &state);

        tracker.acquire(&lease("c1")).unwrap();
        assert!(tracker.remove_state_dir().is_err());
        assert!(state.join("c1").exists());
    }
}
