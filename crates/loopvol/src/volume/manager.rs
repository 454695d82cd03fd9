//! The volume lifecycle manager.
//!
//! [`VolumeManager`] is the only entry point that mutates the store. Every
//! public operation holds one process-wide lock for its whole duration, so
//! the lease bookkeeping and the physical mount state can never be observed
//! half updated. Internal composition goes through the `*_locked` helpers,
//! which expect the lock to be held already.

use std::fs::DirBuilder;
use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use loopvol_common::{LeaseId, VolumeError, VolumeName, VolumePaths, VolumeResult};
use parking_lot::Mutex;

use super::ownership::{self, Ownership};
use super::Volume;
use crate::config::ManagerConfig;
use crate::exec::{CommandRunner, SystemRunner, ToolReport};
use crate::filesystem::{self, Filesystem, MIN_VOLUME_SIZE};

/// Mode of the data directory when it has to be created.
const DATA_DIR_MODE: u32 = 0o755;

/// Parameters of a new volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    /// Volume name, validated by [`VolumeManager::create`].
    pub name: String,
    /// Logical size in bytes.
    pub size_bytes: u64,
    /// Skip block reservation.
    pub sparse: bool,
    /// Filesystem to format with.
    pub filesystem: Filesystem,
    /// Owner and mode of the volume root.
    pub ownership: Ownership,
}

impl CreateRequest {
    /// A fully allocated xfs volume with default ownership.
    #[must_use]
    pub fn new(name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            sparse: false,
            filesystem: Filesystem::default(),
            ownership: Ownership::default(),
        }
    }

    /// Allocate lazily.
    #[must_use]
    pub const fn with_sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    /// Use `filesystem`.
    #[must_use]
    pub const fn with_filesystem(mut self, filesystem: Filesystem) -> Self {
        self.filesystem = filesystem;
        self
    }

    /// Adjust the volume root after formatting.
    #[must_use]
    pub const fn with_ownership(mut self, ownership: Ownership) -> Self {
        self.ownership = ownership;
        self
    }
}

/// Creates, mounts, unmounts and deletes volumes.
#[derive(Debug)]
pub struct VolumeManager {
    config: ManagerConfig,
    runner: Arc<dyn CommandRunner>,
    lock: Mutex<()>,
}

impl VolumeManager {
    /// Create a manager that runs the host's tools.
    ///
    /// Missing tools are reported as warnings; the operations needing them
    /// fail when used.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the directories are not absolute.
    pub fn new(config: ManagerConfig) -> VolumeResult<Self> {
        let manager = Self::with_runner(config, Arc::new(SystemRunner))?;

        let report = ToolReport::probe();
        for tool in report.missing() {
            tracing::warn!(tool, "Required tool not found in PATH");
        }

        Ok(manager)
    }

    /// Create a manager that runs tools through `runner`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the directories are not absolute.
    pub fn with_runner(config: ManagerConfig, runner: Arc<dyn CommandRunner>) -> VolumeResult<Self> {
        config.validate()?;

        tracing::debug!(
            data = %config.paths.data.display(),
            state = %config.paths.state.display(),
            mount = %config.paths.mount.display(),
            "Volume manager configured"
        );

        Ok(Self {
            config,
            runner,
            lock: Mutex::new(()),
        })
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn paths(&self) -> &VolumePaths {
        &self.config.paths
    }

    /// Allocate and format a new volume.
    ///
    /// Nothing is left on disk when creation fails.
    ///
    /// # Errors
    ///
    /// - [`VolumeError::InvalidName`] for a malformed name
    /// - [`VolumeError::SizeBelowMinimum`] below [`MIN_VOLUME_SIZE`]
    /// - [`VolumeError::AlreadyExists`] if the name is taken
    /// - allocation, format and ownership errors
    pub fn create(&self, request: &CreateRequest) -> VolumeResult<Volume> {
        let _guard = self.lock.lock();
        self.create_locked(request)
    }

    fn create_locked(&self, request: &CreateRequest) -> VolumeResult<Volume> {
        let name = VolumeName::new(request.name.as_str())?;
        if request.size_bytes < MIN_VOLUME_SIZE {
            return Err(VolumeError::SizeBelowMinimum {
                requested: request.size_bytes,
                minimum: MIN_VOLUME_SIZE,
            });
        }

        DirBuilder::new()
            .recursive(true)
            .mode(DATA_DIR_MODE)
            .create(&self.paths().data)?;

        let data_file = self.paths().data_file(name.as_str());
        match std::fs::symlink_metadata(&data_file) {
            Ok(_) => {
                return Err(VolumeError::AlreadyExists {
                    name: name.to_string(),
                });
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(
            volume = %name,
            size = request.size_bytes,
            sparse = request.sparse,
            fs = %request.filesystem,
            "Creating volume"
        );

        filesystem::allocate(&data_file, request.size_bytes, request.sparse)?;

        if let Err(err) = filesystem::format(self.runner.as_ref(), &data_file, request.filesystem) {
            remove_data_file(&data_file);
            return Err(err);
        }

        if request.ownership.is_requested() {
            let volume = Volume::load(self.paths(), &name)?;
            if let Err(err) = ownership::adjust(self, &volume, &request.ownership) {
                Self::discard_unadjusted(&volume);
                return Err(err);
            }
        }

        let volume = Volume::load(self.paths(), &name)?;
        tracing::info!(
            volume = %name,
            path = %volume.data_file.display(),
            "Volume created"
        );
        Ok(volume)
    }

    /// Remove a volume whose ownership adjustment failed, unless it is
    /// still mounted.
    fn discard_unadjusted(volume: &Volume) {
        let tracker = volume.leases();
        match tracker.has_any_lease() {
            Ok(false) => {
                remove_data_file(&volume.data_file);
                if let Err(e) = tracker.remove_state_dir() {
                    tracing::warn!(volume = %volume.name, error = %e, "Failed to remove state directory");
                }
            }
            Ok(true) => tracing::warn!(
                volume = %volume.name,
                lease = %LeaseId::reserved(ownership::OWNERSHIP_LEASE),
                "Keeping volume that is still mounted after failed ownership adjustment; unmount it with this lease"
            ),
            Err(e) => tracing::warn!(
                volume = %volume.name,
                error = %e,
                "Cannot read leases, keeping volume"
            ),
        }
    }

    /// Look up a volume.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::NotFound`] if it does not exist.
    pub fn get(&self, name: &str) -> VolumeResult<Volume> {
        let _guard = self.lock.lock();
        self.load(name)
    }

    fn load(&self, name: &str) -> VolumeResult<Volume> {
        let name = VolumeName::new(name)?;
        Volume::load(self.paths(), &name)
    }

    /// All volumes, sorted by name.
    ///
    /// Entries of the data directory that are not regular files or do not
    /// carry a valid name are skipped.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the data directory cannot be read.
    pub fn list(&self) -> VolumeResult<Vec<Volume>> {
        let _guard = self.lock.lock();

        let entries = match std::fs::read_dir(&self.paths().data) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut volumes = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().and_then(|n| VolumeName::new(n).ok())
            else {
                tracing::debug!(entry = ?entry.file_name(), "Skipping entry with invalid name");
                continue;
            };

            match Volume::load(self.paths(), &name) {
                Ok(volume) => volumes.push(volume),
                Err(VolumeError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(volumes)
    }

    /// Take a lease on a volume, mounting it on the first lease.
    ///
    /// Returns the mount point.
    ///
    /// # Errors
    ///
    /// - [`VolumeError::AlreadyLeased`] if `lease` is already held
    /// - [`VolumeError::Mount`] if the physical mount fails; the lease is not kept
    pub fn mount(&self, name: &str, lease: &str) -> VolumeResult<PathBuf> {
        let _guard = self.lock.lock();
        let volume = self.load(name)?;
        let lease = LeaseId::new(lease)?;
        self.mount_locked(&volume, &lease)
    }

    pub(super) fn mount_locked(&self, volume: &Volume, lease: &LeaseId) -> VolumeResult<PathBuf> {
        let tracker = volume.leases();
        let first = !tracker.has_any_lease()?;

        tracker.acquire(lease)?;

        if first {
            if let Err(err) = filesystem::mount(self.runner.as_ref(), volume) {
                match tracker.release(lease) {
                    Ok(()) => {
                        if let Err(e) = tracker.remove_state_dir() {
                            tracing::warn!(volume = %volume.name, error = %e, "Failed to remove state directory");
                        }
                    }
                    Err(e) => tracing::warn!(
                        volume = %volume.name,
                        %lease,
                        error = %e,
                        "Failed to release lease after failed mount"
                    ),
                }
                return Err(err);
            }
            tracing::info!(
                volume = %volume.name,
                %lease,
                target = %volume.mount_point.display(),
                "Volume mounted"
            );
        } else {
            tracing::debug!(volume = %volume.name, %lease, "Volume already mounted, lease added");
        }

        Ok(volume.mount_point.clone())
    }

    /// Release a lease, unmounting the volume when it was the last one.
    ///
    /// # Errors
    ///
    /// - [`VolumeError::LeaseNotFound`] if `lease` is not held
    /// - [`VolumeError::Unmount`] if the physical unmount fails; the lease is
    ///   restored so the call can be retried
    ///
    /// The internal `.loopvol-ownership` lease is accepted here so a volume
    /// left mounted by a failed create can be released.
    pub fn unmount(&self, name: &str, lease: &str) -> VolumeResult<()> {
        let _guard = self.lock.lock();
        let volume = self.load(name)?;
        let lease = ownership::releasable_lease(lease)?;
        self.unmount_locked(&volume, &lease)
    }

    pub(super) fn unmount_locked(&self, volume: &Volume, lease: &LeaseId) -> VolumeResult<()> {
        let tracker = volume.leases();
        tracker.release(lease)?;

        if tracker.has_any_lease()? {
            tracing::debug!(volume = %volume.name, %lease, "Lease released, volume still in use");
            return Ok(());
        }

        if let Err(err) = filesystem::unmount(self.runner.as_ref(), volume) {
            if let Err(e) = tracker.acquire(lease) {
                tracing::warn!(
                    volume = %volume.name,
                    %lease,
                    error = %e,
                    "Failed to restore lease after failed unmount"
                );
            }
            return Err(err);
        }

        if let Err(e) = tracker.remove_state_dir() {
            tracing::warn!(volume = %volume.name, error = %e, "Failed to remove state directory");
        }

        tracing::info!(volume = %volume.name, %lease, "Volume unmounted");
        Ok(())
    }

    /// Delete an unused volume.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::StillInUse`] while any lease exists.
    pub fn delete(&self, name: &str) -> VolumeResult<()> {
        let _guard = self.lock.lock();
        let volume = self.load(name)?;
        let tracker = volume.leases();

        let leases = tracker.leases()?;
        if !leases.is_empty() {
            return Err(VolumeError::StillInUse {
                name: volume.name.to_string(),
                leases,
            });
        }

        std::fs::remove_file(&volume.data_file)?;
        if let Err(e) = tracker.remove_state_dir() {
            tracing::warn!(volume = %volume.name, error = %e, "Failed to remove state directory");
        }

        tracing::info!(volume = %volume.name, "Volume deleted");
        Ok(())
    }

    /// Mount point of a volume, mounted or not.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::NotFound`] if it does not exist.
    pub fn path(&self, name: &str) -> VolumeResult<PathBuf> {
        let _guard = self.lock.lock();
        Ok(self.load(name)?.mount_point)
    }
}

fn remove_data_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove data file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::RecordingRunner;
    use tempfile::tempdir;

    const SIZE: u64 = 30_000_000;

    fn manager(root: &Path) -> (VolumeManager, Arc<RecordingRunner>) {
        let runner = Arc::new(RecordingRunner::new());
        let config = ManagerConfig::default().with_root(root);
        let manager = VolumeManager::with_runner(config, runner.clone()).unwrap();
        (manager, runner)
    }

    /// Stand-in for mkfs: the recording runner does not touch the file.
    fn sign(manager: &VolumeManager, name: &str, fs: Filesystem) {
        let path = manager.paths().data_file(name);
        crate::filesystem::fstype::write_signature(&path, fs).unwrap();
    }

    fn create_signed(manager: &VolumeManager, name: &str, fs: Filesystem) {
        let request = CreateRequest::new(name, SIZE)
            .with_sparse(true)
            .with_filesystem(fs);
        manager.create(&request).unwrap();
        sign(manager, name, fs);
    }

    #[test]
    fn manager_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VolumeManager>();
    }

    #[test]
    fn relative_paths_are_rejected() {
        let runner = Arc::new(RecordingRunner::new());
        let config = ManagerConfig::default().with_data_dir("data");
        assert!(matches!(
            VolumeManager::with_runner(config, runner),
            Err(VolumeError::Config { .. })
        ));
    }

    #[test]
    fn create_allocates_and_formats() {
        let dir = tempdir().unwrap();
        let (manager, runner) = manager(dir.path());

        let request = CreateRequest::new("vol1", SIZE).with_filesystem(Filesystem::Ext4);
        let volume = manager.create(&request).unwrap();

        assert_eq!(volume.max_size_bytes, SIZE);
        assert!(volume.allocated_size_bytes >= SIZE);
        let calls = runner.calls_to("mkfs.ext4");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0][1], "-F");
    }

    #[test]
    fn create_rejects_existing_name() {
        let dir = tempdir().unwrap();
        let (manager, runner) = manager(dir.path());
        create_signed(&manager, "vol1", Filesystem::Xfs);

        let err = manager.create(&CreateRequest::new("vol1", SIZE)).unwrap_err();
        assert!(matches!(err, VolumeError::AlreadyExists { .. }));
        assert_eq!(runner.calls_to("mkfs.xfs").len(), 1);
    }

    #[test]
    fn create_validates_before_touching_disk() {
        let dir = tempdir().unwrap();
        let (manager, _runner) = manager(dir.path());

        let err = manager.create(&CreateRequest::new("bad name!", SIZE)).unwrap_err();
        assert!(matches!(err, VolumeError::InvalidName { .. }));

        let err = manager.create(&CreateRequest::new("tiny", 19_999_999)).unwrap_err();
        assert!(matches!(err, VolumeError::SizeBelowMinimum { .. }));

        assert!(!manager.paths().data.exists());
    }

    #[test]
    fn format_failure_removes_file() {
        let dir = tempdir().unwrap();
        let (manager, runner) = manager(dir.path());
        runner.fail("mkfs.xfs", "mkfs.xfs: cannot open");

        let err = manager
            .create(&CreateRequest::new("vol1", SIZE).with_sparse(true))
            .unwrap_err();
        assert!(matches!(err, VolumeError::Format { .. }));
        assert!(!manager.paths().data_file("vol1").exists());
    }

    #[test]
    fn leases_drive_physical_mounts() {
        let dir = tempdir().unwrap();
        let (manager, runner) = manager(dir.path());
        create_signed(&manager, "vol1", Filesystem::Xfs);

        let first = manager.mount("vol1", "c1").unwrap();
        let second = manager.mount("vol1", "c2").unwrap();
        assert_eq!(first, second);
        assert_eq!(runner.calls_to("mount").len(), 1);

        manager.unmount("vol1", "c1").unwrap();
        assert!(runner.calls_to("umount").is_empty());

        manager.unmount("vol1", "c2").unwrap();
        assert_eq!(runner.calls_to("umount").len(), 1);
        assert!(!manager.paths().state_dir("vol1").exists());
        assert!(!first.exists());
    }

    #[test]
    fn duplicate_lease_is_rejected() {
        let dir = tempdir().unwrap();
        let (manager, runner) = manager(dir.path());
        create_signed(&manager, "vol1", Filesystem::Xfs);

        manager.mount("vol1", "c1").unwrap();
        let err = manager.mount("vol1", "c1").unwrap_err();
        assert!(matches!(err, VolumeError::AlreadyLeased { .. }));
        assert_eq!(runner.calls_to("mount").len(), 1);
    }

    #[test]
    fn failed_mount_keeps_no_lease() {
        let dir = tempdir().unwrap();
        let (manager, runner) = manager(dir.path());
        create_signed(&manager, "vol1", Filesystem::Xfs);
        runner.fail("mount", "no loop device");

        let err = manager.mount("vol1", "c1").unwrap_err();
        assert!(matches!(err, VolumeError::Mount { .. }));
        assert!(!manager.paths().state_dir("vol1").exists());
        manager.delete("vol1").unwrap();
    }

    #[test]
    fn failed_unmount_restores_lease() {
        let dir = tempdir().unwrap();
        let (manager, runner) = manager(dir.path());
        create_signed(&manager, "vol1", Filesystem::Xfs);
        manager.mount("vol1", "c1").unwrap();
        runner.fail("umount", "target is busy");

        let err = manager.unmount("vol1", "c1").unwrap_err();
        assert!(matches!(err, VolumeError::Unmount { .. }));
        assert!(manager.paths().lease_file("vol1", "c1").exists());

        let err = manager.delete("vol1").unwrap_err();
        assert!(matches!(err, VolumeError::StillInUse { .. }));
    }

    #[test]
    fn unknown_lease_release_fails() {
        let dir = tempdir().unwrap();
        let (manager, _runner) = manager(dir.path());
        create_signed(&manager, "vol1", Filesystem::Xfs);

        let err = manager.unmount("vol1", "c9").unwrap_err();
        assert!(matches!(err, VolumeError::LeaseNotFound { .. }));
    }

    #[test]
    fn reserved_lease_ids_are_rejected() {
        let dir = tempdir().unwrap();
        let (manager, _runner) = manager(dir.path());
        create_signed(&manager, "vol1", Filesystem::Xfs);

        let err = manager.mount("vol1", ".loopvol-ownership").unwrap_err();
        assert!(matches!(err, VolumeError::InvalidLeaseId { .. }));
    }

    #[test]
    fn delete_blocked_while_leased() {
        let dir = tempdir().unwrap();
        let (manager, _runner) = manager(dir.path());
        create_signed(&manager, "vol1", Filesystem::Ext4);
        manager.mount("vol1", "c1").unwrap();

        match manager.delete("vol1").unwrap_err() {
            VolumeError::StillInUse { leases, .. } => assert_eq!(leases, vec!["c1"]),
            other => panic!("unexpected error: {other}"),
        }

        manager.unmount("vol1", "c1").unwrap();
        manager.delete("vol1").unwrap();
        assert!(matches!(
            manager.get("vol1").unwrap_err(),
            VolumeError::NotFound { .. }
        ));
    }

    #[test]
    fn list_skips_foreign_entries() {
        let dir = tempdir().unwrap();
        let (manager, _runner) = manager(dir.path());
        assert!(manager.list().unwrap().is_empty());

        create_signed(&manager, "vol2", Filesystem::Xfs);
        create_signed(&manager, "vol1", Filesystem::Ext4);
        std::fs::create_dir(manager.paths().data_file("subdir")).unwrap();
        std::fs::write(manager.paths().data_file(".hidden"), b"").unwrap();

        let names: Vec<_> = manager
            .list()
            .unwrap()
            .into_iter()
            .map(|v| v.name.to_string())
            .collect();
        assert_eq!(names, vec!["vol1", "vol2"]);
    }

    #[test]
    fn path_does_not_mount() {
        let dir = tempdir().unwrap();
        let (manager, runner) = manager(dir.path());
        create_signed(&manager, "vol1", Filesystem::Xfs);

        let path = manager.path("vol1").unwrap();
        assert_eq!(path, manager.paths().mount_point("vol1"));
        assert!(runner.calls_to("mount").is_empty());
    }
}
