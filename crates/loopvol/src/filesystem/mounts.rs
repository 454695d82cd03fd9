//! Loop mount operations.

use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::PathBuf;

use loopvol_common::{VolumeError, VolumeResult};

use crate::exec::CommandRunner;
use crate::volume::Volume;

/// Loop-mount a volume's backing file at its mount point.
///
/// The mount point is created if missing. An existing directory is reused
/// as is.
///
/// # Errors
///
/// Returns [`VolumeError::Mount`] if `mount` fails. A mount point created by
/// this call is removed again before returning.
pub fn mount(runner: &dyn CommandRunner, volume: &Volume) -> VolumeResult<PathBuf> {
    let target = &volume.mount_point;

    if let Some(root) = target.parent() {
        std::fs::create_dir_all(root)?;
    }

    let created = match std::fs::create_dir(target) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            tracing::debug!(target = %target.display(), "Reusing existing mount point");
            false
        }
        Err(e) => return Err(e.into()),
    };

    let result = volume.filesystem().and_then(|fs| {
        tracing::debug!(
            source = %volume.data_file.display(),
            target = %target.display(),
            %fs,
            "Mounting volume"
        );

        let args = [
            OsStr::new("-t"),
            OsStr::new(fs.as_str()),
            OsStr::new("-o"),
            OsStr::new(fs.mount_options()),
            volume.data_file.as_os_str(),
            target.as_os_str(),
        ];
        runner.run("mount", &args)
    });

    match result {
        Ok(_) => Ok(target.clone()),
        Err(err) => {
            if created {
                if let Err(e) = std::fs::remove_dir(target) {
                    tracing::warn!(
                        target = %target.display(),
                        error = %e,
                        "Failed to remove mount point after failed mount"
                    );
                }
            }
            Err(match err {
                VolumeError::CommandFailed { output, .. } => VolumeError::Mount {
                    data_file: volume.data_file.clone(),
                    mount_point: target.clone(),
                    output,
                },
                other => other,
            })
        }
    }
}

/// Detach a volume and remove its mount point.
///
/// The unmount is lazy and releases the loop device. A mount point that
/// cannot be removed afterwards is left behind and reused by the next mount.
///
/// # Errors
///
/// Returns [`VolumeError::Unmount`] if `umount` fails.
pub fn unmount(runner: &dyn CommandRunner, volume: &Volume) -> VolumeResult<()> {
    let target = &volume.mount_point;

    tracing::debug!(target = %target.display(), "Unmounting volume");

    let args = [OsStr::new("-l"), OsStr::new("-d"), target.as_os_str()];
    runner.run("umount", &args).map_err(|err| match err {
        VolumeError::CommandFailed { output, .. } => VolumeError::Unmount {
            mount_point: target.clone(),
            output,
        },
        other => other,
    })?;

    match std::fs::remove_dir(target) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            target = %target.display(),
            error = %e,
            "Mount point left behind after unmount"
        ),
    }

    Ok(())
}
