//! Writing a filesystem into a backing file.

use std::ffi::OsStr;
use std::path::Path;

use loopvol_common::{VolumeError, VolumeResult};

use super::fstype::{Filesystem, detect};
use crate::exec::CommandRunner;

/// Format the backing file at `path` with `fs`.
///
/// The caller owns the file and removes it if formatting fails.
///
/// # Errors
///
/// - [`VolumeError::Format`] if the mkfs tool fails
/// - [`VolumeError::CommandNotFound`] if the mkfs tool is not installed
pub fn format(runner: &dyn CommandRunner, path: &Path, fs: Filesystem) -> VolumeResult<()> {
    let already_signed = detect(path)?.is_some();
    let program = fs.mkfs_program();

    let mut args: Vec<&OsStr> = fs.mkfs_flags(already_signed).iter().map(OsStr::new).collect();
    args.push(path.as_os_str());

    tracing::debug!(
        path = %path.display(),
        %fs,
        already_signed,
        "Formatting data file"
    );

    runner.run(program, &args).map_err(|err| match err {
        VolumeError::CommandFailed { output, .. } => VolumeError::Format {
            fs: fs.to_string(),
            path: path.to_path_buf(),
            output,
        },
        other => other,
    })?;

    Ok(())
}
