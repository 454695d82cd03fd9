//! Backing file allocation.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use loopvol_common::{AllocationFailure, VolumeError, VolumeResult};
use rustix::fs::FallocateFlags;
use rustix::io::Errno;

/// Smallest volume that can be created, in bytes.
pub const MIN_VOLUME_SIZE: u64 = 20_000_000;

/// Chunk size used when zero-filling a file by hand.
const ZERO_CHUNK: usize = 1024 * 1024;

/// Create a backing file of `size` bytes at `path`.
///
/// A sparse file only gets its logical length. Otherwise all blocks are
/// reserved with `fallocate`, falling back to writing zeroes when the
/// filesystem lacks the primitive. Running out of space never falls back.
///
/// The file is created exclusively and removed again on any failure.
///
/// # Errors
///
/// - [`VolumeError::SizeBelowMinimum`] before anything is touched
/// - [`VolumeError::Allocation`] classified by [`AllocationFailure`]
pub fn allocate(path: &Path, size: u64, sparse: bool) -> VolumeResult<()> {
    allocate_with(path, size, sparse, reserve_blocks)
}

fn reserve_blocks(file: &File, size: u64) -> rustix::io::Result<()> {
    rustix::fs::fallocate(file, FallocateFlags::empty(), 0, size)
}

/// [`allocate`] with the block reservation call supplied by the caller.
fn allocate_with<F>(path: &Path, size: u64, sparse: bool, fallocate: F) -> VolumeResult<()>
where
    F: FnOnce(&File, u64) -> rustix::io::Result<()>,
{
    if size < MIN_VOLUME_SIZE {
        return Err(VolumeError::SizeBelowMinimum {
            requested: size,
            minimum: MIN_VOLUME_SIZE,
        });
    }

    tracing::debug!(path = %path.display(), size, sparse, "Allocating data file");

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| allocation_error(path, e))?;

    let result = if sparse {
        rustix::fs::ftruncate(&file, size).map_err(|errno| allocation_error(path, errno.into()))
    } else {
        reserve(&file, path, size, fallocate)
    };

    if let Err(err) = result {
        drop(file);
        tracing::debug!(path = %path.display(), "Removing partially allocated data file");
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove data file");
        }
        return Err(err);
    }

    Ok(())
}

fn reserve<F>(file: &File, path: &Path, size: u64, fallocate: F) -> VolumeResult<()>
where
    F: FnOnce(&File, u64) -> rustix::io::Result<()>,
{
    match fallocate(file, size) {
        Ok(()) => Ok(()),
        Err(errno) if is_capability_error(errno) => {
            tracing::warn!(
                path = %path.display(),
                %errno,
                "fallocate is not supported here, writing zeroes instead"
            );
            write_zeroes(file, size).map_err(|e| allocation_error(path, e))
        }
        Err(errno) => Err(allocation_error(path, errno.into())),
    }
}

/// Errors meaning "this filesystem cannot do it", as opposed to "cannot do it now".
fn is_capability_error(errno: Errno) -> bool {
    errno == Errno::OPNOTSUPP || errno == Errno::NOSYS || errno == Errno::INVAL
}

/// Fill a freshly created file with `size` zero bytes.
fn write_zeroes(mut file: &File, size: u64) -> std::io::Result<()> {
    let chunk = vec![0u8; ZERO_CHUNK];
    let mut remaining = size;
    while remaining > 0 {
        #[allow(clippy::cast_possible_truncation)]
        let n = remaining.min(ZERO_CHUNK as u64) as usize;
        file.write_all(&chunk[..n])?;
        remaining -= n as u64;
    }
    file.flush()
}

fn classify(err: &std::io::Error) -> AllocationFailure {
    match Errno::from_io_error(err) {
        Some(errno) if errno == Errno::NOSPC || errno == Errno::DQUOT => {
            AllocationFailure::OutOfSpace
        }
        Some(errno) if is_capability_error(errno) => AllocationFailure::UnsupportedPrimitive,
        _ => AllocationFailure::Io,
    }
}

fn allocation_error(path: &Path, source: std::io::Error) -> VolumeError {
    VolumeError::Allocation {
        path: path.to_path_buf(),
        kind: classify(&source),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;
    use tempfile::tempdir;

    const SIZE: u64 = 25_000_000;

    #[test]
    fn rejects_size_below_minimum() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("small");

        let err = allocate(&path, MIN_VOLUME_SIZE - 1, false).unwrap_err();
        assert!(matches!(err, VolumeError::SizeBelowMinimum { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn sparse_file_has_logical_length() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sparse");

        allocate(&path, SIZE, true).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.len(), SIZE);
        assert!(meta.blocks() * 512 <= meta.len());
    }

    #[test]
    fn preallocated_file_reserves_blocks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("full");

        allocate(&path, SIZE, false).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.len(), SIZE);
        assert!(meta.blocks() * 512 >= SIZE);
    }

    #[test]
    fn existing_file_is_never_overwritten() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("taken");
        std::fs::write(&path, b"precious").unwrap();

        let err = allocate(&path, SIZE, true).unwrap_err();
        assert!(matches!(err, VolumeError::Allocation { .. }));
        assert_eq!(std::fs::read(&path).unwrap(), b"precious");
    }

    #[test]
    fn zero_fill_writes_exact_length() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("zeroes");
        let file = File::create(&path).unwrap();

        let size = (ZERO_CHUNK as u64) * 2 + 12_345;
        write_zeroes(&file, size).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.len(), size);
        assert!(meta.blocks() * 512 >= size);
    }

    #[test]
    fn classifies_errnos() {
        let nospc: std::io::Error = Errno::NOSPC.into();
        let unsupported: std::io::Error = Errno::OPNOTSUPP.into();
        let denied: std::io::Error = Errno::ACCESS.into();

        assert_eq!(classify(&nospc), AllocationFailure::OutOfSpace);
        assert_eq!(classify(&unsupported), AllocationFailure::UnsupportedPrimitive);
        assert_eq!(classify(&denied), AllocationFailure::Io);
    }

    #[test]
    fn unsupported_fallocate_falls_back_to_zeroes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fallback");

        allocate_with(&path, SIZE, false, |_, _| Err(Errno::OPNOTSUPP)).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.len(), SIZE);
        assert!(meta.blocks() * 512 >= SIZE);
    }

    #[test]
    fn out_of_space_does_not_fall_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nospace");

        let err = allocate_with(&path, SIZE, false, |_, _| Err(Errno::NOSPC)).unwrap_err();
        assert!(matches!(
            err,
            VolumeError::Allocation {
                kind: AllocationFailure::OutOfSpace,
                ..
            }
        ));
        assert!(!path.exists());
    }

    #[test]
    fn other_fallocate_errors_remove_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("io");

        let err = allocate_with(&path, SIZE, false, |_, _| Err(Errno::IO)).unwrap_err();
        assert!(matches!(
            err,
            VolumeError::Allocation {
                kind: AllocationFailure::Io,
                ..
            }
        ));
        assert!(!path.exists());
    }
}
