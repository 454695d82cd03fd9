//! Supported filesystems and signature detection.
//!
//! The filesystem of a volume is never recorded separately: it is read back
//! from the superblock magic embedded in the backing file.

use std::fmt;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use loopvol_common::{VolumeError, VolumeResult};

/// `XFSB` at the very start of the first allocation group.
const XFS_MAGIC: &[u8; 4] = b"XFSB";
const XFS_MAGIC_OFFSET: u64 = 0;

/// `0xEF53` little-endian, 56 bytes into the superblock at offset 1024.
const EXT_MAGIC: &[u8; 2] = &[0x53, 0xEF];
const EXT_MAGIC_OFFSET: u64 = 1024 + 56;

/// A filesystem a volume can be formatted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filesystem {
    /// ext4, formatted with `mkfs.ext4`.
    Ext4,
    /// XFS, formatted with `mkfs.xfs`.
    #[default]
    Xfs,
}

impl Filesystem {
    /// Every supported filesystem.
    pub const ALL: [Self; 2] = [Self::Ext4, Self::Xfs];

    /// Canonical lowercase identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ext4 => "ext4",
            Self::Xfs => "xfs",
        }
    }

    /// Program that creates this filesystem.
    #[must_use]
    pub const fn mkfs_program(self) -> &'static str {
        match self {
            Self::Ext4 => "mkfs.ext4",
            Self::Xfs => "mkfs.xfs",
        }
    }

    /// Flags passed to [`Self::mkfs_program`] ahead of the target path.
    ///
    /// `mkfs.ext4` refuses regular files without `-F`. `mkfs.xfs` only needs
    /// `-f` to overwrite an existing signature.
    #[must_use]
    pub const fn mkfs_flags(self, already_signed: bool) -> &'static [&'static str] {
        match self {
            Self::Ext4 => &["-F"],
            Self::Xfs if already_signed => &["-f"],
            Self::Xfs => &[],
        }
    }

    /// Options passed to `mount -o`.
    ///
    /// XFS refuses to mount two filesystems with the same UUID, which happens
    /// whenever a volume file is copied, so duplicates are allowed explicitly.
    #[must_use]
    pub const fn mount_options(self) -> &'static str {
        match self {
            Self::Ext4 => "loop",
            Self::Xfs => "loop,nouuid",
        }
    }
}

impl fmt::Display for Filesystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Filesystem {
    type Err = VolumeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ext4" => Ok(Self::Ext4),
            "xfs" => Ok(Self::Xfs),
            _ => Err(VolumeError::UnsupportedFilesystem { fs: s.to_string() }),
        }
    }
}

/// Detect the filesystem stored in a backing file from its superblock magic.
///
/// Returns `Ok(None)` when the content carries no supported signature,
/// including files too short to hold a superblock.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be opened or read.
pub fn detect(path: &Path) -> VolumeResult<Option<Filesystem>> {
    let file = File::open(path)?;

    if magic_at(&file, XFS_MAGIC_OFFSET, XFS_MAGIC)? {
        return Ok(Some(Filesystem::Xfs));
    }
    if magic_at(&file, EXT_MAGIC_OFFSET, EXT_MAGIC)? {
        return Ok(Some(Filesystem::Ext4));
    }

    tracing::debug!(path = %path.display(), "No known filesystem signature");
    Ok(None)
}

fn magic_at(file: &File, offset: u64, magic: &[u8]) -> std::io::Result<bool> {
    let mut buf = vec![0u8; magic.len()];
    match file.read_exact_at(&mut buf, offset) {
        Ok(()) => Ok(buf == magic),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Write a bare signature for `fs` into an existing file.
///
/// Only the magic is written; the result is recognised by [`detect`] but is
/// not a mountable filesystem.
#[cfg(test)]
pub(crate) fn write_signature(path: &Path, fs: Filesystem) -> std::io::Result<()> {
    let file = std::fs::OpenOptions::new().write(true).open(path)?;
    match fs {
        Filesystem::Xfs => file.write_all_at(XFS_MAGIC, XFS_MAGIC_OFFSET),
        Filesystem::Ext4 => file.write_all_at(EXT_MAGIC, EXT_MAGIC_OFFSET),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn blank_file(dir: &Path, len: u64) -> std::path::PathBuf {
        let path = dir.join("image");
        let file = File::create(&path).unwrap();
        file.set_len(len).unwrap();
        path
    }

    #[test]
    fn parse_filesystem() {
        assert_eq!("ext4".parse::<Filesystem>().unwrap(), Filesystem::Ext4);
        assert_eq!(" XFS ".parse::<Filesystem>().unwrap(), Filesystem::Xfs);
        let err = "btrfs".parse::<Filesystem>().unwrap_err();
        assert!(matches!(err, VolumeError::UnsupportedFilesystem { ref fs } if fs == "btrfs"));
    }

    #[test]
    fn default_is_xfs() {
        assert_eq!(Filesystem::default(), Filesystem::Xfs);
    }

    #[test]
    fn mkfs_flags_per_filesystem() {
        assert_eq!(Filesystem::Ext4.mkfs_flags(false), &["-F"]);
        assert_eq!(Filesystem::Ext4.mkfs_flags(true), &["-F"]);
        assert!(Filesystem::Xfs.mkfs_flags(false).is_empty());
        assert_eq!(Filesystem::Xfs.mkfs_flags(true), &["-f"]);
    }

    #[test]
    fn detect_ext4_signature() {
        let dir = tempdir().unwrap();
        let path = blank_file(dir.path(), 4096);
        write_signature(&path, Filesystem::Ext4).unwrap();
        assert_eq!(detect(&path).unwrap(), Some(Filesystem::Ext4));
    }

    #[test]
    fn detect_xfs_signature() {
        let dir = tempdir().unwrap();
        let path = blank_file(dir.path(), 4096);
        write_signature(&path, Filesystem::Xfs).unwrap();
        assert_eq!(detect(&path).unwrap(), Some(Filesystem::Xfs));
    }

    #[test]
    fn blank_and_short_files_are_unrecognized() {
        let dir = tempdir().unwrap();
        let blank = blank_file(dir.path(), 4096);
        assert_eq!(detect(&blank).unwrap(), None);

        let short = dir.path().join("short");
        std::fs::write(&short, b"XF").unwrap();
        assert_eq!(detect(&short).unwrap(), None);
    }

    #[test]
    fn serde_uses_lowercase() {
        let json = serde_json::to_string(&Filesystem::Ext4).unwrap();
        assert_eq!(json, "\"ext4\"");
    }
}
