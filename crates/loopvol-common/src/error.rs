//! Common error types for loopvol.

use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`VolumeError`].
pub type VolumeResult<T> = Result<T, VolumeError>;

/// Why a backing file could not be allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationFailure {
    /// The filesystem holding the data directory ran out of space.
    OutOfSpace,
    /// The filesystem does not support the primitive needed to size the file.
    UnsupportedPrimitive,
    /// Any other I/O failure.
    Io,
}

impl fmt::Display for AllocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OutOfSpace => "not enough disk space",
            Self::UnsupportedPrimitive => "unsupported by the underlying filesystem",
            Self::Io => "I/O failure",
        };
        f.write_str(s)
    }
}

/// Errors produced by the volume lifecycle.
#[derive(Error, Diagnostic, Debug)]
pub enum VolumeError {
    /// Volume name does not match the naming grammar.
    #[error("Invalid volume name '{name}': {reason}")]
    #[diagnostic(
        code(loopvol::volume::invalid_name),
        help("Names start with a letter or digit followed by 1-250 letters, digits, underscores or hyphens")
    )]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Lease identifier cannot be used as a marker file name.
    #[error("Invalid lease id '{lease}': {reason}")]
    #[diagnostic(code(loopvol::lease::invalid_id))]
    InvalidLeaseId {
        /// The rejected lease id.
        lease: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Requested size is below the minimum volume size.
    #[error("Requested size {requested} bytes is smaller than the minimum of {minimum} bytes")]
    #[diagnostic(code(loopvol::volume::size_below_minimum))]
    SizeBelowMinimum {
        /// The requested size.
        requested: u64,
        /// The enforced floor.
        minimum: u64,
    },

    /// Human-readable size could not be parsed.
    #[error("Invalid size: {value}")]
    #[diagnostic(
        code(loopvol::size::invalid),
        help("Use formats like '20MB', '1G', '1.5GiB', '512Mi' or a plain byte count")
    )]
    InvalidSize {
        /// The invalid value.
        value: String,
    },

    /// Requested filesystem is not one of the supported ones.
    #[error("Unsupported filesystem '{fs}'")]
    #[diagnostic(
        code(loopvol::fs::unsupported),
        help("Only ext4 and xfs are supported")
    )]
    UnsupportedFilesystem {
        /// The requested filesystem identifier.
        fs: String,
    },

    /// Backing file content carries no known filesystem signature.
    #[error("Cannot recognize filesystem in '{}'", .path.display())]
    #[diagnostic(code(loopvol::fs::unrecognized))]
    UnrecognizedFilesystem {
        /// The inspected backing file.
        path: PathBuf,
    },

    /// Create option is unknown or carries an invalid value.
    #[error("Invalid option '{option}': {reason}")]
    #[diagnostic(code(loopvol::options::invalid))]
    InvalidOption {
        /// The offending option (or comma-separated options).
        option: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Backing file could not be allocated.
    #[error("Cannot allocate data file '{}': {kind}", .path.display())]
    #[diagnostic(code(loopvol::allocate))]
    Allocation {
        /// The backing file.
        path: PathBuf,
        /// Failure classification.
        kind: AllocationFailure,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Formatting tool failed.
    #[error("Cannot format data file '{}' as {fs}: {output}", .path.display())]
    #[diagnostic(code(loopvol::format))]
    Format {
        /// The requested filesystem.
        fs: String,
        /// The backing file.
        path: PathBuf,
        /// Normalized tool output.
        output: String,
    },

    /// Loop mount failed.
    #[error("Cannot mount data file '{}' at '{}': {output}", .data_file.display(), .mount_point.display())]
    #[diagnostic(
        code(loopvol::mount),
        help("Loop mounts require root privileges and a free loop device")
    )]
    Mount {
        /// The backing file.
        data_file: PathBuf,
        /// The mount point.
        mount_point: PathBuf,
        /// Normalized tool output.
        output: String,
    },

    /// Unmount failed.
    #[error("Cannot unmount '{}': {output}", .mount_point.display())]
    #[diagnostic(code(loopvol::unmount))]
    Unmount {
        /// The mount point.
        mount_point: PathBuf,
        /// Normalized tool output.
        output: String,
    },

    /// The consumer already holds a lease on the volume.
    #[error("Volume '{name}' is already leased by '{lease}'")]
    #[diagnostic(code(loopvol::lease::already_leased))]
    AlreadyLeased {
        /// Volume name.
        name: String,
        /// Lease id.
        lease: String,
    },

    /// The consumer holds no lease on the volume.
    #[error("Volume '{name}' has no lease '{lease}'")]
    #[diagnostic(code(loopvol::lease::not_found))]
    LeaseNotFound {
        /// Volume name.
        name: String,
        /// Lease id.
        lease: String,
    },

    /// Volume does not exist.
    #[error("Volume not found: {name}")]
    #[diagnostic(code(loopvol::volume::not_found))]
    NotFound {
        /// Volume name.
        name: String,
    },

    /// A volume (or some other entry) already occupies the name.
    #[error("Volume already exists: {name}")]
    #[diagnostic(code(loopvol::volume::already_exists))]
    AlreadyExists {
        /// Volume name.
        name: String,
    },

    /// Volume still has active leases.
    #[error("Volume '{name}' is still in use by: {}", .leases.join(", "))]
    #[diagnostic(
        code(loopvol::volume::still_in_use),
        help("Unmount the volume for every listed lease first")
    )]
    StillInUse {
        /// Volume name.
        name: String,
        /// Active lease ids.
        leases: Vec<String>,
    },

    /// chmod/chown of the volume root failed.
    #[error("Cannot adjust root owner/permissions of volume '{name}': {reason}")]
    #[diagnostic(code(loopvol::volume::permissions))]
    PermissionAdjustment {
        /// Volume name.
        name: String,
        /// What went wrong.
        reason: String,
    },

    /// External utility is not installed.
    #[error("Required program not found: {program}")]
    #[diagnostic(
        code(loopvol::exec::not_found),
        help("Install e2fsprogs (mkfs.ext4), xfsprogs (mkfs.xfs) and util-linux (mount, umount)")
    )]
    CommandNotFound {
        /// Program name.
        program: String,
    },

    /// External utility exited unsuccessfully.
    #[error("'{program}' failed ({status}): {output}")]
    #[diagnostic(code(loopvol::exec::failed))]
    CommandFailed {
        /// Program name.
        program: String,
        /// Exit status description.
        status: String,
        /// Normalized combined output.
        output: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(loopvol::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(loopvol::io))]
    Io(#[from] std::io::Error),
}

impl VolumeError {
    /// Whether the error was raised by input validation, before any side effect.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidName { .. }
                | Self::InvalidLeaseId { .. }
                | Self::SizeBelowMinimum { .. }
                | Self::InvalidSize { .. }
                | Self::UnsupportedFilesystem { .. }
                | Self::InvalidOption { .. }
        )
    }
}
