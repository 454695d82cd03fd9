//! Backing file operations.
//!
//! This module handles:
//! - Allocation of backing files
//! - Formatting with ext4 or xfs
//! - Filesystem detection from superblock magic
//! - Loop mounting and unmounting

pub mod allocate;
pub mod format;
pub mod fstype;
pub mod mounts;

pub use allocate::{MIN_VOLUME_SIZE, allocate};
pub use format::format;
pub use fstype::{Filesystem, detect};
pub use mounts::{mount, unmount};
