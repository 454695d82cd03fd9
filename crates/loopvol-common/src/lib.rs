//! # loopvol-common
//!
//! Shared types for the loopvol volume manager.
//!
//! This crate provides:
//! - The error taxonomy of the volume lifecycle
//! - Volume name and lease id validation
//! - The on-disk layout of the volume store
//! - Human-readable size parsing

#![warn(missing_docs)]

pub mod error;
pub mod name;
pub mod paths;
pub mod size;

pub use error::{AllocationFailure, VolumeError, VolumeResult};
pub use name::{LeaseId, VolumeName};
pub use paths::VolumePaths;
pub use size::ByteSize;
