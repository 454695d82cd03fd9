//! # Loopvol
//!
//! Named, file-backed volumes for container workloads. Each volume is a
//! regular file holding an ext4 or xfs filesystem that is loop-mounted on
//! demand and shared between any number of consumers.
//!
//! ## Features
//!
//! - **Filesystem as database**: volumes are derived from the backing files on every call
//! - **Lease counting**: one marker file per consumer; mounted on the first, unmounted after the last
//! - **Allocation**: sparse or fully reserved backing files, with a zero-fill fallback
//! - **Ownership**: optional uid, gid and mode for the volume root
//!
//! ## Usage
//!
//! ```no_run
//! use loopvol::config::ManagerConfig;
//! use loopvol::filesystem::Filesystem;
//! use loopvol::volume::{CreateRequest, VolumeManager};
//!
//! # fn example() -> loopvol_common::VolumeResult<()> {
//! let manager = VolumeManager::new(ManagerConfig::default())?;
//!
//! let request = CreateRequest::new("vol1", 50_000_000).with_filesystem(Filesystem::Ext4);
//! manager.create(&request)?;
//!
//! let target = manager.mount("vol1", "container-1")?;
//! println!("mounted at {}", target.display());
//!
//! manager.unmount("vol1", "container-1")?;
//! manager.delete("vol1")?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod exec;
pub mod filesystem;
pub mod volume;

pub use config::ManagerConfig;
pub use volume::{CreateRequest, Volume, VolumeManager};
