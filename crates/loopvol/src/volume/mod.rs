//! Volumes and their lifecycle.

mod entity;
pub mod lease;
mod manager;
pub mod ownership;

pub use entity::{StatusDetails, Volume, VolumeStatus};
pub use lease::LeaseTracker;
pub use manager::{CreateRequest, VolumeManager};
pub use ownership::Ownership;
