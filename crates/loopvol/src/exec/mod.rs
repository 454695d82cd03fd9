//! External program execution.

pub mod process;

pub use process::{CommandRunner, SystemRunner, ToolReport, find_program};

#[cfg(test)]
pub(crate) use process::testing;
