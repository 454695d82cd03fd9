//! Running host utilities.
//!
//! Formatting and loop mounting are delegated to the host's `mkfs.*`,
//! `mount` and `umount` binaries. Everything goes through [`CommandRunner`]
//! so the lifecycle can be driven against a recording fake.

use std::ffi::OsStr;
use std::fmt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use loopvol_common::{VolumeError, VolumeResult};

/// Programs the volume lifecycle shells out to.
pub const REQUIRED_TOOLS: [&str; 4] = ["mkfs.ext4", "mkfs.xfs", "mount", "umount"];

/// Executes external programs.
pub trait CommandRunner: Send + Sync + fmt::Debug {
    /// Run `program` to completion and return its combined, trimmed output.
    ///
    /// # Errors
    ///
    /// - [`VolumeError::CommandNotFound`] if the program is not installed
    /// - [`VolumeError::CommandFailed`] if it exits unsuccessfully
    fn run(&self, program: &str, args: &[&OsStr]) -> VolumeResult<String>;
}

/// Runs programs on the host, blocking until they exit.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&OsStr]) -> VolumeResult<String> {
        tracing::debug!(program, ?args, "Running command");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    VolumeError::CommandNotFound {
                        program: program.to_string(),
                    }
                } else {
                    VolumeError::Io(e)
                }
            })?;

        let combined = combine_output(&output.stdout, &output.stderr);

        if !output.status.success() {
            return Err(VolumeError::CommandFailed {
                program: program.to_string(),
                status: output.status.to_string(),
                output: combined,
            });
        }

        tracing::trace!(program, output = %combined, "Command finished");
        Ok(combined)
    }
}

/// Merge stdout and stderr into one trimmed message.
fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    [stdout, stderr]
        .iter()
        .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Locate an executable on `PATH`.
#[must_use]
pub fn find_program(name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        return is_executable(&path).then_some(path);
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Availability of the host tools the lifecycle depends on.
#[derive(Debug, Clone)]
pub struct ToolReport {
    /// Each required tool with its resolved location, if any.
    pub tools: Vec<(&'static str, Option<PathBuf>)>,
}

impl ToolReport {
    /// Look up every tool in [`REQUIRED_TOOLS`].
    #[must_use]
    pub fn probe() -> Self {
        Self {
            tools: REQUIRED_TOOLS
                .iter()
                .map(|name| (*name, find_program(name)))
                .collect(),
        }
    }

    /// Whether a tool was found.
    #[must_use]
    pub fn is_available(&self, name: &str) -> bool {
        self.tools
            .iter()
            .any(|(tool, path)| *tool == name && path.is_some())
    }

    /// Names of tools that are missing.
    #[must_use]
    pub fn missing(&self) -> Vec<&'static str> {
        self.tools
            .iter()
            .filter(|(_, path)| path.is_none())
            .map(|(name, _)| *name)
            .collect()
    }
}
