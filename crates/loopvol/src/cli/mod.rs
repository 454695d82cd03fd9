//! CLI command definitions and handlers.

pub mod options;

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Result, eyre};
use loopvol_common::ByteSize;

use crate::config::ManagerConfig;
use crate::exec::ToolReport;
use crate::volume::{Volume, VolumeManager};

/// Loopvol - file-backed volumes for containers
#[derive(Parser)]
#[command(name = "loopvol")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory holding volume backing files
    #[arg(
        long,
        global = true,
        env = "LOOPVOL_DATA_DIR",
        default_value = "/var/lib/loopvol"
    )]
    pub data_dir: PathBuf,

    /// Directory holding lease markers
    #[arg(
        long,
        global = true,
        env = "LOOPVOL_STATE_DIR",
        default_value = "/run/loopvol"
    )]
    pub state_dir: PathBuf,

    /// Directory under which volumes are mounted
    #[arg(long, global = true, env = "LOOPVOL_MOUNT_DIR", default_value = "/mnt")]
    pub mount_dir: PathBuf,

    /// Size of volumes created without a size option
    #[arg(
        long,
        global = true,
        env = "LOOPVOL_DEFAULT_SIZE",
        default_value = "1GiB"
    )]
    pub default_size: ByteSize,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format of `list`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ListFormat {
    /// Tab separated columns.
    #[default]
    Table,
    /// JSON array of volume descriptions.
    Json,
}

/// Volume commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Create a volume
    Create {
        /// Volume name
        name: String,

        /// Create option (size, sparse, fs, uid, gid, mode)
        #[arg(short = 'o', long = "opt", value_name = "KEY=VALUE", value_parser = options::parse_key_value)]
        options: Vec<(String, String)>,
    },

    /// List volumes
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = ListFormat::Table)]
        format: ListFormat,

        /// Only display volume names
        #[arg(short, long)]
        quiet: bool,
    },

    /// Describe a volume as JSON
    Inspect {
        /// Volume name
        name: String,
    },

    /// Print the mount point of a volume
    Path {
        /// Volume name
        name: String,
    },

    /// Mount a volume on behalf of a consumer
    Mount {
        /// Volume name
        name: String,

        /// Consumer lease id
        lease: String,
    },

    /// Release a consumer's lease, unmounting on the last one
    Unmount {
        /// Volume name
        name: String,

        /// Consumer lease id
        lease: String,
    },

    /// Remove an unused volume
    Remove {
        /// Volume name
        name: String,
    },

    /// Check that the required host tools are installed
    Check,
}

impl Cli {
    /// Manager configuration derived from the global flags.
    #[must_use]
    pub fn config(&self) -> ManagerConfig {
        ManagerConfig::default()
            .with_data_dir(self.data_dir.clone())
            .with_state_dir(self.state_dir.clone())
            .with_mount_dir(self.mount_dir.clone())
            .with_default_size(self.default_size)
    }

    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns the failing operation's error.
    pub fn execute(self) -> Result<()> {
        if matches!(self.command, Commands::Check) {
            return check();
        }

        let config = self.config();
        let default_size = config.default_size;
        let manager = VolumeManager::new(config)?;

        match self.command {
            Commands::Create { name, options } => {
                let options: BTreeMap<String, String> = options.into_iter().collect();
                let request = options::parse_create_options(&name, &options, default_size)?;
                let volume = manager.create(&request)?;
                println!("{}", volume.name);
                Ok(())
            }

            Commands::List { format, quiet } => {
                let volumes = manager.list()?;

                if quiet {
                    for volume in volumes {
                        println!("{}", volume.name);
                    }
                } else if format == ListFormat::Json {
                    let list = volumes
                        .iter()
                        .map(Volume::status)
                        .collect::<Result<Vec<_>, _>>()?;
                    println!("{}", serde_json::to_string_pretty(&list)?);
                } else {
                    println!("NAME\tFS\tSIZE\tALLOCATED\tMOUNTPOINT");
                    for volume in volumes {
                        let fs = volume
                            .filesystem()
                            .map_or_else(|_| "unknown".to_string(), |fs| fs.to_string());
                        println!(
                            "{}\t{}\t{}\t{}\t{}",
                            volume.name,
                            fs,
                            ByteSize::bytes(volume.max_size_bytes),
                            ByteSize::bytes(volume.allocated_size_bytes),
                            volume.mount_point.display()
                        );
                    }
                }
                Ok(())
            }

            Commands::Inspect { name } => {
                let status = manager.get(&name)?.status()?;
                println!("{}", serde_json::to_string_pretty(&status)?);
                Ok(())
            }

            Commands::Path { name } => {
                println!("{}", manager.path(&name)?.display());
                Ok(())
            }

            Commands::Mount { name, lease } => {
                println!("{}", manager.mount(&name, &lease)?.display());
                Ok(())
            }

            Commands::Unmount { name, lease } => {
                manager.unmount(&name, &lease)?;
                Ok(())
            }

            Commands::Remove { name } => {
                manager.delete(&name)?;
                println!("{name}");
                Ok(())
            }

            Commands::Check => check(),
        }
    }
}

fn check() -> Result<()> {
    let report = ToolReport::probe();

    for (tool, path) in &report.tools {
        match path {
            Some(path) => println!("{tool}\t{}", path.display()),
            None => println!("{tool}\tmissing"),
        }
    }

    if !report.is_available("mkfs.ext4") && !report.is_available("mkfs.xfs") {
        return Err(eyre!("neither mkfs.ext4 nor mkfs.xfs is installed"));
    }
    Ok(())
}
