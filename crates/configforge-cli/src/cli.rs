use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Manage SSH hosts and Kubernetes configs.
#[derive(Parser, Debug)]
#[command(name = "cf", version)]
#[command(about = "Manage SSH hosts and switch between Kubernetes configs")]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Settings file (default: <config dir>/configforge/settings.yaml)
    #[arg(long, global = true, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// SSH client config to operate on
    #[arg(long, global = true, value_name = "FILE")]
    pub ssh_config: Option<PathBuf>,

    /// Kubernetes config directory (contains config and configs/)
    #[arg(long, global = true, value_name = "DIR")]
    pub kube_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// SSH host entries
    #[command(subcommand)]
    Ssh(SshCommand),

    /// Kubernetes configs
    #[command(subcommand)]
    Kube(KubeCommand),
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum SshCommand {
    /// List hosts
    List {
        /// Show every directive
        #[arg(long)]
        detail: bool,

        #[command(flatten)]
        list: ListArgs,
    },

    /// Show one host and the ssh command line it resolves to
    Show { host: String },

    /// Add a host
    Add {
        host: String,

        /// Directive as Key=Value, may be repeated
        #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,
    },

    /// Remove a host
    Remove { host: String },

    /// Copy the config into a directory with a timestamped name
    Backup { dir: PathBuf },

    /// Replace the config with a backup
    Restore { file: PathBuf },
}

#[derive(Subcommand, Debug)]
pub enum KubeCommand {
    /// List stored configs
    List(ListArgs),

    /// Show the active config
    Current,

    /// Activate a stored config
    Use { name: String },

    /// Create a stored config from a file
    Create {
        name: String,

        #[arg(long, value_name = "FILE")]
        from: PathBuf,
    },

    /// Copy a stored config under a new name
    Duplicate { source: String, target: String },

    /// Rename a stored config
    Rename { source: String, target: String },

    /// Delete a stored config
    Delete { name: String },

    /// Save the active config as a backup in configs/
    Backup {
        #[arg(long)]
        name: Option<String>,
    },

    /// List backups
    Backups(ListArgs),

    /// Replace the active config with a backup
    Restore { name: String },

    /// Validate one stored config, or all of them
    Validate { name: Option<String> },

    /// Print store events until interrupted
    Watch,
}
