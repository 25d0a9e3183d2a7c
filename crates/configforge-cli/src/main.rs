//! `cf`: command line front end for the ConfigForge engine.

mod cli;
mod commands;
mod error;

use std::process::ExitCode;

use clap::Parser;
use configforge::config::expand_tilde;
use configforge::Settings;
use tracing_subscriber::{fmt, EnvFilter};

use cli::{Cli, Command};
use error::{CliError, Result};

fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .finish();

    tracing_log::LogTracer::init().map_err(|e| CliError::Logging(e.to_string()))?;
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| CliError::Logging(e.to_string()))?;
    Ok(())
}

fn resolve_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::load(cli.settings.as_deref())?;
    if let Some(path) = &cli.ssh_config {
        settings.ssh_config_path = expand_tilde(path);
    }
    if let Some(dir) = &cli.kube_dir {
        settings.kube_dir = expand_tilde(dir);
    }
    Ok(settings)
}

fn run(cli: Cli) -> Result<()> {
    init_logging(cli.verbose)?;
    let settings = resolve_settings(&cli)?;
    tracing::debug!(
        ssh_config = %settings.ssh_config_path.display(),
        kube_dir = %settings.kube_dir.display(),
        "Resolved settings"
    );

    match cli.command {
        Command::Ssh(command) => commands::ssh::run(&settings, command),
        Command::Kube(command) => commands::kube::run(&settings, command),
    }
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
