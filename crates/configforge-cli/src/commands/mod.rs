//! Subcommand handlers.
//!
//! - `ssh`: host entries in the SSH client config
//! - `kube`: stored Kubernetes configs and the active config

pub mod kube;
pub mod ssh;

use serde::Serialize;

use crate::error::Result;

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
