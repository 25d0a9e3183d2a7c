//! SSH host commands.

use std::sync::Arc;

use configforge::ssh::parser::{self, canonical_directive};
use configforge::{
    Directives, FileStore, ForgeError, HostEntry, ResolvedHost, Settings, SshConfigManager,
};
use serde::Serialize;

use super::print_json;
use crate::cli::SshCommand;
use crate::error::{CliError, Result};

/// Host summary for list output.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSummary {
    pub host: String,
    pub host_name: Option<String>,
    pub user: Option<String>,
    pub port: Option<String>,
    pub directives: Vec<(String, String)>,
}

impl From<&HostEntry> for HostSummary {
    fn from(entry: &HostEntry) -> Self {
        Self {
            host: entry.host.clone(),
            host_name: entry.host_name().map(str::to_string),
            user: entry.user().map(str::to_string),
            port: entry.port().map(str::to_string),
            directives: entry
                .directives
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// Parses `-o Key=Value` pairs. Keys are canonicalised; a later key replaces
/// an earlier one.
pub fn parse_options(options: &[String]) -> Result<Directives> {
    let mut directives = Directives::new();
    for option in options {
        let (key, value) = option
            .split_once('=')
            .ok_or_else(|| CliError::Usage(format!("expected KEY=VALUE, got '{}'", option)))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::Usage(format!("missing key in '{}'", option)));
        }
        directives.set(canonical_directive(key), value.trim());
    }
    Ok(directives)
}

pub fn run(settings: &Settings, command: SshCommand) -> Result<()> {
    let manager = SshConfigManager::new(&settings.ssh_config_path, Arc::new(FileStore::new()));

    match command {
        SshCommand::List { detail, list } => {
            let hosts = manager.get_all_hosts()?;
            if list.json {
                let summaries: Vec<HostSummary> = hosts.iter().map(HostSummary::from).collect();
                return print_json(&summaries);
            }
            if hosts.is_empty() {
                println!("No hosts in {}", manager.path().display());
                return Ok(());
            }
            for entry in &hosts {
                if detail {
                    println!("Host {}", entry.host);
                    for (key, value) in entry.directives.iter() {
                        println!("    {} {}", key, value);
                    }
                } else {
                    let target = entry.host_name().unwrap_or(&entry.host);
                    match entry.user() {
                        Some(user) => println!("{:<24} {}@{}", entry.host, user, target),
                        None => println!("{:<24} {}", entry.host, target),
                    }
                }
            }
        }
        SshCommand::Show { host } => {
            let entry = manager
                .find_host(&host)?
                .ok_or(ForgeError::HostNotFound(host))?;
            print!("{}", parser::serialize(std::slice::from_ref(&entry)));
            let resolved = ResolvedHost::from_entry(&entry).map_err(ForgeError::from)?;
            println!();
            println!("ssh {}", resolved.ssh_args().join(" "));
        }
        SshCommand::Add { host, options } => {
            let directives = parse_options(&options)?;
            let entry = manager.add_host(&host, directives)?;
            println!("Added host '{}'", entry.host);
        }
        SshCommand::Remove { host } => {
            let removed = manager.delete_host_named(&host)?;
            println!("Removed host '{}'", removed.host);
        }
        SshCommand::Backup { dir } => {
            let target = manager.backup_to(&dir)?;
            println!("Backed up to {}", target.display());
        }
        SshCommand::Restore { file } => {
            manager.restore_from(&file)?;
            println!("Restored {} from {}", manager.path().display(), file.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options_canonicalises_keys() {
        let directives =
            parse_options(&["hostname=10.0.0.1".to_string(), "USER = deploy".to_string()])
                .expect("options parse");
        assert_eq!(directives.get("HostName"), Some("10.0.0.1"));
        assert_eq!(directives.get("User"), Some("deploy"));
    }

    #[test]
    fn test_parse_options_last_value_wins() {
        let directives = parse_options(&["Port=22".to_string(), "port=2222".to_string()])
            .expect("options parse");
        assert_eq!(directives.len(), 1);
        assert_eq!(directives.get("Port"), Some("2222"));
    }

    #[test]
    fn test_parse_options_rejects_missing_separator() {
        let err = parse_options(&["HostName".to_string()]).unwrap_err();
        assert!(matches!(err, CliError::Usage(_)));
    }

    #[test]
    fn test_parse_options_rejects_empty_key() {
        let err = parse_options(&["=value".to_string()]).unwrap_err();
        assert!(matches!(err, CliError::Usage(_)));
    }
}
