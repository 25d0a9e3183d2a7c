use serde::Serialize;

use super::entry::HostEntry;
use super::parser::{parse_port, HostValidationError};

pub const DEFAULT_PORT: u16 = 22;

/// Launch-ready view of a host entry, handed to whatever spawns `ssh`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedHost {
    pub alias: String,
    pub hostname: String,
    pub user: Option<String>,
    pub port: u16,
    pub identity_file: Option<String>,
    pub server_alive_interval: Option<u32>,
    pub server_alive_count_max: Option<u32>,
    pub proxy: Option<String>,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl ResolvedHost {
    pub fn from_entry(entry: &HostEntry) -> Result<Self, HostValidationError> {
        let port = match non_empty(entry.port()) {
            Some(raw) => parse_port(&raw).ok_or(HostValidationError::InvalidPort(raw))?,
            None => DEFAULT_PORT,
        };

        let directive_u32 =
            |key: &str| non_empty(entry.directives.get(key)).and_then(|v| v.parse().ok());

        Ok(Self {
            alias: entry.host.clone(),
            hostname: non_empty(entry.host_name()).unwrap_or_else(|| entry.host.clone()),
            user: non_empty(entry.user()),
            port,
            identity_file: non_empty(entry.identity_file()),
            server_alive_interval: directive_u32("ServerAliveInterval"),
            server_alive_count_max: directive_u32("ServerAliveCountMax"),
            proxy: non_empty(entry.directives.get("ProxyJump"))
                .or_else(|| non_empty(entry.directives.get("ProxyCommand"))),
        })
    }

    /// Argument vector for an `ssh` invocation, excluding the program name.
    pub fn ssh_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.port != DEFAULT_PORT {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.clone());
        }
        if let Some(interval) = self.server_alive_interval {
            args.push("-o".to_string());
            args.push(format!("ServerAliveInterval={}", interval));
        }
        if let Some(count) = self.server_alive_count_max {
            args.push("-o".to_string());
            args.push(format!("ServerAliveCountMax={}", count));
        }
        match &self.user {
            Some(user) => args.push(format!("{}@{}", user, self.hostname)),
            None => args.push(self.hostname.clone()),
        }
        args
    }
}
