//! OpenSSH client config codec.
//!
//! Parsing is best effort and line-local: a malformed line is skipped, never
//! the whole file.

use log::{debug, warn};
use thiserror::Error;

use super::entry::{Directives, HostEntry};

/// Directives emitted first, in this order, when serializing a host.
pub const PRIORITY_DIRECTIVES: &[&str] = &[
    "HostName",
    "User",
    "Port",
    "IdentityFile",
    "ProxyCommand",
    "ProxyJump",
    "ForwardAgent",
    "ServerAliveInterval",
    "ServerAliveCountMax",
    "StrictHostKeyChecking",
    "UserKnownHostsFile",
    "ConnectTimeout",
    "IdentitiesOnly",
];

const CANONICAL_NAMES: &[(&str, &str)] = &[
    ("hostname", "HostName"),
    ("user", "User"),
    ("port", "Port"),
    ("identityfile", "IdentityFile"),
    ("proxycommand", "ProxyCommand"),
    ("proxyjump", "ProxyJump"),
    ("proxyhost", "ProxyHost"),
    ("proxyport", "ProxyPort"),
    ("identitiesonly", "IdentitiesOnly"),
    ("forwardagent", "ForwardAgent"),
    ("forwardx11", "ForwardX11"),
    ("serveraliveinterval", "ServerAliveInterval"),
    ("serveralivecountmax", "ServerAliveCountMax"),
    ("stricthostkeychecking", "StrictHostKeyChecking"),
    ("userknownhostsfile", "UserKnownHostsFile"),
    ("connecttimeout", "ConnectTimeout"),
    ("localforward", "LocalForward"),
    ("remoteforward", "RemoteForward"),
    ("dynamicforward", "DynamicForward"),
    ("controlmaster", "ControlMaster"),
    ("controlpath", "ControlPath"),
    ("controlpersist", "ControlPersist"),
    ("addkeystoagent", "AddKeysToAgent"),
    ("usekeychain", "UseKeychain"),
    ("loglevel", "LogLevel"),
    ("compression", "Compression"),
    ("certificatefile", "CertificateFile"),
    ("preferredauthentications", "PreferredAuthentications"),
    ("passwordauthentication", "PasswordAuthentication"),
    ("pubkeyauthentication", "PubkeyAuthentication"),
    ("hostkeyalgorithms", "HostKeyAlgorithms"),
    ("sendenv", "SendEnv"),
    ("setenv", "SetEnv"),
    ("requesttty", "RequestTTY"),
    ("remotecommand", "RemoteCommand"),
    ("tcpkeepalive", "TCPKeepAlive"),
    ("batchmode", "BatchMode"),
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostValidationError {
    #[error("host must not be empty")]
    EmptyHost,

    #[error("host '{0}' already exists")]
    DuplicateHost(String),

    #[error("port '{0}' must be an integer between 1 and 65535")]
    InvalidPort(String),
}

/// Canonical spelling of a directive name.
pub fn canonical_directive(name: &str) -> String {
    let lower = name.to_lowercase();
    if let Some((_, canonical)) = CANONICAL_NAMES.iter().find(|(k, _)| *k == lower) {
        return (*canonical).to_string();
    }

    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Splits a logical line into directive and value.
fn split_line(line: &str) -> Option<(&str, String)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let split_at = line.find(char::is_whitespace).unwrap_or(line.len());
    let (key, rest) = line.split_at(split_at);
    let mut value = rest.trim();

    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value = &value[1..value.len() - 1];
    }

    Some((key, value.trim().to_string()))
}

/// Joins backslash continuations into logical lines.
fn logical_lines(content: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut lines = content.lines();

    while let Some(line) = lines.next() {
        let mut current = line.trim().to_string();
        while current.ends_with('\\') {
            current.pop();
            let head_len = current.trim_end().len();
            current.truncate(head_len);
            match lines.next() {
                Some(next) => {
                    let next = next.trim();
                    if !next.is_empty() {
                        if !current.is_empty() {
                            current.push(' ');
                        }
                        current.push_str(next);
                    }
                }
                None => break,
            }
        }
        result.push(current);
    }

    result
}

enum Section {
    Preamble,
    Host(String, Directives),
    Match,
}

fn close_section(section: Section, entries: &mut Vec<HostEntry>) {
    if let Section::Host(host, mut directives) = section {
        if host.is_empty() {
            return;
        }
        directives.ensure_basic();
        entries.push(HostEntry::new(host, directives));
    }
}

/// Parses SSH config text into host entries, preserving file order.
///
/// `Match` blocks and directives before the first `Host` line are skipped, so
/// serializing the result does not reproduce them.
pub fn parse(content: &str) -> Vec<HostEntry> {
    let mut entries = Vec::new();
    let mut section = Section::Preamble;
    let mut dropped = 0usize;

    for (index, line) in logical_lines(content).into_iter().enumerate() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = split_line(&line) else {
            debug!("Skipping malformed ssh config line {}: {:?}", index + 1, line);
            continue;
        };

        match key.to_lowercase().as_str() {
            // An empty host still opens a section; close_section drops it.
            "host" => {
                close_section(std::mem::replace(&mut section, Section::Preamble), &mut entries);
                section = Section::Host(value, Directives::new());
            }
            "match" => {
                close_section(std::mem::replace(&mut section, Section::Match), &mut entries);
                dropped += 1;
            }
            _ if value.is_empty() => {
                debug!("Skipping directive '{}' without a value on line {}", key, index + 1);
            }
            _ => match &mut section {
                Section::Host(_, directives) => directives.set(canonical_directive(key), value),
                Section::Preamble | Section::Match => {
                    debug!("Ignoring directive '{}' outside a Host block", key);
                    dropped += 1;
                }
            },
        }
    }

    close_section(section, &mut entries);
    if dropped > 0 {
        warn!(
            "{} ssh config line(s) outside Host blocks (Match blocks, global directives) are ignored and not written back",
            dropped
        );
    }
    entries
}

fn format_value(value: &str) -> String {
    if value.contains(char::is_whitespace) && !value.starts_with('"') && !value.ends_with('"') {
        format!("\"{}\"", value)
    } else {
        value.to_string()
    }
}

/// Formats host entries as SSH config text.
pub fn serialize(entries: &[HostEntry]) -> String {
    let mut content = String::new();

    for entry in entries {
        content.push_str(&format!("Host {}\n", entry.host));

        for key in PRIORITY_DIRECTIVES {
            if let Some(value) = entry.directives.get(key).filter(|v| !v.is_empty()) {
                content.push_str(&format!("    {} {}\n", key, format_value(value)));
            }
        }

        let mut rest: Vec<(&str, &str)> = entry
            .directives
            .iter()
            .filter(|(k, v)| !PRIORITY_DIRECTIVES.contains(k) && !v.is_empty())
            .collect();
        rest.sort_by(|a, b| a.0.cmp(b.0));

        for (key, value) in rest {
            content.push_str(&format!("    {} {}\n", key, format_value(value)));
        }

        content.push('\n');
    }

    content
}

/// Parses a port directive value; `None` when absent or out of range.
pub fn parse_port(value: &str) -> Option<u16> {
    match value.trim().parse::<u32>() {
        Ok(port) if (1..=65535).contains(&port) => Some(port as u16),
        _ => None,
    }
}

/// Checks a candidate entry against the rest of the document.
///
/// Entries sharing the candidate's id are the candidate itself and are not
/// considered duplicates.
pub fn validate_entry(
    candidate: &HostEntry,
    existing: &[HostEntry],
) -> Result<(), HostValidationError> {
    if candidate.host.trim().is_empty() {
        return Err(HostValidationError::EmptyHost);
    }

    if existing
        .iter()
        .any(|e| e.id != candidate.id && e.host == candidate.host)
    {
        return Err(HostValidationError::DuplicateHost(candidate.host.clone()));
    }

    if let Some(port) = candidate.port().filter(|p| !p.is_empty()) {
        if parse_port(port).is_none() {
            return Err(HostValidationError::InvalidPort(port.to_string()));
        }
    }

    Ok(())
}
