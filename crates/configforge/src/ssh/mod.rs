//! OpenSSH client configuration.

pub mod entry;
pub mod manager;
pub mod parser;
pub mod resolve;

pub use entry::{Directives, HostEntry};
pub use manager::SshConfigManager;
pub use parser::{parse, serialize, validate_entry, HostValidationError};
pub use resolve::ResolvedHost;
