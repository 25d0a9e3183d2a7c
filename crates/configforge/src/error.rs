use std::path::PathBuf;
use thiserror::Error;

use crate::kube::codec::StructuralError;
use crate::ssh::parser::HostValidationError;

#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("Cannot access '{path}': {message}")]
    FileAccess { path: PathBuf, message: String },

    #[error("Failed to read '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write '{path}': {source}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    ParseYaml(String),

    #[error("Failed to serialize YAML: {0}")]
    SerializeYaml(String),

    #[error("Invalid Kubernetes config: {0}")]
    InvalidKubeConfig(#[from] StructuralError),

    #[error("Invalid host entry: {0}")]
    InvalidHost(#[from] HostValidationError),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("File already exists: {0}")]
    Conflict(PathBuf),

    #[error("Operation not permitted on '{path}': {reason}")]
    NotPermitted { path: PathBuf, reason: String },

    #[error("Host not found: {0}")]
    HostNotFound(String),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Unexpected error: {0}")]
    Unknown(String),
}

/// Coarse error category, used by front ends to pick a message style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    FileAccess,
    ConfigRead,
    ConfigWrite,
    Parsing,
    Validation,
    Conflict,
    Watch,
    Unknown,
}

impl ForgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ForgeError::FileAccess { .. } | ForgeError::NotPermitted { .. } => {
                ErrorKind::FileAccess
            }
            ForgeError::ConfigRead { .. } => ErrorKind::ConfigRead,
            ForgeError::ConfigWrite { .. } => ErrorKind::ConfigWrite,
            ForgeError::ParseYaml(_) | ForgeError::SerializeYaml(_) => ErrorKind::Parsing,
            ForgeError::InvalidKubeConfig(_)
            | ForgeError::InvalidHost(_)
            | ForgeError::Validation(_)
            | ForgeError::HostNotFound(_) => ErrorKind::Validation,
            ForgeError::Conflict(_) => ErrorKind::Conflict,
            ForgeError::Watch(_) => ErrorKind::Watch,
            ForgeError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    pub(crate) fn access(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        ForgeError::FileAccess {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ForgeError::ConfigRead {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ForgeError::ConfigWrite {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_yaml::Error> for ForgeError {
    fn from(err: serde_yaml::Error) -> Self {
        ForgeError::ParseYaml(err.to_string())
    }
}

impl From<notify::Error> for ForgeError {
    fn from(err: notify::Error) -> Self {
        ForgeError::Watch(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ForgeError>;
