use configforge::ForgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Forge(#[from] ForgeError),

    #[error("{0}")]
    Usage(String),

    #[error("Failed to format output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to initialise logging: {0}")]
    Logging(String),

    #[error("Failed to install Ctrl-C handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;
