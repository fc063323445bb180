use std::fmt;
use std::path::PathBuf;

/// Result type for harvesting operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Error types for one acquisition or pipeline run
#[derive(thiserror::Error, Debug)]
pub enum HarvestError {
    /// Bad credentials, rejected captcha, or a failed federation handshake
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The discovery service answered with something we cannot interpret
    #[error("video discovery failed: {0}")]
    Discovery(String),

    /// The history log (or another piece of local state) is not usable
    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An external tool failed, could not be spawned, or left no output
    #[error("command `{command}` failed: {reason}")]
    Processing { command: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl HarvestError {
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    pub fn discovery(msg: impl Into<String>) -> Self {
        Self::Discovery(msg.into())
    }

    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn processing(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Processing {
            command: command.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::Discovery(_) => ErrorKind::Discovery,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Processing { .. } => ErrorKind::Processing,
            Self::Http(_) => ErrorKind::Network,
        }
    }
}

/// Coarse classification carried by a failed acquisition outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    Discovery,
    Storage,
    Processing,
    Network,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::Discovery => "discovery",
            ErrorKind::Storage => "storage",
            ErrorKind::Processing => "processing",
            ErrorKind::Network => "network",
        };
        f.write_str(name)
    }
}
