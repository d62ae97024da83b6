use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("invalid {var}: {message}")]
    Config { var: &'static str, message: String },
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image {0} not found in registry")]
    ImageNotFound(String),
    #[error("refusing unsafe path {0} in image")]
    UnsafePath(PathBuf),
    #[error("unsupported crontab {0:?}")]
    Crontab(String),
    #[error("command {command} failed: {message}")]
    Command { command: String, message: String },
}

impl HostError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HostError::Io {
            path: path.into(),
            source,
        }
    }
}
