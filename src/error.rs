use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Resource not found in VFS: {path}")]
    NotFound { path: String },

    #[error("Permission denied: {path}\nCheck that the configured user may read and write this resource.")]
    PermissionDenied { path: String },

    #[error("Name conflict: {path}\nA resource with this name already exists under a different identity.")]
    NameConflict { path: String },

    #[error("Connection to the repository failed: {message}\nIs the server running? Check the connection URL and credentials.")]
    ConnectionFailure { message: String },

    #[error("Not connected to the repository")]
    NotConnected,

    #[error("Local I/O error on {path}\nCause: {source}")]
    LocalIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Repository protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// True when no further repository operation may be attempted in this job
    pub fn is_job_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailure { .. } | SyncError::NotConnected
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound { .. })
    }

    pub(crate) fn local_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::LocalIo {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Format bytes for human-readable display
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
