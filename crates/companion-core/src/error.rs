use thiserror::Error;

/// Failures reported by a vault's storage layer.
///
/// `Conflict` is the expected outcome when two triggers race to create the
/// same folder or note; callers recover from it locally. Everything else
/// aborts the current operation.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("already exists: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid vault path: {0:?}")]
    InvalidPath(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict(_))
    }

    /// Map an `io::Error` to the structured kind for `path`.
    pub fn from_io(path: &str, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::AlreadyExists => StorageError::Conflict(path.to_string()),
            std::io::ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            _ => StorageError::Io {
                path: path.to_string(),
                source,
            },
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
