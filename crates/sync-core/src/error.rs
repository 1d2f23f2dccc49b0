use thiserror::Error;

/// Error kinds the sync engine and its collaborators distinguish.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("transient network error: {0}")]
    NetworkTransient(String),

    #[error("permanent network error: {0}")]
    NetworkPermanent(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Whether a failed transfer carrying this error should be retried per the
    /// retry policy (exponential backoff, up to 3 attempts).
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::NetworkTransient(_))
    }

    /// Stable kind string, used on the command/event channel's `error` field
    /// and in FileMetadata diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::NotAuthenticated => "not-authenticated",
            SyncError::InvalidArgument(_) => "invalid-argument",
            SyncError::NotFound(_) => "not-found",
            SyncError::AlreadyExists(_) => "already-exists",
            SyncError::PermissionDenied(_) => "permission-denied",
            SyncError::Io(_) => "io-error",
            SyncError::NetworkTransient(_) => "network-transient",
            SyncError::NetworkPermanent(_) => "network-permanent",
            SyncError::Conflict(_) => "conflict",
            SyncError::ResourceExhausted(_) => "resource-exhausted",
            SyncError::Cancelled => "cancelled",
            SyncError::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => SyncError::NotFound(err.to_string()),
            std::io::ErrorKind::PermissionDenied => SyncError::PermissionDenied(err.to_string()),
            _ => SyncError::Io(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
