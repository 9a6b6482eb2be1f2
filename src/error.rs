use reqwest::StatusCode;

/// Failure inside the local store layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store thread is gone (channel closed during shutdown).
    #[error("store unavailable")]
    Unavailable,

    #[error("store i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// A schema migration step failed for a reason other than "already applied".
/// Fatal for the store-open attempt; the engine must not run on a
/// partially-migrated schema.
#[derive(Debug, thiserror::Error)]
#[error("migration to schema v{version} failed: {source}")]
pub struct MigrationError {
    pub version: i64,
    #[source]
    pub source: rusqlite::Error,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unreachable host, timeout, or an unexpected status. Recoverable:
    /// the sync layer falls back to cached data.
    #[error("network error: {0}")]
    Network(String),

    /// 401 — recoverable via a single token refresh.
    #[error("unauthorized")]
    Unauthorized,

    /// 403 — never retried; forces sign-out.
    #[error("forbidden")]
    Forbidden,

    /// Login rejected the identifier/secret pair.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// An operation that needs a session ran without one.
    #[error("no active session")]
    SignedOut,

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// The OS credential slot rejected a read or write.
    #[error("credential store: {0}")]
    Credentials(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Network(format!("request timed out: {e}"))
        } else {
            Error::Network(e.to_string())
        }
    }
}

impl Error {
    /// Map a non-2xx response status onto the taxonomy.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => Error::Unauthorized,
            StatusCode::FORBIDDEN => Error::Forbidden,
            _ => Error::Network(format!("unexpected status {status}: {body}")),
        }
    }
}
