use rusqlite::ErrorCode;

/// Error taxonomy shared by the stores and the engine.
///
/// The variants map one-to-one onto propagation policy: `InputInvalid` is
/// rejected synchronously, `NotFound` degrades to a null read or a no-op
/// delete, `Conflict` is deduplicated or reported depending on the write,
/// `Transient` is retryable with bounded attempts, and `Fatal` goes to the
/// operator, never to the user.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InputInvalid(String),

    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(&'static str),

    #[error("transient: {0}")]
    Transient(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl CoreError {
    /// Retryable with bounded attempts.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Transient(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::Conflict(_))
    }
}

/// Classify a raw SQLite error into the taxonomy.
///
/// Unique-constraint hits become `Conflict`; lock contention and busy
/// timeouts become `Transient`; everything else (schema drift, corrupt
/// file) is `Fatal`.
fn classify_sqlite(err: rusqlite::Error) -> CoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) => match e.code {
            ErrorCode::ConstraintViolation => CoreError::Conflict("unique constraint"),
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                CoreError::Transient(err.to_string())
            }
            _ => CoreError::Fatal(err.to_string()),
        },
        rusqlite::Error::QueryReturnedNoRows => CoreError::NotFound("row"),
        _ => CoreError::Fatal(err.to_string()),
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        classify_sqlite(err)
    }
}

impl From<tokio_rusqlite::Error> for CoreError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Rusqlite(e) => classify_sqlite(e),
            tokio_rusqlite::Error::ConnectionClosed => {
                CoreError::Transient("database connection closed".to_string())
            }
            other => CoreError::Fatal(other.to_string()),
        }
    }
}
