use rusqlite::ffi;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FasError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification callers use to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidInput,
    StorageFailure,
    Internal,
}

impl FasError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        FasError::NotFound { entity, id: id.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FasError::NotFound { .. } => ErrorKind::NotFound,
            FasError::Conflict(_) => ErrorKind::Conflict,
            FasError::InvalidInput(_) | FasError::JsonError(_) => ErrorKind::InvalidInput,
            FasError::Database(_) => ErrorKind::StorageFailure,
            FasError::Config(_) | FasError::Io(_) | FasError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Map an insert/update failure, turning unique-key violations into `Conflict`.
    pub fn from_insert(err: rusqlite::Error, entity: &str) -> Self {
        if is_unique_violation(&err) {
            FasError::Conflict(format!("An entry for the {} already exists", entity))
        } else {
            FasError::Database(err)
        }
    }
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
                && (e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

pub type Result<T> = std::result::Result<T, FasError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_unique_violation_maps_to_conflict() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (name TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();

        let err = conn.execute("INSERT INTO t VALUES ('a')", []).unwrap_err();
        let mapped = FasError::from_insert(err, "thing");

        assert_eq!(mapped.kind(), ErrorKind::Conflict);
        assert_eq!(mapped.to_string(), "Conflict: An entry for the thing already exists");
    }

    #[test]
    fn test_other_failures_stay_storage() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn.execute("INSERT INTO missing VALUES (1)", []).unwrap_err();

        assert_eq!(FasError::from_insert(err, "thing").kind(), ErrorKind::StorageFailure);
    }
}
