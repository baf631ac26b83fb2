use thiserror::Error;

/// Failures surfaced by the attendance core and the directory modules.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        CoreError::Forbidden(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation(message.into())
    }

    /// Wire code used in IPC error responses.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "not_found",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::Conflict(_) => "conflict",
            CoreError::Validation(_) => "bad_params",
            CoreError::Db(_) => "db_query_failed",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::Conflict(_))
    }
}

/// Turns a UNIQUE constraint violation into `Conflict`, leaving other
/// database failures as they are.
pub fn map_unique_violation(e: rusqlite::Error, what: &str) -> CoreError {
    if let rusqlite::Error::SqliteFailure(ref f, _) = e {
        if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        {
            return CoreError::Conflict(format!("{} already exists", what));
        }
    }
    CoreError::Db(e)
}
