use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the helper.
///
/// Every variant is a distinct kind; callers can match on [`Error::kind`]
/// without caring about the payload.
#[derive(Debug, Error)]
pub enum Error {
    /// A connection could not be opened or used.
    #[error("connectivity error: {message}")]
    Connectivity {
        message: String,
        #[source]
        source: rusqlite::Error,
    },

    /// The database rejected a statement.
    #[error("statement error: {source} (sql: {sql})")]
    Statement {
        sql: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Input rejected before any I/O took place.
    #[error("validation error: {0}")]
    Validation(String),

    /// A result value could not be converted to a model field's type.
    #[error("cannot convert column `{field}` of `{table}`: {reason}")]
    TypeCoercion {
        table: String,
        field: String,
        reason: String,
    },
}

/// Fieldless discriminant of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connectivity,
    Statement,
    Validation,
    TypeCoercion,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connectivity { .. } => ErrorKind::Connectivity,
            Error::Statement { .. } => ErrorKind::Statement,
            Error::Validation(_) => ErrorKind::Validation,
            Error::TypeCoercion { .. } => ErrorKind::TypeCoercion,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub(crate) fn connectivity(message: impl Into<String>, source: rusqlite::Error) -> Self {
        Error::Connectivity {
            message: message.into(),
            source,
        }
    }

    pub(crate) fn statement(sql: impl Into<String>, source: rusqlite::Error) -> Self {
        Error::Statement {
            sql: sql.into(),
            source,
        }
    }
}
