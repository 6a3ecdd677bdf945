//! Error types for Mariner operations.
//!
//! The taxonomy follows the DB-API convention used by MariaDB client
//! libraries: interface misuse, statement/programming errors, data errors,
//! server-reported database errors, pool errors and configuration errors.

use std::fmt;

/// The primary error type for all Mariner operations.
#[derive(Debug)]
pub enum Error {
    /// Misuse of the client API surface (e.g. a closed cursor reused)
    Interface(InterfaceError),
    /// Malformed statement, parameter mismatch, invalid pool or TPC usage
    Programming(ProgrammingError),
    /// Parameter/type mismatch, out-of-range positions
    Data(DataError),
    /// Errors reported by or concerning the database server
    Database(DatabaseError),
    /// Connection pool errors
    Pool(PoolError),
    /// Configuration errors
    Config(ConfigError),
    /// I/O errors
    Io(std::io::Error),
}

/// Misuse of the API surface itself.
#[derive(Debug)]
pub struct InterfaceError {
    pub message: String,
}

/// A statement or API call that can never succeed as written.
#[derive(Debug)]
pub struct ProgrammingError {
    pub message: String,
}

/// Supplied data does not fit what the statement requires.
#[derive(Debug)]
pub struct DataError {
    pub message: String,
}

#[derive(Debug)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
    pub message: String,
    /// Five-character SQLSTATE reported by the server, if any
    pub sqlstate: Option<String>,
    /// Server error code (e.g. 1062 for a duplicate key)
    pub server_code: Option<u16>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    /// Connection establishment or loss, timeouts, server gone away
    Operational,
    /// Statement execution failed server-side
    Execution,
    /// Integrity constraint violation
    Integrity,
}

#[derive(Debug)]
pub struct PoolError {
    pub kind: PoolErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolErrorKind {
    /// No idle connection available (acquisition never blocks)
    Exhausted,
    /// Pool has no stored connection configuration
    NoConfig,
    /// Connection table is already at capacity
    Capacity,
    /// Pool has been closed
    Closed,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl Error {
    /// Create an [`InterfaceError`].
    pub fn interface(message: impl Into<String>) -> Self {
        Error::Interface(InterfaceError {
            message: message.into(),
        })
    }

    /// Create a [`ProgrammingError`].
    pub fn programming(message: impl Into<String>) -> Self {
        Error::Programming(ProgrammingError {
            message: message.into(),
        })
    }

    /// Create a [`DataError`].
    pub fn data(message: impl Into<String>) -> Self {
        Error::Data(DataError {
            message: message.into(),
        })
    }

    /// Create an operational [`DatabaseError`] without server context.
    pub fn operational(message: impl Into<String>) -> Self {
        Error::Database(DatabaseError {
            kind: DatabaseErrorKind::Operational,
            message: message.into(),
            sqlstate: None,
            server_code: None,
            source: None,
        })
    }

    /// Create a pool error of the given kind.
    pub fn pool(kind: PoolErrorKind, message: impl Into<String>) -> Self {
        Error::Pool(PoolError {
            kind,
            message: message.into(),
        })
    }

    /// Create a [`ConfigError`].
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
        })
    }

    /// Get the SQLSTATE if the server reported one.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Database(e) => e.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Is this an error that invalidates the underlying connection?
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Database(e) => e.kind == DatabaseErrorKind::Operational,
            Error::Io(_) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Interface(e) => write!(f, "Interface error: {}", e.message),
            Error::Programming(e) => write!(f, "Programming error: {}", e.message),
            Error::Data(e) => write!(f, "Data error: {}", e.message),
            Error::Database(e) => match (&e.sqlstate, e.server_code) {
                (Some(state), Some(code)) => {
                    write!(f, "Database error {} ({}): {}", code, state, e.message)
                }
                (Some(state), None) => {
                    write!(f, "Database error ({}): {}", state, e.message)
                }
                _ => write!(f, "Database error: {}", e.message),
            },
            Error::Pool(e) => write!(f, "Pool error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<DatabaseError> for Error {
    fn from(err: DatabaseError) -> Self {
        Error::Database(err)
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        Error::Pool(err)
    }
}

/// Result type alias for Mariner operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_map_to_variants() {
        assert!(matches!(Error::interface("x"), Error::Interface(_)));
        assert!(matches!(Error::programming("x"), Error::Programming(_)));
        assert!(matches!(Error::data("x"), Error::Data(_)));
        assert!(matches!(Error::operational("x"), Error::Database(_)));
        assert!(matches!(
            Error::pool(PoolErrorKind::Exhausted, "x"),
            Error::Pool(PoolError {
                kind: PoolErrorKind::Exhausted,
                ..
            })
        ));
    }

    #[test]
    fn sqlstate_helper() {
        let err = Error::Database(DatabaseError {
            kind: DatabaseErrorKind::Integrity,
            message: "Duplicate entry".to_string(),
            sqlstate: Some("23000".to_string()),
            server_code: Some(1062),
            source: None,
        });
        assert_eq!(err.sqlstate(), Some("23000"));
        assert!(!err.is_connection_error());
        assert_eq!(
            err.to_string(),
            "Database error 1062 (23000): Duplicate entry"
        );
    }

    #[test]
    fn connection_error_flags() {
        assert!(Error::operational("server has gone away").is_connection_error());
        assert!(!Error::programming("empty statement").is_connection_error());
    }
}
