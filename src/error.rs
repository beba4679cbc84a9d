use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Default connection '{name}' is not present in the connection configuration")]
    DefaultConnectionMissing { name: String },

    #[error("Model identity '{identity}' is defined more than once ({first} and {second})")]
    DuplicateModel {
        identity: String,
        first: String,
        second: String,
    },

    #[error("Model {model} references unknown connection '{connection}'")]
    UnknownConnection { model: String, connection: String },

    #[error("Model {model} references unknown model '{target}'")]
    UnknownModel { model: String, target: String },

    #[error("Invalid association on {model}: {message}")]
    InvalidAssociation { model: String, message: String },

    #[error("Connection {connection} uses unsupported dialect '{dialect}'")]
    UnsupportedDialect { connection: String, dialect: String },

    #[error("Invalid configuration for connection {connection}: {message}")]
    InvalidConnectionConfig { connection: String, message: String },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Connection failed to {database}: {cause}")]
    ConnectionFailed { database: String, cause: String },

    #[error("Query failed on {connection}: {cause}")]
    QueryFailed {
        connection: String,
        cause: String,
        detail: Option<String>,
    },

    #[error("Schema convergence failed on {connection} ({failed} connection(s) failed): {cause}")]
    ConvergeFailed {
        connection: String,
        cause: String,
        detail: Option<String>,
        failed: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Nested driver-level detail, when the database reported one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            SyncError::QueryFailed { detail, .. } | SyncError::ConvergeFailed { detail, .. } => {
                detail.as_deref()
            }
            _ => None,
        }
    }

    /// Short machine-readable code used in error reports.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::DefaultConnectionMissing { .. } => "default_connection_missing",
            SyncError::DuplicateModel { .. } => "duplicate_model",
            SyncError::UnknownConnection { .. } => "unknown_connection",
            SyncError::UnknownModel { .. } => "unknown_model",
            SyncError::InvalidAssociation { .. } => "invalid_association",
            SyncError::UnsupportedDialect { .. } => "unsupported_dialect",
            SyncError::InvalidConnectionConfig { .. } => "invalid_connection_config",
            SyncError::InvalidIdentifier(_) => "invalid_identifier",
            SyncError::ConnectionFailed { .. } => "connection_failed",
            SyncError::QueryFailed { .. } => "query_failed",
            SyncError::ConvergeFailed { .. } => "converge_failed",
            SyncError::Config(_) => "config_error",
            SyncError::Internal(_) => "internal_error",
        }
    }

    /// Tag a connection-less driver error with the connection it came from.
    pub fn on_connection(self, connection: &str) -> Self {
        match self {
            SyncError::QueryFailed {
                connection: current,
                cause,
                detail,
            } if current.is_empty() => SyncError::QueryFailed {
                connection: connection.to_string(),
                cause,
                detail,
            },
            other => other,
        }
    }
}

/// Serializable form of a [`SyncError`], printed by the binary on failure.
#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&SyncError> for ErrorReport {
    fn from(err: &SyncError) -> Self {
        let connection = match err {
            SyncError::QueryFailed { connection, .. }
            | SyncError::ConvergeFailed { connection, .. }
            | SyncError::InvalidConnectionConfig { connection, .. }
            | SyncError::UnsupportedDialect { connection, .. } => Some(connection.clone()),
            SyncError::ConnectionFailed { database, .. } => Some(database.clone()),
            SyncError::UnknownConnection { connection, .. } => Some(connection.clone()),
            _ => None,
        };

        ErrorReport {
            error: err.code().to_string(),
            message: err.to_string(),
            connection,
            detail: err.detail().map(str::to_string),
        }
    }
}

impl From<tokio_postgres::Error> for SyncError {
    fn from(err: tokio_postgres::Error) -> Self {
        let detail = err.as_db_error().map(|db| match db.detail() {
            Some(extra) => format!("{} ({})", db.message(), extra),
            None => db.message().to_string(),
        });
        SyncError::QueryFailed {
            connection: String::new(),
            cause: err.to_string(),
            detail,
        }
    }
}

impl From<mysql_async::Error> for SyncError {
    fn from(err: mysql_async::Error) -> Self {
        let detail = match &err {
            mysql_async::Error::Server(server) => {
                Some(format!("{} (code {})", server.message, server.code))
            }
            _ => None,
        };
        SyncError::QueryFailed {
            connection: String::new(),
            cause: err.to_string(),
            detail,
        }
    }
}

impl From<tokio_rusqlite::Error> for SyncError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        let detail = match &err {
            tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(code, message)) => {
                Some(match message {
                    Some(message) => format!("{} ({:?})", message, code.code),
                    None => format!("{:?}", code.code),
                })
            }
            _ => None,
        };
        SyncError::QueryFailed {
            connection: String::new(),
            cause: err.to_string(),
            detail,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Config(format!("Invalid JSON: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_connection_fills_missing_name() {
        let err = SyncError::QueryFailed {
            connection: String::new(),
            cause: "relation \"user\" does not exist".to_string(),
            detail: None,
        }
        .on_connection("main");

        match err {
            SyncError::QueryFailed { connection, .. } => assert_eq!(connection, "main"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_on_connection_keeps_existing_name() {
        let err = SyncError::QueryFailed {
            connection: "analytics".to_string(),
            cause: "boom".to_string(),
            detail: None,
        }
        .on_connection("main");

        match err {
            SyncError::QueryFailed { connection, .. } => assert_eq!(connection, "analytics"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_error_report_carries_detail() {
        let err = SyncError::ConvergeFailed {
            connection: "main".to_string(),
            cause: "duplicate key".to_string(),
            detail: Some("Key (id)=(1) already exists.".to_string()),
            failed: 1,
        };
        let report = ErrorReport::from(&err);

        assert_eq!(report.error, "converge_failed");
        assert_eq!(report.connection.as_deref(), Some("main"));
        assert_eq!(report.detail.as_deref(), Some("Key (id)=(1) already exists."));
    }

    #[test]
    fn test_sqlite_failure_carries_message() {
        let err = SyncError::from(tokio_rusqlite::Error::Rusqlite(
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some("no such table: user".to_string()),
            ),
        ))
        .on_connection("cache");

        assert_eq!(err.code(), "query_failed");
        assert!(err.detail().unwrap().starts_with("no such table: user"));
        assert!(matches!(err, SyncError::QueryFailed { ref connection, .. } if connection == "cache"));
    }
}
