//! Connection configuration and live connection handles.
//!
//! Raw entries come straight from the connections file. They are classified
//! once, at ingest, into [`ConnectionEntry::Owned`] or
//! [`ConnectionEntry::Foreign`]; nothing downstream inspects optional fields
//! to decide ownership again.

use crate::error::{Result, SyncError};
use crate::pool::dialect::Dialect;
use crate::pool::driver::{Driver, QueryLog, QueryLogger};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{warn, Level};

/// Raw connection entry as written in configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    #[serde(default)]
    pub dialect: Option<String>,
    /// Marker set by other data layers sharing the same connection map.
    #[serde(default)]
    pub adapter: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default, alias = "username")]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub options: ConnectionOptions,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOptions {
    #[serde(default)]
    pub dialect: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub logging: LogSetting,
    #[serde(default)]
    pub pool: Option<PoolOptions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolOptions {
    #[serde(default)]
    pub max: Option<u32>,
}

/// `logging` accepts `true`, `false` or a level name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum LogSetting {
    Flag(bool),
    Level(String),
}

impl Default for LogSetting {
    fn default() -> Self {
        LogSetting::Flag(false)
    }
}

impl LogSetting {
    /// Resolve the setting against the caller's logger.
    pub fn normalize(&self, logger: &QueryLogger) -> Option<QueryLog> {
        let level = match self {
            LogSetting::Flag(false) => return None,
            LogSetting::Flag(true) => Level::DEBUG,
            LogSetting::Level(name) => parse_level(name),
        };
        Some(QueryLog {
            level,
            logger: logger.clone(),
        })
    }
}

fn parse_level(name: &str) -> Level {
    match name.trim().to_ascii_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" | "warning" => Level::WARN,
        "info" => Level::INFO,
        "debug" | "verbose" => Level::DEBUG,
        "trace" | "silly" => Level::TRACE,
        other => {
            warn!("Unknown logging level '{}', falling back to debug", other);
            Level::DEBUG
        }
    }
}

/// Where an owned connection points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    Url(String),
    Credentials {
        database: String,
        user: Option<String>,
        password: Option<String>,
        host: String,
        port: Option<u16>,
    },
}

impl ConnectionTarget {
    /// Render the target as a connection URL for `dialect`.
    pub fn url(&self, dialect: &Dialect) -> String {
        match self {
            ConnectionTarget::Url(url) => url.clone(),
            ConnectionTarget::Credentials {
                database,
                user,
                password,
                host,
                port,
            } => {
                let auth = match (user, password) {
                    (Some(user), Some(password)) => {
                        // URL-encode password to handle special characters
                        format!("{}:{}@", user, urlencoding::encode(password))
                    }
                    (Some(user), None) => format!("{}@", user),
                    (None, _) => String::new(),
                };
                let port = port.or_else(|| dialect.default_port());
                let address = match port {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.clone(),
                };
                format!("{}://{}{}/{}", dialect.url_scheme(), auth, address, database)
            }
        }
    }
}

/// A connection entry this subsystem is responsible for.
#[derive(Debug, Clone)]
pub struct OwnedConnection {
    pub name: String,
    pub dialect: Dialect,
    pub target: ConnectionTarget,
    pub logging: Option<QueryLog>,
    pub max_pool_size: Option<u32>,
}

impl OwnedConnection {
    pub fn url(&self) -> String {
        self.target.url(&self.dialect)
    }
}

/// Ingest-time classification of a configuration entry.
#[derive(Debug, Clone)]
pub enum ConnectionEntry {
    Owned(OwnedConnection),
    Foreign { name: String, reason: String },
}

impl ConnectionConfig {
    /// Classify this entry. Entries with an adapter marker or no dialect
    /// belong to another data layer.
    pub fn classify(&self, name: &str, logger: &QueryLogger) -> Result<ConnectionEntry> {
        if let Some(adapter) = &self.adapter {
            return Ok(ConnectionEntry::Foreign {
                name: name.to_string(),
                reason: format!("adapter '{}'", adapter),
            });
        }

        let dialect = match self.dialect.as_ref().or(self.options.dialect.as_ref()) {
            Some(dialect) => Dialect::from_name(dialect),
            None => {
                return Ok(ConnectionEntry::Foreign {
                    name: name.to_string(),
                    reason: "no dialect".to_string(),
                })
            }
        };

        let target = if let Some(url) = &self.url {
            ConnectionTarget::Url(url.clone())
        } else {
            let database = self.database.clone().ok_or_else(|| {
                SyncError::InvalidConnectionConfig {
                    connection: name.to_string(),
                    message: "either `url` or `database` must be set".to_string(),
                }
            })?;
            ConnectionTarget::Credentials {
                database,
                user: self.user.clone(),
                password: self.password.clone(),
                host: self
                    .options
                    .host
                    .clone()
                    .unwrap_or_else(|| "localhost".to_string()),
                port: self.options.port,
            }
        };

        Ok(ConnectionEntry::Owned(OwnedConnection {
            name: name.to_string(),
            dialect,
            target,
            logging: self.options.logging.normalize(logger),
            max_pool_size: self.options.pool.as_ref().and_then(|p| p.max),
        }))
    }
}

/// Live handle bound to one owned connection entry.
pub struct Connection {
    name: String,
    dialect: Dialect,
    driver: Arc<dyn Driver>,
}

impl Connection {
    pub fn new(name: &str, driver: Arc<dyn Driver>) -> Self {
        Self {
            name: name.to_string(),
            dialect: driver.dialect(),
            driver,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("dialect", &self.dialect)
            .finish()
    }
}
