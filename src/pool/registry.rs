use crate::error::{Result, SyncError};
use crate::pool::connection::{Connection, ConnectionConfig, ConnectionEntry, OwnedConnection};
use crate::pool::dialect::Dialect;
use crate::pool::driver::{Driver, DriverFactory, QueryLogger};
use crate::pool::mysql::MysqlDriver;
use crate::pool::postgres::PostgresDriver;
use crate::pool::sqlite::SqliteDriver;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builds the shipped Postgres, MySQL-family and SQLite drivers.
pub struct NativeDriverFactory {
    max_connections_per_pool: u32,
}

impl NativeDriverFactory {
    pub fn new(max_connections_per_pool: u32) -> Self {
        Self {
            max_connections_per_pool,
        }
    }
}

impl DriverFactory for NativeDriverFactory {
    fn create(&self, connection: &OwnedConnection) -> Result<Arc<dyn Driver>> {
        let max_size = connection
            .max_pool_size
            .unwrap_or(self.max_connections_per_pool);
        let url = connection.url();

        match &connection.dialect {
            Dialect::Postgres => Ok(Arc::new(PostgresDriver::new(
                &connection.name,
                &url,
                max_size,
                connection.logging.clone(),
            )?)),
            dialect if dialect.is_mysql_family() => Ok(Arc::new(MysqlDriver::new(
                &connection.name,
                dialect.clone(),
                &url,
                max_size,
                connection.logging.clone(),
            )?)),
            Dialect::Sqlite => Ok(Arc::new(SqliteDriver::new(
                &connection.name,
                &connection.target,
                connection.logging.clone(),
            )?)),
            other => Err(SyncError::UnsupportedDialect {
                connection: connection.name.clone(),
                dialect: other.to_string(),
            }),
        }
    }
}

/// Owned entry left out of the registry because no driver speaks its dialect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedConnection {
    pub connection: String,
    pub dialect: String,
}

/// Live connections owned by this subsystem, keyed by configuration name.
/// Built once at startup and held for the process lifetime.
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<Connection>>,
    skipped: Vec<SkippedConnection>,
    default_name: String,
}

impl ConnectionRegistry {
    pub fn build(
        configs: &BTreeMap<String, ConnectionConfig>,
        default_name: &str,
        logger: &QueryLogger,
        max_connections_per_pool: u32,
    ) -> Result<Self> {
        let factory = NativeDriverFactory::new(max_connections_per_pool);
        Self::build_with(configs, default_name, logger, &factory)
    }

    pub fn build_with(
        configs: &BTreeMap<String, ConnectionConfig>,
        default_name: &str,
        logger: &QueryLogger,
        factory: &dyn DriverFactory,
    ) -> Result<Self> {
        if !configs.contains_key(default_name) {
            return Err(SyncError::DefaultConnectionMissing {
                name: default_name.to_string(),
            });
        }

        let connections = DashMap::new();
        let mut skipped = Vec::new();

        for (name, config) in configs {
            match config.classify(name, logger)? {
                ConnectionEntry::Foreign { name, reason } => {
                    debug!("Skipping connection {} ({})", name, reason);
                }
                ConnectionEntry::Owned(owned) => match factory.create(&owned) {
                    Ok(driver) => {
                        info!("Created {} connection: {}", owned.dialect, owned.name);
                        connections.insert(
                            owned.name.clone(),
                            Arc::new(Connection::new(&owned.name, driver)),
                        );
                    }
                    Err(SyncError::UnsupportedDialect { connection, dialect }) => {
                        warn!(
                            "Skipping connection {}: no driver for dialect {}",
                            connection, dialect
                        );
                        skipped.push(SkippedConnection {
                            connection,
                            dialect,
                        });
                    }
                    Err(e) => return Err(e),
                },
            }
        }

        Ok(Self {
            connections,
            skipped,
            default_name: default_name.to_string(),
        })
    }

    pub fn get(&self, name: &str) -> Option<Arc<Connection>> {
        self.connections.get(name).map(|entry| entry.value().clone())
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// Owned entries whose dialect has no driver, in configuration order.
    pub fn skipped(&self) -> &[SkippedConnection] {
        &self.skipped
    }

    pub fn is_skipped(&self, name: &str) -> bool {
        self.skipped.iter().any(|entry| entry.connection == name)
    }

    /// Connection names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
