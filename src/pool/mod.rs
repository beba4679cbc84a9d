//! Connection layer
//!
//! Classifies configured connection entries, builds a driver for every entry
//! this subsystem owns and keeps them for the process lifetime.

mod connection;
mod dialect;
mod driver;
mod mysql;
mod postgres;
mod registry;
mod sqlite;

pub use connection::{
    Connection, ConnectionConfig, ConnectionEntry, ConnectionOptions, ConnectionTarget, LogSetting,
    OwnedConnection, PoolOptions,
};
pub use dialect::Dialect;
pub use driver::{
    tracing_query_logger, Driver, DriverFactory, QueryLog, QueryLogger, SyncFlags, TextRow,
};
pub use mysql::MysqlDriver;
pub use postgres::PostgresDriver;
pub use registry::{ConnectionRegistry, NativeDriverFactory, SkippedConnection};
pub use sqlite::SqliteDriver;
