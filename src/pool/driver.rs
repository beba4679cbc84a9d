//! Driver seam between the convergence logic and a concrete database client.
//!
//! Every database round-trip the synchronizer makes goes through [`Driver`]:
//! index introspection, schema namespace listing/creation and the structural
//! sync primitive. The shipped drivers live in `pool::postgres`,
//! `pool::mysql` and `pool::sqlite`; tests use in-memory implementations.

use crate::error::Result;
use crate::pool::connection::OwnedConnection;
use crate::pool::dialect::Dialect;
use crate::schema::ddl;
use crate::schema::SyncModel;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::Level;

/// A result row with every column rendered as text.
pub type TextRow = Vec<Option<String>>;

/// Flags handed to the structural sync primitive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFlags {
    pub force_recreate: bool,
    pub allow_alter: bool,
}

/// Caller-supplied sink for statement logging: `(level, connection, sql)`.
pub type QueryLogger = Arc<dyn Fn(Level, &str, &str) + Send + Sync>;

/// Resolved statement logging for one connection.
#[derive(Clone)]
pub struct QueryLog {
    pub level: Level,
    pub logger: QueryLogger,
}

impl QueryLog {
    pub fn log(&self, connection: &str, sql: &str) {
        (self.logger)(self.level, connection, sql);
    }
}

impl std::fmt::Debug for QueryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryLog").field("level", &self.level).finish()
    }
}

/// Logger that forwards statements to `tracing` at the requested level.
pub fn tracing_query_logger() -> QueryLogger {
    Arc::new(|level, connection, sql| match level {
        Level::ERROR => tracing::error!("[{}] {}", connection, sql),
        Level::WARN => tracing::warn!("[{}] {}", connection, sql),
        Level::INFO => tracing::info!("[{}] {}", connection, sql),
        Level::DEBUG => tracing::debug!("[{}] {}", connection, sql),
        _ => tracing::trace!("[{}] {}", connection, sql),
    })
}

const LIST_SCHEMAS_SQL: &str = "SELECT schema_name::text FROM information_schema.schemata";

#[async_trait]
pub trait Driver: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Run a query and return every column as text.
    async fn query_text(&self, sql: &str, params: &[&str]) -> Result<Vec<TextRow>>;

    /// Run one or more statements that return no rows.
    async fn execute(&self, sql: &str) -> Result<()>;

    async fn list_schemas(&self) -> Result<Vec<String>> {
        let rows = self.query_text(LIST_SCHEMAS_SQL, &[]).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().flatten())
            .collect())
    }

    async fn create_schema(&self, schema: &str) -> Result<()> {
        let sql = ddl::create_schema(&self.dialect(), schema)?;
        self.execute(&sql).await
    }

    /// Structural sync primitive. The default renders basic DDL through
    /// [`Driver::execute`]; hosts with a richer schema tool override it.
    async fn sync(&self, models: &[SyncModel<'_>], flags: SyncFlags) -> Result<()> {
        ddl::sync_models(self, models, flags).await
    }
}

/// Builds drivers for owned connection entries.
pub trait DriverFactory: Send + Sync {
    fn create(&self, connection: &OwnedConnection) -> Result<Arc<dyn Driver>>;
}
