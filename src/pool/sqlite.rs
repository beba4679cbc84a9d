use crate::error::{Result, SyncError};
use crate::pool::connection::ConnectionTarget;
use crate::pool::dialect::Dialect;
use crate::pool::driver::{Driver, QueryLog, TextRow};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use tokio::sync::OnceCell;
use tokio_rusqlite::Connection;

const MEMORY: &str = ":memory:";

/// SQLite driver. The database file is opened on first use and the one
/// connection is kept for the process lifetime; SQLite serializes writers
/// anyway.
pub struct SqliteDriver {
    name: String,
    path: String,
    conn: OnceCell<Connection>,
    logging: Option<QueryLog>,
}

impl SqliteDriver {
    pub fn new(name: &str, target: &ConnectionTarget, logging: Option<QueryLog>) -> Result<Self> {
        let path = database_path(target);
        if path.is_empty() {
            return Err(SyncError::InvalidConnectionConfig {
                connection: name.to_string(),
                message: "SQLite connections need a database path".to_string(),
            });
        }

        Ok(Self {
            name: name.to_string(),
            path,
            conn: OnceCell::new(),
            logging,
        })
    }

    async fn conn(&self) -> Result<&Connection> {
        self.conn
            .get_or_try_init(|| async {
                let opened = if self.path == MEMORY {
                    Connection::open_in_memory().await
                } else {
                    Connection::open(&self.path).await
                };
                opened.map_err(|e| SyncError::ConnectionFailed {
                    database: self.name.clone(),
                    cause: e.to_string(),
                })
            })
            .await
    }

    fn log(&self, sql: &str) {
        if let Some(logging) = &self.logging {
            logging.log(&self.name, sql);
        }
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn query_text(&self, sql: &str, params: &[&str]) -> Result<Vec<TextRow>> {
        self.log(sql);
        let sql = sql.to_string();
        let params: Vec<String> = params.iter().map(|p| p.to_string()).collect();

        self.conn()
            .await?
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let width = stmt.column_count();

                let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
                    (0..width)
                        .map(|idx| row.get_ref(idx).map(value_to_text))
                        .collect::<rusqlite::Result<TextRow>>()
                })?;

                let results: std::result::Result<Vec<_>, _> = rows.collect();
                Ok(results?)
            })
            .await
            .map_err(|e| SyncError::from(e).on_connection(&self.name))
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        self.log(sql);
        let sql = sql.to_string();

        self.conn()
            .await?
            .call(move |conn| Ok(conn.execute_batch(&sql)?))
            .await
            .map_err(|e| SyncError::from(e).on_connection(&self.name))
    }
}

/// File path for a SQLite target: a `sqlite:` URL with its scheme
/// stripped, or the configured database name as-is.
fn database_path(target: &ConnectionTarget) -> String {
    match target {
        ConnectionTarget::Url(url) => url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url)
            .to_string(),
        ConnectionTarget::Credentials { database, .. } => database.clone(),
    }
}

fn value_to_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(v) => Some(v.to_string()),
        ValueRef::Real(v) => Some(v.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
