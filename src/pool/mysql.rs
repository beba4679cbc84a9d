use crate::error::{Result, SyncError};
use crate::pool::dialect::Dialect;
use crate::pool::driver::{Driver, QueryLog, TextRow};
use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, OptsBuilder, Params, Pool, PoolConstraints, PoolOpts, Row, Value};

/// MySQL / MariaDB driver backed by a `mysql_async` pool.
pub struct MysqlDriver {
    name: String,
    dialect: Dialect,
    pool: Pool,
    logging: Option<QueryLog>,
}

impl MysqlDriver {
    pub fn new(
        name: &str,
        dialect: Dialect,
        database_url: &str,
        max_size: u32,
        logging: Option<QueryLog>,
    ) -> Result<Self> {
        let opts = Opts::from_url(database_url).map_err(|e| SyncError::InvalidConnectionConfig {
            connection: name.to_string(),
            message: e.to_string(),
        })?;

        let constraints =
            PoolConstraints::new(1, (max_size as usize).max(1)).unwrap_or_default();
        let opts = OptsBuilder::from_opts(opts)
            .pool_opts(PoolOpts::new().with_constraints(constraints));

        Ok(Self {
            name: name.to_string(),
            dialect,
            pool: Pool::new(Opts::from(opts)),
            logging,
        })
    }

    async fn conn(&self) -> Result<Conn> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| SyncError::ConnectionFailed {
                database: self.name.clone(),
                cause: e.to_string(),
            })
    }

    fn log(&self, sql: &str) {
        if let Some(logging) = &self.logging {
            logging.log(&self.name, sql);
        }
    }
}

#[async_trait]
impl Driver for MysqlDriver {
    fn dialect(&self) -> Dialect {
        self.dialect.clone()
    }

    async fn query_text(&self, sql: &str, params: &[&str]) -> Result<Vec<TextRow>> {
        self.log(sql);
        let mut conn = self.conn().await?;

        // SHOW statements go over the text protocol; parameterized queries are prepared.
        let rows: Vec<Row> = if params.is_empty() {
            conn.query(sql).await
        } else {
            let params = Params::Positional(params.iter().map(|p| Value::from(*p)).collect());
            conn.exec(sql, params).await
        }
        .map_err(|e| SyncError::from(e).on_connection(&self.name))?;

        Ok(rows
            .iter()
            .map(|row| {
                (0..row.len())
                    .map(|idx| row.as_ref(idx).and_then(value_to_text))
                    .collect()
            })
            .collect())
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        self.log(sql);
        let mut conn = self.conn().await?;

        conn.query_drop(sql)
            .await
            .map_err(|e| SyncError::from(e).on_connection(&self.name))
    }
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Int(v) => Some(v.to_string()),
        Value::UInt(v) => Some(v.to_string()),
        Value::Float(v) => Some(v.to_string()),
        Value::Double(v) => Some(v.to_string()),
        other => Some(other.as_sql(true)),
    }
}
