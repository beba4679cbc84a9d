use crate::error::{Result, SyncError};
use crate::pool::dialect::Dialect;
use crate::pool::driver::{Driver, QueryLog, TextRow};
use async_trait::async_trait;
use deadpool_postgres::{Config as PoolConfig, Object, Pool, Runtime};
use postgres_types::ToSql;
use std::time::Duration;
use tokio_postgres::NoTls;

pub struct PostgresDriver {
    name: String,
    pool: Pool,
    logging: Option<QueryLog>,
}

impl PostgresDriver {
    pub fn new(
        name: &str,
        database_url: &str,
        max_size: u32,
        logging: Option<QueryLog>,
    ) -> Result<Self> {
        let pool = create_pool(database_url, max_size).map_err(|e| {
            SyncError::InvalidConnectionConfig {
                connection: name.to_string(),
                message: e.to_string(),
            }
        })?;

        Ok(Self {
            name: name.to_string(),
            pool,
            logging,
        })
    }

    async fn client(&self) -> Result<Object> {
        self.pool
            .get()
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
impl Driver for PostgresDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn query_text(&self, sql: &str, params: &[&str]) -> Result<Vec<TextRow>> {
        self.log(sql);
        let client = self.client().await?;

        let params: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        let rows = client
            .query(sql, &params)
            .await
            .map_err(|e| SyncError::from(e).on_connection(&self.name))?;

        let mut result = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut values = Vec::with_capacity(row.len());
            for idx in 0..row.len() {
                let value: Option<String> = row
                    .try_get(idx)
                    .map_err(|e| SyncError::from(e).on_connection(&self.name))?;
                values.push(value);
            }
            result.push(values);
        }

        Ok(result)
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        self.log(sql);
        let client = self.client().await?;

        client
            .batch_execute(sql)
            .await
            .map_err(|e| SyncError::from(e).on_connection(&self.name))
    }
}

fn create_pool(database_url: &str, max_size: u32) -> Result<Pool> {
    let mut cfg = PoolConfig::new();
    cfg.url = Some(database_url.to_string());

    cfg.pool = Some(deadpool_postgres::PoolConfig {
        max_size: max_size as usize,
        timeouts: deadpool_postgres::Timeouts {
            wait: Some(Duration::from_secs(5)),
            create: Some(Duration::from_secs(5)),
            recycle: Some(Duration::from_secs(5)),
        },
        ..Default::default()
    });

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| SyncError::Internal(format!("Failed to create pool: {}", e)))
}
