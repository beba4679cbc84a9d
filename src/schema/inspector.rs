//! Live index introspection.
//!
//! Introspection is best-effort: a failed query is logged and reported as
//! "no indexes", which makes the caller fall back to requesting everything.

use crate::pool::{Connection, Dialect};
use crate::schema::ddl::quote_ident;
use serde::Serialize;
use tracing::debug;

// Index names are unique per schema, so an unqualified table is looked up
// in the session's current schema only.
const PG_INDEXES_SQL: &str = "SELECT indexname::text, indexdef::text FROM pg_indexes \
     WHERE tablename = $1 AND schemaname = current_schema()";
const PG_INDEXES_IN_SCHEMA_SQL: &str =
    "SELECT indexname::text, indexdef::text FROM pg_indexes WHERE tablename = $1 AND schemaname = $2";

// Column positions in SHOW INDEX output.
const MYSQL_KEY_NAME: usize = 2;
const MYSQL_COLUMN_NAME: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExistingIndex {
    pub name: String,
    /// Column names in key order; empty when the dialect does not report them.
    pub columns: Vec<String>,
    /// Raw index definition, when the dialect provides one.
    pub definition: Option<String>,
}

pub struct IndexInspector;

impl IndexInspector {
    pub fn new() -> Self {
        Self
    }

    pub async fn list_existing(
        &self,
        connection: &Connection,
        table: &str,
        schema: Option<&str>,
    ) -> Vec<ExistingIndex> {
        let dialect = connection.dialect();

        let result = match dialect {
            Dialect::Postgres => self.list_postgres(connection, table, schema).await,
            d if d.is_mysql_family() => self.list_mysql(connection, table, schema).await,
            other => {
                debug!("No index introspection for dialect {}", other);
                return Vec::new();
            }
        };

        match result {
            Ok(indexes) => {
                debug!(
                    "Found {} existing indexes on {} ({})",
                    indexes.len(),
                    table,
                    connection.name()
                );
                indexes
            }
            Err(e) => {
                debug!(
                    "Index introspection failed for {} on {}: {}",
                    table,
                    connection.name(),
                    e
                );
                Vec::new()
            }
        }
    }

    async fn list_postgres(
        &self,
        connection: &Connection,
        table: &str,
        schema: Option<&str>,
    ) -> crate::error::Result<Vec<ExistingIndex>> {
        let rows = match schema {
            Some(schema) => {
                connection
                    .driver()
                    .query_text(PG_INDEXES_IN_SCHEMA_SQL, &[table, schema])
                    .await?
            }
            None => connection.driver().query_text(PG_INDEXES_SQL, &[table]).await?,
        };

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let mut cells = row.into_iter();
                let name = cells.next().flatten()?;
                let definition = cells.next().flatten();
                Some(ExistingIndex {
                    name,
                    columns: Vec::new(),
                    definition,
                })
            })
            .collect())
    }

    async fn list_mysql(
        &self,
        connection: &Connection,
        table: &str,
        schema: Option<&str>,
    ) -> crate::error::Result<Vec<ExistingIndex>> {
        let dialect = connection.dialect();
        let target = match schema {
            Some(schema) => format!(
                "{}.{}",
                quote_ident(dialect, schema)?,
                quote_ident(dialect, table)?
            ),
            None => quote_ident(dialect, table)?,
        };

        let rows = connection
            .driver()
            .query_text(&format!("SHOW INDEX FROM {}", target), &[])
            .await?;

        Ok(group_show_index_rows(rows))
    }
}

impl Default for IndexInspector {
    fn default() -> Self {
        Self::new()
    }
}

/// One entry per key name, in first-seen order, columns in row order.
fn group_show_index_rows(rows: Vec<Vec<Option<String>>>) -> Vec<ExistingIndex> {
    let mut indexes: Vec<ExistingIndex> = Vec::new();

    for row in rows {
        let name = match row.get(MYSQL_KEY_NAME).cloned().flatten() {
            Some(name) => name,
            None => continue,
        };
        let column = row.get(MYSQL_COLUMN_NAME).cloned().flatten();

        match indexes.iter_mut().find(|index| index.name == name) {
            Some(index) => index.columns.extend(column),
            None => indexes.push(ExistingIndex {
                name,
                columns: column.into_iter().collect(),
                definition: None,
            }),
        }
    }

    indexes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, SyncError};
    use crate::model::IndexSpec;
    use crate::pool::{Driver, TextRow};
    use crate::schema::filter_pending;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct ScriptedDriver {
        dialect: Dialect,
        rows: Vec<TextRow>,
        fail: bool,
        seen: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl ScriptedDriver {
        fn new(dialect: Dialect, rows: Vec<TextRow>) -> Self {
            Self {
                dialect,
                rows,
                fail: false,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Driver for ScriptedDriver {
        fn dialect(&self) -> Dialect {
            self.dialect.clone()
        }

        async fn query_text(&self, sql: &str, params: &[&str]) -> Result<Vec<TextRow>> {
            self.seen.lock().unwrap().push((
                sql.to_string(),
                params.iter().map(|p| p.to_string()).collect(),
            ));
            if self.fail {
                return Err(SyncError::QueryFailed {
                    connection: String::new(),
                    cause: "relation does not exist".to_string(),
                    detail: None,
                });
            }
            Ok(self.rows.clone())
        }

        async fn execute(&self, _sql: &str) -> Result<()> {
            Ok(())
        }
    }

    /// `pg_indexes` stand-in holding `(schema, table, index)` rows.
    struct CatalogDriver {
        current_schema: &'static str,
        indexes: Vec<(&'static str, &'static str, &'static str)>,
    }

    #[async_trait]
    impl Driver for CatalogDriver {
        fn dialect(&self) -> Dialect {
            Dialect::Postgres
        }

        async fn query_text(&self, sql: &str, params: &[&str]) -> Result<Vec<TextRow>> {
            let schema = if sql.contains("current_schema()") {
                Some(self.current_schema)
            } else {
                params.get(1).copied()
            };
            Ok(self
                .indexes
                .iter()
                .filter(|(s, table, _)| *table == params[0] && schema.map_or(true, |want| *s == want))
                .map(|(_, _, name)| vec![Some(name.to_string()), None])
                .collect())
        }

        async fn execute(&self, _sql: &str) -> Result<()> {
            Ok(())
        }
    }

    fn row(cells: &[Option<&str>]) -> TextRow {
        cells.iter().map(|c| c.map(str::to_string)).collect()
    }

    fn mysql_row(key: &str, column: &str) -> TextRow {
        row(&[
            Some("user_roles"),
            Some("1"),
            Some(key),
            Some("1"),
            Some(column),
        ])
    }

    #[tokio::test]
    async fn test_postgres_rows_become_indexes() {
        let driver = Arc::new(ScriptedDriver::new(
            Dialect::Postgres,
            vec![row(&[
                Some("user_pkey"),
                Some("CREATE UNIQUE INDEX user_pkey ON public.\"user\" USING btree (id)"),
            ])],
        ));
        let connection = Connection::new("main", driver.clone());

        let indexes = IndexInspector::new()
            .list_existing(&connection, "user", Some("public"))
            .await;

        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].name, "user_pkey");
        assert!(indexes[0].definition.as_deref().unwrap().contains("btree"));

        let seen = driver.seen.lock().unwrap();
        assert_eq!(seen[0].0, PG_INDEXES_IN_SCHEMA_SQL);
        assert_eq!(seen[0].1, vec!["user".to_string(), "public".to_string()]);
    }

    #[tokio::test]
    async fn test_mysql_rows_group_by_key_name() {
        let driver = Arc::new(ScriptedDriver::new(
            Dialect::Mysql,
            vec![
                mysql_row("PRIMARY", "id"),
                mysql_row("user_roles_userId_roleId", "userId"),
                mysql_row("user_roles_userId_roleId", "roleId"),
            ],
        ));
        let connection = Connection::new("shop", driver.clone());

        let indexes = IndexInspector::new()
            .list_existing(&connection, "user_roles", None)
            .await;

        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[0].name, "PRIMARY");
        assert_eq!(indexes[1].name, "user_roles_userId_roleId");
        assert_eq!(indexes[1].columns, vec!["userId", "roleId"]);
        assert_eq!(driver.seen.lock().unwrap()[0].0, "SHOW INDEX FROM `user_roles`");
    }

    #[tokio::test]
    async fn test_mysql_table_name_is_quoted() {
        let driver = Arc::new(ScriptedDriver::new(Dialect::Mysql, Vec::new()));
        let connection = Connection::new("shop", driver.clone());

        IndexInspector::new()
            .list_existing(&connection, "users`; DROP TABLE x", None)
            .await;

        assert_eq!(
            driver.seen.lock().unwrap()[0].0,
            "SHOW INDEX FROM `users``; DROP TABLE x`"
        );
    }

    #[tokio::test]
    async fn test_empty_mysql_table_yields_empty_list() {
        let driver = Arc::new(ScriptedDriver::new(Dialect::Mysql, Vec::new()));
        let connection = Connection::new("shop", driver.clone());

        let indexes = IndexInspector::new().list_existing(&connection, "", None).await;

        assert!(indexes.is_empty());
        assert!(driver.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_failure_yields_empty_list() {
        let mut driver = ScriptedDriver::new(Dialect::Postgres, Vec::new());
        driver.fail = true;
        let connection = Connection::new("main", Arc::new(driver));

        let indexes = IndexInspector::new()
            .list_existing(&connection, "missing", None)
            .await;

        assert!(indexes.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_dialect_issues_no_query() {
        let driver = Arc::new(ScriptedDriver::new(Dialect::Sqlite, Vec::new()));
        let connection = Connection::new("local", driver.clone());

        let indexes = IndexInspector::new()
            .list_existing(&connection, "user", None)
            .await;

        assert!(indexes.is_empty());
        assert!(driver.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unqualified_table_ignores_other_schemas() {
        let driver = Arc::new(CatalogDriver {
            current_schema: "public",
            indexes: vec![("audit", "user", "user_a_b")],
        });
        let connection = Connection::new("main", driver);

        let existing = IndexInspector::new()
            .list_existing(&connection, "user", None)
            .await;
        assert!(existing.is_empty());

        let pending = vec![IndexSpec::new(["a", "b"])];
        let kept = filter_pending(&pending, "user", &Dialect::Postgres, &existing);
        assert_eq!(kept.len(), 1);
    }

    #[tokio::test]
    async fn test_unqualified_table_sees_current_schema() {
        let driver = Arc::new(CatalogDriver {
            current_schema: "public",
            indexes: vec![("audit", "user", "user_a_b"), ("public", "user", "user_a_b")],
        });
        let connection = Connection::new("main", driver);

        let existing = IndexInspector::new()
            .list_existing(&connection, "user", None)
            .await;
        assert_eq!(existing.len(), 1);

        let audit = IndexInspector::new()
            .list_existing(&connection, "user", Some("audit"))
            .await;
        assert_eq!(audit.len(), 1);
    }
}
