//! Basic DDL rendering and the default structural sync primitive.
//!
//! This is deliberately small: create missing tables, drop-and-recreate on
//! request, add missing columns when altering, and create pending indexes.
//! Column type changes and constraint diffs are out of reach here.

use crate::error::{Result, SyncError};
use crate::model::{AttributeSpec, BoundModel, IndexSpec};
use crate::pool::{Dialect, Driver, SyncFlags};
use crate::schema::SyncModel;
use sha2::{Digest, Sha256};
use tracing::debug;

const NAME_HASH_LEN: usize = 8;

/// Quote `name` for `dialect`, doubling any embedded quote character.
/// Only empty names and NUL bytes are rejected.
pub fn quote_ident(dialect: &Dialect, name: &str) -> Result<String> {
    if name.is_empty() || name.contains('\0') {
        return Err(SyncError::InvalidIdentifier(name.to_string()));
    }

    let quote = if dialect.is_mysql_family() { '`' } else { '"' };
    let escaped = name.replace(quote, &format!("{0}{0}", quote));
    Ok(format!("{0}{1}{0}", quote, escaped))
}

/// `name` unchanged when it fits in `max_len` bytes. Otherwise a prefix
/// cut on a char boundary, `_`, and the leading hex digits of its SHA-256.
pub fn fit_identifier(name: &str, max_len: Option<usize>) -> String {
    let limit = match max_len {
        Some(limit) if name.len() > limit && limit > NAME_HASH_LEN + 1 => limit,
        _ => return name.to_string(),
    };

    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    let digest = hex::encode(hasher.finalize());

    let mut cut = limit - NAME_HASH_LEN - 1;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}_{}", &name[..cut], &digest[..NAME_HASH_LEN])
}

/// Name `index` is stored under on `table`. Introspected names are compared
/// against this, so it must match what [`create_index`] issues.
pub fn index_name(dialect: &Dialect, table: &str, index: &IndexSpec) -> String {
    fit_identifier(&index.derived_name(table), dialect.max_identifier_len())
}

/// Table reference, schema-qualified when the model names a schema.
pub fn qualified_table(dialect: &Dialect, model: &BoundModel) -> Result<String> {
    let table = quote_ident(dialect, &model.table_name)?;
    match &model.schema {
        Some(schema) => Ok(format!("{}.{}", quote_ident(dialect, schema)?, table)),
        None => Ok(table),
    }
}

pub fn create_schema(dialect: &Dialect, schema: &str) -> Result<String> {
    Ok(format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(dialect, schema)?))
}

/// Map an abstract attribute type to the dialect's column type.
/// `STRING(64)` style lengths are carried over; unknown types pass through.
pub fn map_type(dialect: &Dialect, abstract_type: &str) -> String {
    let trimmed = abstract_type.trim();
    let (base, args) = match trimmed.find('(') {
        Some(pos) => (trimmed[..pos].trim().to_uppercase(), Some(&trimmed[pos..])),
        None => (trimmed.to_uppercase(), None),
    };
    let mysql = dialect.is_mysql_family();
    let sqlite = *dialect == Dialect::Sqlite;

    match base.as_str() {
        "STRING" => format!("VARCHAR{}", args.unwrap_or("(255)")),
        "TEXT" => "TEXT".to_string(),
        "INTEGER" => "INTEGER".to_string(),
        "BIGINT" => "BIGINT".to_string(),
        "BOOLEAN" if mysql => "TINYINT(1)".to_string(),
        "BOOLEAN" => "BOOLEAN".to_string(),
        "DATE" if mysql || sqlite => "DATETIME".to_string(),
        "DATE" => "TIMESTAMP WITH TIME ZONE".to_string(),
        "DATEONLY" => "DATE".to_string(),
        "FLOAT" if mysql => "FLOAT".to_string(),
        "FLOAT" => "REAL".to_string(),
        "DOUBLE" => "DOUBLE PRECISION".to_string(),
        "DECIMAL" => format!("DECIMAL{}", args.unwrap_or("")),
        "UUID" if mysql => "CHAR(36) BINARY".to_string(),
        "UUID" => "UUID".to_string(),
        "JSON" => "JSON".to_string(),
        "JSONB" if mysql => "JSON".to_string(),
        "JSONB" => "JSONB".to_string(),
        _ => trimmed.to_string(),
    }
}

fn render_default(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::Bool(true) => "TRUE".to_string(),
        serde_json::Value::Bool(false) => "FALSE".to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

fn column_definition(dialect: &Dialect, column: &str, spec: &AttributeSpec) -> Result<String> {
    let name = quote_ident(dialect, column)?;
    let mut column_type = map_type(dialect, &spec.column_type);

    if spec.auto_increment && *dialect == Dialect::Postgres {
        column_type = match column_type.as_str() {
            "BIGINT" => "BIGSERIAL".to_string(),
            "INTEGER" => "SERIAL".to_string(),
            _ => column_type,
        };
    }

    let mut definition = format!("{} {}", name, column_type);
    if !spec.allow_null {
        definition.push_str(" NOT NULL");
    }
    if spec.auto_increment && dialect.is_mysql_family() {
        definition.push_str(" AUTO_INCREMENT");
    }
    if spec.unique && !spec.primary_key {
        definition.push_str(" UNIQUE");
    }
    if let Some(default) = &spec.default_value {
        definition.push_str(&format!(" DEFAULT {}", render_default(default)));
    }

    Ok(definition)
}

/// Column name for an attribute, honouring its `field` override.
fn column_for<'m>(model: &'m BoundModel, attribute: &'m str) -> &'m str {
    model
        .attributes
        .iter()
        .find(|(name, _)| name == attribute)
        .and_then(|(_, spec)| spec.field.as_deref())
        .unwrap_or(attribute)
}

fn column_list(dialect: &Dialect, model: &BoundModel, attributes: &[String]) -> Result<String> {
    let quoted: Result<Vec<String>> = attributes
        .iter()
        .map(|attribute| quote_ident(dialect, column_for(model, attribute)))
        .collect();
    Ok(quoted?.join(", "))
}

pub fn create_table(dialect: &Dialect, model: &BoundModel) -> Result<String> {
    let mut lines = Vec::new();

    for (column, spec) in model.columns() {
        lines.push(column_definition(dialect, column, spec)?);
    }

    let primary: Vec<&str> = model
        .columns()
        .filter(|(_, spec)| spec.primary_key)
        .map(|(column, _)| column)
        .collect();
    if !primary.is_empty() {
        let quoted: Result<Vec<String>> =
            primary.iter().map(|c| quote_ident(dialect, c)).collect();
        lines.push(format!("PRIMARY KEY ({})", quoted?.join(", ")));
    }

    for key in &model.unique_keys {
        lines.push(format!("UNIQUE ({})", column_list(dialect, model, key)?));
    }

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        qualified_table(dialect, model)?,
        lines.join(", ")
    ))
}

pub fn drop_table(dialect: &Dialect, model: &BoundModel) -> Result<String> {
    let table = qualified_table(dialect, model)?;
    if *dialect == Dialect::Postgres {
        Ok(format!("DROP TABLE IF EXISTS {} CASCADE", table))
    } else {
        Ok(format!("DROP TABLE IF EXISTS {}", table))
    }
}

pub fn add_column(
    dialect: &Dialect,
    model: &BoundModel,
    column: &str,
    spec: &AttributeSpec,
) -> Result<String> {
    Ok(format!(
        "ALTER TABLE {} ADD COLUMN {}",
        qualified_table(dialect, model)?,
        column_definition(dialect, column, spec)?
    ))
}

/// `CREATE [UNIQUE] INDEX`. Postgres, MariaDB and SQLite get
/// `IF NOT EXISTS`; MySQL has no such clause.
pub fn create_index(dialect: &Dialect, model: &BoundModel, index: &IndexSpec) -> Result<String> {
    let name = quote_ident(dialect, &index_name(dialect, &model.table_name, index))?;
    let unique = if index.unique { "UNIQUE " } else { "" };
    let guard = match dialect {
        Dialect::Postgres | Dialect::Mariadb | Dialect::Sqlite => "IF NOT EXISTS ",
        _ => "",
    };

    Ok(format!(
        "CREATE {}INDEX {}{} ON {} ({})",
        unique,
        guard,
        name,
        qualified_table(dialect, model)?,
        column_list(dialect, model, &index.fields)?
    ))
}

async fn existing_columns<D: Driver + ?Sized>(driver: &D, model: &BoundModel) -> Result<Vec<String>> {
    let dialect = driver.dialect();
    let rows = if dialect == Dialect::Sqlite {
        driver
            .query_text(
                "SELECT name FROM pragma_table_info(?1)",
                &[model.table_name.as_str()],
            )
            .await?
    } else if dialect.is_mysql_family() {
        match &model.schema {
            Some(schema) => {
                driver
                    .query_text(
                        "SELECT column_name FROM information_schema.columns WHERE table_name = ? AND table_schema = ?",
                        &[model.table_name.as_str(), schema.as_str()],
                    )
                    .await?
            }
            None => {
                driver
                    .query_text(
                        "SELECT column_name FROM information_schema.columns WHERE table_name = ? AND table_schema = DATABASE()",
                        &[model.table_name.as_str()],
                    )
                    .await?
            }
        }
    } else {
        let schema = model.schema.as_deref().unwrap_or("public");
        driver
            .query_text(
                "SELECT column_name::text FROM information_schema.columns WHERE table_name = $1 AND table_schema = $2",
                &[model.table_name.as_str(), schema],
            )
            .await?
    };

    Ok(rows
        .into_iter()
        .filter_map(|row| row.into_iter().next().flatten())
        .collect())
}

/// Default [`Driver::sync`]: converge each model's table in order.
pub async fn sync_models<D: Driver + ?Sized>(
    driver: &D,
    models: &[SyncModel<'_>],
    flags: SyncFlags,
) -> Result<()> {
    let dialect = driver.dialect();

    for entry in models {
        let model = entry.model;
        debug!(
            "Syncing table {} for model {} ({} pending indexes)",
            model.table_name,
            model.name,
            entry.indexes.len()
        );

        if flags.force_recreate {
            driver.execute(&drop_table(&dialect, model)?).await?;
        }

        driver.execute(&create_table(&dialect, model)?).await?;

        if flags.allow_alter {
            let existing = existing_columns(driver, model).await?;
            for (column, spec) in model.columns() {
                if existing.iter().any(|name| name == column) {
                    continue;
                }
                debug!("Adding column {}.{}", model.table_name, column);
                driver
                    .execute(&add_column(&dialect, model, column, spec)?)
                    .await?;
            }
        }

        for index in &entry.indexes {
            driver
                .execute(&create_index(&dialect, model, index)?)
                .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> BoundModel {
        let mut model = BoundModel::bare("User", "main");
        model.attributes.push((
            "email".to_string(),
            AttributeSpec::new("STRING").not_null().unique(),
        ));
        model.attributes.push((
            "active".to_string(),
            AttributeSpec {
                default_value: Some(serde_json::json!(true)),
                ..AttributeSpec::new("BOOLEAN")
            },
        ));
        model
    }

    #[test]
    fn test_quoting_per_dialect() {
        assert_eq!(quote_ident(&Dialect::Postgres, "user").unwrap(), "\"user\"");
        assert_eq!(quote_ident(&Dialect::Mysql, "user").unwrap(), "`user`");
        assert_eq!(quote_ident(&Dialect::Sqlite, "user").unwrap(), "\"user\"");
    }

    #[test]
    fn test_quoting_accepts_any_name_the_database_does() {
        assert_eq!(
            quote_ident(&Dialect::Postgres, "user-roles").unwrap(),
            "\"user-roles\""
        );
        assert_eq!(quote_ident(&Dialect::Mysql, "bad name").unwrap(), "`bad name`");
        assert_eq!(quote_ident(&Dialect::Postgres, "ñandú").unwrap(), "\"ñandú\"");
        assert_eq!(
            quote_ident(&Dialect::Postgres, &"x".repeat(80)).unwrap().len(),
            82
        );
    }

    #[test]
    fn test_embedded_quotes_are_doubled() {
        assert_eq!(
            quote_ident(&Dialect::Postgres, "a\"; DROP TABLE x; --").unwrap(),
            "\"a\"\"; DROP TABLE x; --\""
        );
        assert_eq!(
            quote_ident(&Dialect::Mysql, "users`; DROP TABLE x").unwrap(),
            "`users``; DROP TABLE x`"
        );
    }

    #[test]
    fn test_empty_or_nul_names_are_rejected() {
        assert!(matches!(
            quote_ident(&Dialect::Postgres, ""),
            Err(SyncError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            quote_ident(&Dialect::Mysql, "a\0b"),
            Err(SyncError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_create_table_with_hyphenated_name() {
        let model = BoundModel {
            table_name: "user-roles".to_string(),
            ..BoundModel::bare("UserRoles", "main")
        };

        let sql = create_table(&Dialect::Postgres, &model).unwrap();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"user-roles\" ("));
    }

    #[test]
    fn test_long_index_names_fit_the_dialect_limit() {
        let model = BoundModel::bare("project_assignment_roles", "main");
        let index = IndexSpec::new(["projectAssignmentId", "organizationRoleIds"]);
        let derived = index.derived_name(&model.table_name);
        assert_eq!(derived.len(), 64);

        let pg = index_name(&Dialect::Postgres, &model.table_name, &index);
        assert_eq!(pg.len(), 63);
        assert!(pg.starts_with("project_assignment_roles_projectAssignmentId_organizat_"));
        assert_ne!(pg, derived);

        // 64 bytes fits MySQL's limit as-is.
        assert_eq!(index_name(&Dialect::Mysql, &model.table_name, &index), derived);
        assert_eq!(index_name(&Dialect::Sqlite, &model.table_name, &index), derived);

        let sql = create_index(&Dialect::Postgres, &model, &index).unwrap();
        assert!(sql.starts_with(&format!("CREATE INDEX IF NOT EXISTS \"{}\" ON", pg)));
    }

    #[test]
    fn test_fit_identifier() {
        assert_eq!(fit_identifier("short", Some(63)), "short");
        assert_eq!(fit_identifier(&"x".repeat(100), None), "x".repeat(100));

        let long = format!("{}_{}", "a".repeat(40), "b".repeat(40));
        let fitted = fit_identifier(&long, Some(63));
        assert_eq!(fitted.len(), 63);
        assert_eq!(fitted, fit_identifier(&long, Some(63)));
        assert_ne!(
            fitted,
            fit_identifier(&format!("{}_{}", "a".repeat(40), "c".repeat(40)), Some(63))
        );

        // Multi-byte characters are never split.
        let fitted = fit_identifier(&"é".repeat(40), Some(63));
        assert!(fitted.len() <= 63);
        assert!(fitted.starts_with("éé"));
    }

    #[test]
    fn test_type_mapping() {
        assert_eq!(map_type(&Dialect::Postgres, "STRING"), "VARCHAR(255)");
        assert_eq!(map_type(&Dialect::Postgres, "string(64)"), "VARCHAR(64)");
        assert_eq!(map_type(&Dialect::Postgres, "DATE"), "TIMESTAMP WITH TIME ZONE");
        assert_eq!(map_type(&Dialect::Mysql, "DATE"), "DATETIME");
        assert_eq!(map_type(&Dialect::Sqlite, "DATE"), "DATETIME");
        assert_eq!(map_type(&Dialect::Mysql, "BOOLEAN"), "TINYINT(1)");
        assert_eq!(map_type(&Dialect::Mariadb, "JSONB"), "JSON");
        assert_eq!(map_type(&Dialect::Postgres, "DECIMAL(10,2)"), "DECIMAL(10,2)");
        assert_eq!(map_type(&Dialect::Postgres, "CITEXT"), "CITEXT");
    }

    #[test]
    fn test_create_table_postgres() {
        let sql = create_table(&Dialect::Postgres, &user()).unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"user\" (\"id\" SERIAL NOT NULL, \
             \"email\" VARCHAR(255) NOT NULL UNIQUE, \"active\" BOOLEAN DEFAULT TRUE, \
             PRIMARY KEY (\"id\"))"
        );
    }

    #[test]
    fn test_create_table_mysql_with_unique_key() {
        let mut junction = BoundModel::bare("user_roles", "main");
        junction
            .attributes
            .push(("userId".to_string(), AttributeSpec::new("INTEGER").not_null()));
        junction
            .attributes
            .push(("roleId".to_string(), AttributeSpec::new("INTEGER").not_null()));
        junction
            .unique_keys
            .push(vec!["userId".to_string(), "roleId".to_string()]);

        let sql = create_table(&Dialect::Mysql, &junction).unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS `user_roles` (`id` INTEGER NOT NULL AUTO_INCREMENT, \
             `userId` INTEGER NOT NULL, `roleId` INTEGER NOT NULL, PRIMARY KEY (`id`), \
             UNIQUE (`userId`, `roleId`))"
        );
    }

    #[test]
    fn test_schema_qualified_statements() {
        let mut model = BoundModel::bare("Event", "analytics");
        model.schema = Some("audit".to_string());

        assert_eq!(
            drop_table(&Dialect::Postgres, &model).unwrap(),
            "DROP TABLE IF EXISTS \"audit\".\"event\" CASCADE"
        );
        assert_eq!(
            create_schema(&Dialect::Postgres, "audit").unwrap(),
            "CREATE SCHEMA IF NOT EXISTS \"audit\""
        );
    }

    #[test]
    fn test_create_index_statements() {
        let model = BoundModel::bare("UserRole", "main");
        let index = IndexSpec::new(["userId", "roleId"]);

        assert_eq!(
            create_index(&Dialect::Postgres, &model, &index).unwrap(),
            "CREATE INDEX IF NOT EXISTS \"userrole_userId_roleId\" ON \"userrole\" (\"userId\", \"roleId\")"
        );
        assert_eq!(
            create_index(&Dialect::Mysql, &model, &IndexSpec::new(["email"]).unique().named("uniq_email"))
                .unwrap(),
            "CREATE UNIQUE INDEX `uniq_email` ON `userrole` (`email`)"
        );
        assert_eq!(
            create_index(&Dialect::Sqlite, &model, &index).unwrap(),
            "CREATE INDEX IF NOT EXISTS \"userrole_userId_roleId\" ON \"userrole\" (\"userId\", \"roleId\")"
        );
    }

    #[test]
    fn test_string_default_is_escaped() {
        assert_eq!(render_default(&serde_json::json!("o'neil")), "'o''neil'");
        assert_eq!(render_default(&serde_json::json!(3)), "3");
        assert_eq!(render_default(&serde_json::Value::Null), "NULL");
    }
}
