use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Relational database family a connection targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    Mysql,
    Mariadb,
    Sqlite,
    Mssql,
    Other(String),
}

impl Dialect {
    /// Parse a dialect name; unrecognized names are kept as [`Dialect::Other`].
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Dialect::Postgres,
            "mysql" => Dialect::Mysql,
            "mariadb" => Dialect::Mariadb,
            "sqlite" | "sqlite3" => Dialect::Sqlite,
            "mssql" | "sqlserver" => Dialect::Mssql,
            other => Dialect::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "mysql",
            Dialect::Mariadb => "mariadb",
            Dialect::Sqlite => "sqlite",
            Dialect::Mssql => "mssql",
            Dialect::Other(name) => name,
        }
    }

    /// MySQL and MariaDB share introspection and DDL syntax.
    pub fn is_mysql_family(&self) -> bool {
        matches!(self, Dialect::Mysql | Dialect::Mariadb)
    }

    /// Schema namespaces referenced by models must exist before tables are synced.
    pub fn requires_schema_namespaces(&self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    /// Longest identifier the database stores verbatim, in bytes.
    /// Postgres truncates past `NAMEDATALEN - 1`; MySQL rejects past 64.
    pub fn max_identifier_len(&self) -> Option<usize> {
        match self {
            Dialect::Postgres => Some(63),
            Dialect::Mysql | Dialect::Mariadb => Some(64),
            Dialect::Mssql => Some(128),
            _ => None,
        }
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            Dialect::Postgres => Some(5432),
            Dialect::Mysql | Dialect::Mariadb => Some(3306),
            Dialect::Mssql => Some(1433),
            _ => None,
        }
    }

    pub fn url_scheme(&self) -> &str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Mysql | Dialect::Mariadb => "mysql",
            other => other.as_str(),
        }
    }
}

impl FromStr for Dialect {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Dialect::from_name(s))
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
