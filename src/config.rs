use crate::error::{Result, SyncError};
use crate::model::{load_model_sources, JunctionUniquePolicy, ModelSource, RegistryOptions};
use crate::pool::ConnectionConfig;
use crate::schema::{MigrateStrategy, SyncSettings};
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub migrate: MigrateStrategy,
    pub smart_migrate: bool,
    pub dry_run: bool,
    pub default_connection: String,
    pub connections_file: PathBuf,
    pub models_file: PathBuf,
    /// Used for the default connection when no connections file exists.
    pub database_url: String,
    pub max_connections_per_pool: u32,
    pub orm_major_version: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // Build database_url from individual fields or use DATABASE_URL if provided
        let database_url = if let Ok(url) = env::var("DATABASE_URL") {
            url
        } else {
            let db_host = env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string());
            let db_port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
            let db_name = env::var("DB_NAME").unwrap_or_else(|_| "postgres".to_string());
            let db_user = env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string());
            let db_password = env::var("DB_PASSWORD").unwrap_or_else(|_| "password".to_string());

            // URL-encode password to handle special characters
            let encoded_password = urlencoding::encode(&db_password);

            format!("postgres://{}:{}@{}:{}/{}", db_user, encoded_password, db_host, db_port, db_name)
        };

        let migrate = MigrateStrategy::from_name(
            &env::var("MIGRATE").unwrap_or_else(|_| "safe".to_string()),
        );

        let smart_migrate = env_flag("SMART_MIGRATE");
        let dry_run = env_flag("DRY_RUN");

        let default_connection =
            env::var("DEFAULT_CONNECTION").unwrap_or_else(|_| "default".to_string());

        let connections_file = env::var("CONNECTIONS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./config/connections.json"));

        let models_file = env::var("MODELS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./config/models.json"));

        let max_connections_per_pool = env::var("MAX_CONNECTIONS_PER_POOL")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let orm_major_version = env::var("ORM_MAJOR_VERSION")
            .unwrap_or_else(|_| "6".to_string())
            .parse()
            .unwrap_or(6);

        Ok(Config {
            migrate,
            smart_migrate,
            dry_run,
            default_connection,
            connections_file,
            models_file,
            database_url,
            max_connections_per_pool,
            orm_major_version,
        })
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            strategy: self.migrate.clone(),
            smart_migrate: self.smart_migrate,
            dry_run: self.dry_run,
        }
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            orm_major_version: self.orm_major_version,
            junction_policy: JunctionUniquePolicy::default(),
        }
    }

    /// Connection map from the connections file, or a single Postgres
    /// default connection built from `database_url` when the file is absent.
    pub fn load_connection_configs(&self) -> Result<BTreeMap<String, ConnectionConfig>> {
        if !self.connections_file.exists() {
            info!(
                "No connections file at {:?}, using DATABASE_URL for connection {}",
                self.connections_file, self.default_connection
            );
            let mut configs = BTreeMap::new();
            configs.insert(
                self.default_connection.clone(),
                ConnectionConfig {
                    dialect: Some("postgres".to_string()),
                    url: Some(self.database_url.clone()),
                    ..Default::default()
                },
            );
            return Ok(configs);
        }

        let content = std::fs::read_to_string(&self.connections_file).map_err(|e| {
            SyncError::Config(format!(
                "Failed to read connections file {:?}: {}",
                self.connections_file, e
            ))
        })?;
        let configs: BTreeMap<String, ConnectionConfig> = serde_json::from_str(&content)?;
        info!(
            "Loaded {} connection entries from {:?}",
            configs.len(),
            self.connections_file
        );
        Ok(configs)
    }

    /// Model definitions, or none when the models file is absent.
    pub fn load_models(&self) -> Result<Vec<ModelSource>> {
        if !self.models_file.exists() {
            warn!("No models file at {:?}, nothing to converge", self.models_file);
            return Ok(Vec::new());
        }
        load_model_sources(&self.models_file)
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|value| parse_flag(&value))
        .unwrap_or(false)
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
