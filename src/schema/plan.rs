use crate::pool::{Dialect, SyncFlags};
use crate::schema::ddl::index_name;
use crate::schema::SyncModel;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Convergence strategy selected by configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MigrateStrategy {
    /// Touch nothing.
    #[default]
    Safe,
    /// Drop and recreate every table.
    Drop,
    /// Create missing tables and add missing columns.
    Alter,
    /// Create missing tables only.
    Other(String),
}

impl MigrateStrategy {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "safe" => MigrateStrategy::Safe,
            "drop" => MigrateStrategy::Drop,
            "alter" => MigrateStrategy::Alter,
            other => MigrateStrategy::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MigrateStrategy::Safe => "safe",
            MigrateStrategy::Drop => "drop",
            MigrateStrategy::Alter => "alter",
            MigrateStrategy::Other(name) => name,
        }
    }

    pub fn sync_flags(&self) -> SyncFlags {
        match self {
            MigrateStrategy::Drop => SyncFlags {
                force_recreate: true,
                allow_alter: false,
            },
            MigrateStrategy::Alter => SyncFlags {
                force_recreate: false,
                allow_alter: true,
            },
            MigrateStrategy::Safe | MigrateStrategy::Other(_) => SyncFlags::default(),
        }
    }
}

impl fmt::Display for MigrateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for one convergence run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSettings {
    pub strategy: MigrateStrategy,
    pub smart_migrate: bool,
    pub dry_run: bool,
}

/// Flags derived once per run and shared by every connection task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPlan {
    #[serde(flatten)]
    pub flags: SyncFlags,
    pub dry_run: bool,
    /// Index deduplication applies: smart migrate on and strategy `alter`.
    pub deduplicate_indexes: bool,
}

impl MigrationPlan {
    /// `None` for `safe`, which performs no work at all.
    pub fn from_settings(settings: &SyncSettings) -> Option<Self> {
        if settings.strategy == MigrateStrategy::Safe {
            return None;
        }

        Some(Self {
            flags: settings.strategy.sync_flags(),
            dry_run: settings.dry_run,
            deduplicate_indexes: settings.smart_migrate
                && settings.strategy == MigrateStrategy::Alter,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedModel {
    pub model: String,
    pub table_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub pending_indexes: Vec<String>,
}

impl PlannedModel {
    pub fn from_sync_model(entry: &SyncModel<'_>, dialect: &Dialect) -> Self {
        Self {
            model: entry.model.name.clone(),
            table_name: entry.model.table_name.clone(),
            schema: entry.model.schema.clone(),
            pending_indexes: entry
                .indexes
                .iter()
                .map(|index| index_name(dialect, &entry.model.table_name, index))
                .collect(),
        }
    }
}

/// What a dry run would have done on one connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunReport {
    pub connection: String,
    pub dialect: String,
    #[serde(flatten)]
    pub flags: SyncFlags,
    pub models: Vec<PlannedModel>,
    pub generated_at: DateTime<Utc>,
}

impl DryRunReport {
    pub fn new(connection: &str, dialect: &str, flags: SyncFlags, models: Vec<PlannedModel>) -> Self {
        Self {
            connection: connection.to_string(),
            dialect: dialect.to_string(),
            flags,
            models,
            generated_at: Utc::now(),
        }
    }

    /// Human-readable rendering for logs.
    pub fn format_text(&self) -> String {
        let mut output = String::new();

        output.push_str("═══════════════════════════════════════════════════════════════\n");
        output.push_str(&format!(
            "  DRY RUN: {} ({})\n",
            self.connection, self.dialect
        ));
        output.push_str("═══════════════════════════════════════════════════════════════\n");
        output.push_str(&format!(
            "  force_recreate: {}  allow_alter: {}\n",
            self.flags.force_recreate, self.flags.allow_alter
        ));
        output.push_str("───────────────────────────────────────────────────────────────\n");

        for model in &self.models {
            let table = match &model.schema {
                Some(schema) => format!("{}.{}", schema, model.table_name),
                None => model.table_name.clone(),
            };
            output.push_str(&format!("  {} → {}\n", model.model, table));
            for index in &model.pending_indexes {
                output.push_str(&format!("    index {}\n", index));
            }
        }

        output.push_str("═══════════════════════════════════════════════════════════════\n");
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BoundModel, IndexSpec};

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(MigrateStrategy::from_name("ALTER"), MigrateStrategy::Alter);
        assert_eq!(MigrateStrategy::from_name(" safe "), MigrateStrategy::Safe);
        assert_eq!(
            MigrateStrategy::from_name("create"),
            MigrateStrategy::Other("create".to_string())
        );
    }

    #[test]
    fn test_strategy_flags() {
        assert_eq!(
            MigrateStrategy::Drop.sync_flags(),
            SyncFlags {
                force_recreate: true,
                allow_alter: false
            }
        );
        assert_eq!(
            MigrateStrategy::Alter.sync_flags(),
            SyncFlags {
                force_recreate: false,
                allow_alter: true
            }
        );
        assert_eq!(
            MigrateStrategy::Other("create".to_string()).sync_flags(),
            SyncFlags::default()
        );
    }

    #[test]
    fn test_safe_has_no_plan() {
        let settings = SyncSettings {
            strategy: MigrateStrategy::Safe,
            smart_migrate: true,
            dry_run: true,
        };
        assert!(MigrationPlan::from_settings(&settings).is_none());
    }

    #[test]
    fn test_deduplication_requires_alter() {
        let drop = SyncSettings {
            strategy: MigrateStrategy::Drop,
            smart_migrate: true,
            dry_run: false,
        };
        assert!(!MigrationPlan::from_settings(&drop).unwrap().deduplicate_indexes);

        let alter = SyncSettings {
            strategy: MigrateStrategy::Alter,
            smart_migrate: true,
            dry_run: false,
        };
        assert!(MigrationPlan::from_settings(&alter).unwrap().deduplicate_indexes);
    }

    #[test]
    fn test_dry_run_report_rendering() {
        let mut model = BoundModel::bare("UserRole", "main");
        model.pending_indexes = vec![IndexSpec::new(["userId", "roleId"])];
        let entry = SyncModel::pending(&model);

        let report = DryRunReport::new(
            "main",
            "postgres",
            MigrateStrategy::Alter.sync_flags(),
            vec![PlannedModel::from_sync_model(&entry, &Dialect::Postgres)],
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["connection"], "main");
        assert_eq!(json["allowAlter"], true);
        assert_eq!(json["forceRecreate"], false);
        assert!(json.get("allow_alter").is_none());
        assert_eq!(json["models"][0]["tableName"], "userrole");
        assert_eq!(json["models"][0]["pendingIndexes"][0], "userrole_userId_roleId");

        let text = report.format_text();
        assert!(text.contains("DRY RUN: main (postgres)"));
        assert!(text.contains("index userrole_userId_roleId"));
    }
}
