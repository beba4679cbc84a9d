//! Per-connection schema convergence.
//!
//! One run derives a [`MigrationPlan`] from the settings, then builds one
//! task per owned connection:
//!
//! 1. dry run: report what would be synced, touch nothing
//! 2. smart migrate with `alter`: introspect, drop already-present indexes
//!    from each model's list, sync
//! 3. Postgres: create missing schema namespaces, sync
//! 4. otherwise: sync
//!
//! Tasks run concurrently. A failing task does not cancel its siblings;
//! the first failure observed becomes the run's error.

use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::model::BoundModel;
use crate::pool::{Connection, SkippedConnection};
use crate::schema::inspector::IndexInspector;
use crate::schema::plan::{DryRunReport, MigrationPlan, PlannedModel, SyncSettings};
use crate::schema::SyncModel;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub connection: String,
    pub dialect: String,
    pub models: usize,
    pub indexes_requested: usize,
    /// Pending indexes left out because the table already had them.
    pub indexes_skipped: usize,
    pub schemas_created: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvergeSummary {
    pub strategy: String,
    pub connections: Vec<ConnectionSummary>,
    /// Owned entries with no driver; nothing was synced on them.
    pub skipped_connections: Vec<SkippedConnection>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", content = "result", rename_all = "camelCase")]
pub enum ConvergeOutcome {
    /// Strategy `safe`: nothing was done.
    Skipped,
    DryRun(Vec<DryRunReport>),
    Completed(ConvergeSummary),
}

pub struct SchemaSynchronizer {
    settings: SyncSettings,
    inspector: IndexInspector,
}

impl SchemaSynchronizer {
    pub fn new(settings: SyncSettings) -> Self {
        Self {
            settings,
            inspector: IndexInspector::new(),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub async fn converge(&self, ctx: &SyncContext) -> Result<ConvergeOutcome> {
        let plan = match MigrationPlan::from_settings(&self.settings) {
            Some(plan) => plan,
            None => {
                info!("Migration strategy is safe, leaving schemas untouched");
                return Ok(ConvergeOutcome::Skipped);
            }
        };

        let connections: Vec<Arc<Connection>> = ctx
            .connections
            .names()
            .iter()
            .filter_map(|name| ctx.connections.get(name))
            .collect();

        info!(
            "Converging {} connections with strategy {} (smart migrate: {}, dry run: {})",
            connections.len(),
            self.settings.strategy,
            self.settings.smart_migrate,
            plan.dry_run
        );

        if plan.dry_run {
            let reports: Vec<DryRunReport> = connections
                .iter()
                .map(|connection| {
                    let report = self.dry_run_report(connection, ctx, plan);
                    info!("Dry run report:\n{}", report.format_text());
                    report
                })
                .collect();
            return Ok(ConvergeOutcome::DryRun(reports));
        }

        let mut tasks = FuturesUnordered::new();
        for connection in &connections {
            let models = ctx.models.models_for(connection.name());
            tasks.push(async move {
                self.converge_connection(connection, &models, plan)
                    .await
                    .map_err(|e| (connection.name().to_string(), e.on_connection(connection.name())))
            });
        }

        let mut summaries = Vec::new();
        let mut first_failure: Option<(String, SyncError)> = None;
        let mut failed = 0;

        while let Some(result) = tasks.next().await {
            match result {
                Ok(summary) => {
                    info!(
                        "Converged connection {}: {} models, {} indexes requested, {} skipped",
                        summary.connection,
                        summary.models,
                        summary.indexes_requested,
                        summary.indexes_skipped
                    );
                    summaries.push(summary);
                }
                Err((connection, e)) => {
                    error!("Schema convergence failed on {}: {}", connection, e);
                    failed += 1;
                    if first_failure.is_none() {
                        first_failure = Some((connection, e));
                    }
                }
            }
        }

        if let Some((connection, e)) = first_failure {
            return Err(SyncError::ConvergeFailed {
                connection,
                cause: e.to_string(),
                detail: e.detail().map(str::to_string),
                failed,
            });
        }

        summaries.sort_by(|a, b| a.connection.cmp(&b.connection));
        Ok(ConvergeOutcome::Completed(ConvergeSummary {
            strategy: self.settings.strategy.to_string(),
            connections: summaries,
            skipped_connections: ctx.connections.skipped().to_vec(),
        }))
    }

    fn dry_run_report(
        &self,
        connection: &Connection,
        ctx: &SyncContext,
        plan: MigrationPlan,
    ) -> DryRunReport {
        let models = ctx
            .models
            .models_for(connection.name())
            .into_iter()
            .map(|model| {
                PlannedModel::from_sync_model(&SyncModel::pending(model), connection.dialect())
            })
            .collect();

        DryRunReport::new(
            connection.name(),
            connection.dialect().as_str(),
            plan.flags,
            models,
        )
    }

    async fn converge_connection(
        &self,
        connection: &Connection,
        models: &[&BoundModel],
        plan: MigrationPlan,
    ) -> Result<ConnectionSummary> {
        let mut summary = ConnectionSummary {
            connection: connection.name().to_string(),
            dialect: connection.dialect().to_string(),
            models: models.len(),
            ..Default::default()
        };

        let entries = if plan.deduplicate_indexes {
            let mut entries = Vec::with_capacity(models.len());
            for model in models {
                let existing = self
                    .inspector
                    .list_existing(connection, &model.table_name, model.schema.as_deref())
                    .await;
                let entry = SyncModel::deduplicated(model, connection.dialect(), &existing);

                if entry.indexes.is_empty() && !model.pending_indexes.is_empty() {
                    debug!(
                        "All {} pending indexes on {} already exist, none requested",
                        model.pending_indexes.len(),
                        model.table_name
                    );
                }
                summary.indexes_skipped += model.pending_indexes.len() - entry.indexes.len();
                entries.push(entry);
            }
            entries
        } else {
            if connection.dialect().requires_schema_namespaces() {
                summary.schemas_created = self.ensure_schemas(connection, models).await?;
            }
            models.iter().map(|model| SyncModel::pending(model)).collect()
        };

        summary.indexes_requested = entries.iter().map(|entry| entry.indexes.len()).sum();

        connection.driver().sync(&entries, plan.flags).await?;
        Ok(summary)
    }

    /// Create every schema namespace the models reference but the database lacks.
    async fn ensure_schemas(
        &self,
        connection: &Connection,
        models: &[&BoundModel],
    ) -> Result<Vec<String>> {
        let existing = connection.driver().list_schemas().await?;

        let mut wanted: Vec<&str> = models
            .iter()
            .filter_map(|model| model.schema.as_deref())
            .collect();
        wanted.sort_unstable();
        wanted.dedup();

        let mut created = Vec::new();
        for schema in wanted {
            if existing.iter().any(|name| name == schema) {
                continue;
            }
            info!("Creating schema {} on {}", schema, connection.name());
            connection.driver().create_schema(schema).await?;
            created.push(schema.to_string());
        }

        Ok(created)
    }
}
