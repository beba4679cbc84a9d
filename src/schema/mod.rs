pub mod ddl;
mod indexes;
mod inspector;
mod plan;
mod synchronizer;

pub use indexes::{filter_pending, SyncModel};
pub use inspector::{ExistingIndex, IndexInspector};
pub use plan::{DryRunReport, MigrateStrategy, MigrationPlan, PlannedModel, SyncSettings};
pub use synchronizer::{ConnectionSummary, ConvergeOutcome, ConvergeSummary, SchemaSynchronizer};
