use crate::model::{BoundModel, IndexSpec};
use crate::pool::Dialect;
use crate::schema::ddl::index_name;
use crate::schema::inspector::ExistingIndex;
use std::collections::HashSet;

/// What one model hands to the sync primitive: the bound model and the
/// index list to create for it. The model itself is never mutated.
#[derive(Debug, Clone)]
pub struct SyncModel<'a> {
    pub model: &'a BoundModel,
    pub indexes: Vec<IndexSpec>,
}

impl<'a> SyncModel<'a> {
    /// Snapshot carrying the model's full pending-index list.
    pub fn pending(model: &'a BoundModel) -> Self {
        Self {
            model,
            indexes: model.pending_indexes.clone(),
        }
    }

    /// Snapshot carrying only the pending indexes `existing` does not have.
    pub fn deduplicated(
        model: &'a BoundModel,
        dialect: &Dialect,
        existing: &[ExistingIndex],
    ) -> Self {
        Self {
            model,
            indexes: filter_pending(&model.pending_indexes, &model.table_name, dialect, existing),
        }
    }
}

/// Drop every pending index whose stored name is already present on the
/// table. Matching is by name only; column lists are not compared.
pub fn filter_pending(
    pending: &[IndexSpec],
    table: &str,
    dialect: &Dialect,
    existing: &[ExistingIndex],
) -> Vec<IndexSpec> {
    let present: HashSet<&str> = existing.iter().map(|index| index.name.as_str()).collect();

    pending
        .iter()
        .filter(|index| !present.contains(index_name(dialect, table, index).as_str()))
        .cloned()
        .collect()
}
