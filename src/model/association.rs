//! Association wiring.
//!
//! A model's association function receives an [`AssociationBuilder`]. The
//! builder validates targets against the models bound so far and decides,
//! through its [`JunctionUniquePolicy`], whether a many-to-many join table
//! gets an implicit unique key. The registry applies the collected
//! associations once the function returns.

use crate::error::{Result, SyncError};
use crate::model::registry::BoundModel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssociationKind {
    BelongsTo,
    HasOne,
    HasMany,
    BelongsToMany,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationOptions {
    #[serde(default, rename = "as")]
    pub alias: Option<String>,
    #[serde(default)]
    pub foreign_key: Option<String>,
    #[serde(default)]
    pub other_key: Option<String>,
    #[serde(default)]
    pub through: Option<String>,
    /// Explicit request for (or against) the join table's implicit unique key.
    #[serde(default)]
    pub unique: Option<bool>,
}

impl AssociationOptions {
    pub fn through(name: &str) -> Self {
        Self {
            through: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    pub fn foreign_key(mut self, key: &str) -> Self {
        self.foreign_key = Some(key.to_string());
        self
    }

    pub fn other_key(mut self, key: &str) -> Self {
        self.other_key = Some(key.to_string());
        self
    }
}

/// A resolved association, recorded on its source model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Association {
    pub kind: AssociationKind,
    /// Identity of the target model.
    pub target: String,
    pub alias: Option<String>,
    pub foreign_key: String,
    /// Second join-table column for many-to-many associations.
    pub other_key: Option<String>,
    /// Join model identity, or the join table name for implicit junctions.
    pub through: Option<String>,
    /// Whether the join table carries an implicit unique key over both columns.
    pub junction_unique: bool,
}

/// Decides whether join tables get an implicit unique key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JunctionUniquePolicy {
    /// Always add the implicit key unless the association opts out.
    Always,
    /// Leave uniqueness to the through model when it declares a non-unique
    /// two-column index.
    #[default]
    DeferToThroughIndexes,
}

impl JunctionUniquePolicy {
    fn implicit_unique(&self, requested: Option<bool>, through: Option<&BoundModel>) -> bool {
        let requested = requested.unwrap_or(true);
        match self {
            JunctionUniquePolicy::Always => requested,
            JunctionUniquePolicy::DeferToThroughIndexes => {
                let governed = through
                    .map(|model| {
                        model
                            .declared_indexes
                            .iter()
                            .any(|index| !index.unique && index.fields.len() == 2)
                    })
                    .unwrap_or(false);
                requested && !governed
            }
        }
    }
}

/// `User` -> `userId`.
pub fn default_foreign_key(model_name: &str) -> String {
    let mut chars = model_name.chars();
    match chars.next() {
        Some(first) => format!("{}{}Id", first.to_lowercase(), chars.as_str()),
        None => "id".to_string(),
    }
}

pub struct AssociationBuilder<'a> {
    source: &'a BoundModel,
    models: &'a BTreeMap<String, BoundModel>,
    policy: JunctionUniquePolicy,
    associations: Vec<Association>,
}

impl<'a> AssociationBuilder<'a> {
    pub fn new(
        source: &'a BoundModel,
        models: &'a BTreeMap<String, BoundModel>,
        policy: JunctionUniquePolicy,
    ) -> Self {
        Self {
            source,
            models,
            policy,
            associations: Vec::new(),
        }
    }

    pub fn source(&self) -> &BoundModel {
        self.source
    }

    pub fn belongs_to(&mut self, target: &str, options: AssociationOptions) -> Result<()> {
        let target = self.resolve(target)?;
        let foreign_key = options
            .foreign_key
            .unwrap_or_else(|| default_foreign_key(&target.name));
        self.associations.push(Association {
            kind: AssociationKind::BelongsTo,
            target: target.identity.clone(),
            alias: options.alias,
            foreign_key,
            other_key: None,
            through: None,
            junction_unique: false,
        });
        Ok(())
    }

    pub fn has_one(&mut self, target: &str, options: AssociationOptions) -> Result<()> {
        self.has(AssociationKind::HasOne, target, options)
    }

    pub fn has_many(&mut self, target: &str, options: AssociationOptions) -> Result<()> {
        self.has(AssociationKind::HasMany, target, options)
    }

    pub fn belongs_to_many(&mut self, target: &str, options: AssociationOptions) -> Result<()> {
        let target = self.resolve(target)?;
        let through = options
            .through
            .clone()
            .ok_or_else(|| SyncError::InvalidAssociation {
                model: self.source.name.clone(),
                message: format!("belongsToMany {} requires a `through` model", target.name),
            })?;

        let through_model = self.models.get(&through.to_lowercase());
        let junction_unique = self.policy.implicit_unique(options.unique, through_model);

        self.associations.push(Association {
            kind: AssociationKind::BelongsToMany,
            target: target.identity.clone(),
            alias: options.alias,
            foreign_key: options
                .foreign_key
                .unwrap_or_else(|| default_foreign_key(&self.source.name)),
            other_key: Some(
                options
                    .other_key
                    .unwrap_or_else(|| default_foreign_key(&target.name)),
            ),
            through: Some(match through_model {
                Some(model) => model.identity.clone(),
                None => through,
            }),
            junction_unique,
        });
        Ok(())
    }

    pub fn into_associations(self) -> Vec<Association> {
        self.associations
    }

    fn has(&mut self, kind: AssociationKind, target: &str, options: AssociationOptions) -> Result<()> {
        let target = self.resolve(target)?;
        let foreign_key = options
            .foreign_key
            .unwrap_or_else(|| default_foreign_key(&self.source.name));
        self.associations.push(Association {
            kind,
            target: target.identity.clone(),
            alias: options.alias,
            foreign_key,
            other_key: None,
            through: None,
            junction_unique: false,
        });
        Ok(())
    }

    fn resolve(&self, target: &str) -> Result<&'a BoundModel> {
        self.models
            .get(&target.to_lowercase())
            .ok_or_else(|| SyncError::UnknownModel {
                model: self.source.name.clone(),
                target: target.to_string(),
            })
    }
}
