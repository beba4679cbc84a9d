//! JSON model files.
//!
//! ```json
//! [
//!   {
//!     "globalId": "User",
//!     "connection": "main",
//!     "attributes": {"email": {"type": "STRING", "unique": true}},
//!     "options": {"indexes": [{"fields": ["email"]}]},
//!     "associations": [{"kind": "belongsToMany", "target": "Role", "through": "UserRole"}],
//!     "defaultScope": {"where": {"active": true}}
//!   },
//!   {"globalId": "Archive"}
//! ]
//! ```
//!
//! Entries without `options` belong to another data layer and load as
//! [`ModelSource::Foreign`].

use crate::error::{Result, SyncError};
use crate::model::association::{AssociationBuilder, AssociationKind, AssociationOptions};
use crate::model::definition::{
    AttributeSpec, ModelDefinition, ModelExtensions, ModelOptions, ModelSource, Scope,
};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelEntry {
    global_id: String,
    #[serde(default)]
    connection: Option<String>,
    #[serde(default)]
    attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    options: Option<ModelOptions>,
    #[serde(default)]
    associations: Vec<AssociationDecl>,
    #[serde(default)]
    default_scope: Option<Scope>,
    #[serde(default)]
    extensions: Option<ModelExtensions>,
}

#[derive(Debug, Clone, Deserialize)]
struct AssociationDecl {
    kind: AssociationKind,
    target: String,
    #[serde(flatten)]
    options: AssociationOptions,
}

impl AssociationDecl {
    fn apply(&self, builder: &mut AssociationBuilder<'_>) -> Result<()> {
        let options = self.options.clone();
        match self.kind {
            AssociationKind::BelongsTo => builder.belongs_to(&self.target, options),
            AssociationKind::HasOne => builder.has_one(&self.target, options),
            AssociationKind::HasMany => builder.has_many(&self.target, options),
            AssociationKind::BelongsToMany => builder.belongs_to_many(&self.target, options),
        }
    }
}

impl ModelEntry {
    fn into_source(self) -> Result<ModelSource> {
        let options = match self.options {
            Some(options) => options,
            None => {
                return Ok(ModelSource::Foreign {
                    global_id: self.global_id,
                })
            }
        };

        let mut definition = ModelDefinition::new(&self.global_id, options);

        for (name, value) in self.attributes {
            let spec: AttributeSpec = serde_json::from_value(value).map_err(|e| {
                SyncError::Config(format!(
                    "Invalid attribute {}.{}: {}",
                    self.global_id, name, e
                ))
            })?;
            definition = definition.attribute(&name, spec);
        }

        if let Some(connection) = &self.connection {
            definition = definition.connection(connection);
        }

        if !self.associations.is_empty() {
            let declared = self.associations;
            definition = definition.associations(move |builder| {
                for association in &declared {
                    association.apply(builder)?;
                }
                Ok(())
            });
        }

        if let Some(scope) = self.default_scope {
            definition = definition.default_scope(move || scope.clone());
        }

        if let Some(extensions) = self.extensions {
            definition = definition.extensions(extensions);
        }

        Ok(ModelSource::Owned(definition))
    }
}

/// Parse a JSON model list, preserving declaration order.
pub fn parse_model_sources(content: &str) -> Result<Vec<ModelSource>> {
    let entries: Vec<ModelEntry> = serde_json::from_str(content)?;
    entries.into_iter().map(ModelEntry::into_source).collect()
}

pub fn load_model_sources(path: &Path) -> Result<Vec<ModelSource>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        SyncError::Config(format!("Failed to read model file {}: {}", path.display(), e))
    })?;
    let sources = parse_model_sources(&content)?;
    debug!("Loaded {} model definitions from {}", sources.len(), path.display());
    Ok(sources)
}
