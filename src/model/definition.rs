//! Model definitions as handed over by the host application.
//!
//! A definition is ingested as a [`ModelSource`]: `Owned` when it carries
//! options and belongs to this ORM layer, `Foreign` when another data layer
//! registered it in the same model map.

use crate::error::Result;
use crate::model::association::AssociationBuilder;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Filter attached to a model as its default query scope.
pub type Scope = serde_json::Value;

/// Wires a model's associations through the builder it is handed.
pub type AssociationFn = Arc<dyn Fn(&mut AssociationBuilder<'_>) -> Result<()> + Send + Sync>;

/// Produces a model's default scope.
pub type ScopeFn = Arc<dyn Fn() -> Scope + Send + Sync>;

/// Index declaration. Field order is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub fields: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: None,
            fields: fields.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// `name` when given, otherwise `table_field1_field2...`.
    pub fn derived_name(&self, table: &str) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}_{}", table, self.fields.join("_")),
        }
    }

    /// Non-unique composite indexes govern join-table uniqueness.
    pub fn is_junction_index(&self) -> bool {
        !self.unique && self.fields.len() >= 2
    }
}

/// Column declaration. A bare string in JSON is shorthand for the type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawAttribute")]
pub struct AttributeSpec {
    #[serde(rename = "type")]
    pub column_type: String,
    pub allow_null: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub unique: bool,
    pub default_value: Option<serde_json::Value>,
    /// Column name when it differs from the attribute name.
    pub field: Option<String>,
}

impl AttributeSpec {
    pub fn new(column_type: &str) -> Self {
        Self {
            column_type: column_type.to_string(),
            allow_null: true,
            primary_key: false,
            auto_increment: false,
            unique: false,
            default_value: None,
            field: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.allow_null = false;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.allow_null = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAttribute {
    Shorthand(String),
    Full(FullAttribute),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullAttribute {
    #[serde(rename = "type")]
    column_type: String,
    #[serde(default = "default_true")]
    allow_null: bool,
    #[serde(default)]
    primary_key: bool,
    #[serde(default)]
    auto_increment: bool,
    #[serde(default)]
    unique: bool,
    #[serde(default)]
    default_value: Option<serde_json::Value>,
    #[serde(default)]
    field: Option<String>,
}

impl From<RawAttribute> for AttributeSpec {
    fn from(raw: RawAttribute) -> Self {
        match raw {
            RawAttribute::Shorthand(column_type) => AttributeSpec::new(&column_type),
            RawAttribute::Full(full) => AttributeSpec {
                column_type: full.column_type,
                allow_null: full.allow_null && !full.primary_key,
                primary_key: full.primary_key,
                auto_increment: full.auto_increment,
                unique: full.unique,
                default_value: full.default_value,
                field: full.field,
            },
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelOptions {
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
    #[serde(default = "default_true")]
    pub timestamps: bool,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            table_name: None,
            schema: None,
            indexes: Vec::new(),
            timestamps: true,
        }
    }
}

/// Method names the host attaches to a realized model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelExtensions {
    #[serde(default)]
    pub class_methods: Vec<String>,
    #[serde(default)]
    pub instance_methods: Vec<String>,
}

impl ModelExtensions {
    pub fn is_empty(&self) -> bool {
        self.class_methods.is_empty() && self.instance_methods.is_empty()
    }

    /// Union, keeping first-seen order.
    pub fn merge(&mut self, other: &ModelExtensions) {
        for method in &other.class_methods {
            if !self.class_methods.contains(method) {
                self.class_methods.push(method.clone());
            }
        }
        for method in &other.instance_methods {
            if !self.instance_methods.contains(method) {
                self.instance_methods.push(method.clone());
            }
        }
    }
}

#[derive(Clone)]
pub struct ModelDefinition {
    pub global_id: String,
    pub attributes: Vec<(String, AttributeSpec)>,
    pub options: ModelOptions,
    pub associations: Option<AssociationFn>,
    pub default_scope: Option<ScopeFn>,
    pub connection_name: Option<String>,
    pub extensions: Option<ModelExtensions>,
}

impl ModelDefinition {
    pub fn new(global_id: &str, options: ModelOptions) -> Self {
        Self {
            global_id: global_id.to_string(),
            attributes: Vec::new(),
            options,
            associations: None,
            default_scope: None,
            connection_name: None,
            extensions: None,
        }
    }

    pub fn attribute(mut self, name: &str, spec: AttributeSpec) -> Self {
        self.attributes.push((name.to_string(), spec));
        self
    }

    pub fn associations<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut AssociationBuilder<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.associations = Some(Arc::new(f));
        self
    }

    pub fn default_scope<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Scope + Send + Sync + 'static,
    {
        self.default_scope = Some(Arc::new(f));
        self
    }

    pub fn connection(mut self, name: &str) -> Self {
        self.connection_name = Some(name.to_string());
        self
    }

    pub fn extensions(mut self, extensions: ModelExtensions) -> Self {
        self.extensions = Some(extensions);
        self
    }

    pub fn identity(&self) -> String {
        self.global_id.to_lowercase()
    }
}

impl std::fmt::Debug for ModelDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelDefinition")
            .field("global_id", &self.global_id)
            .field("attributes", &self.attributes)
            .field("options", &self.options)
            .field("associations", &self.associations.is_some())
            .field("default_scope", &self.default_scope.is_some())
            .field("connection_name", &self.connection_name)
            .field("extensions", &self.extensions)
            .finish()
    }
}

/// Ingest-time classification of a model definition.
#[derive(Debug, Clone)]
pub enum ModelSource {
    Owned(ModelDefinition),
    Foreign { global_id: String },
}

impl ModelSource {
    pub fn global_id(&self) -> &str {
        match self {
            ModelSource::Owned(definition) => &definition.global_id,
            ModelSource::Foreign { global_id } => global_id,
        }
    }
}

impl From<ModelDefinition> for ModelSource {
    fn from(definition: ModelDefinition) -> Self {
        ModelSource::Owned(definition)
    }
}
