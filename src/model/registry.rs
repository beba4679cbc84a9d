use crate::error::{Result, SyncError};
use crate::model::association::{
    Association, AssociationBuilder, AssociationKind, JunctionUniquePolicy,
};
use crate::model::definition::{
    AttributeSpec, IndexSpec, ModelDefinition, ModelExtensions, ModelSource, Scope,
};
use crate::pool::ConnectionRegistry;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// First ORM major version whose models accept attached extension methods.
const EXTENSIONS_MIN_MAJOR_VERSION: u32 = 4;

const DEFAULT_KEY_TYPE: &str = "INTEGER";

#[derive(Debug, Clone, Copy)]
pub struct RegistryOptions {
    pub orm_major_version: u32,
    pub junction_policy: JunctionUniquePolicy,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            orm_major_version: 6,
            junction_policy: JunctionUniquePolicy::default(),
        }
    }
}

/// A model definition realized against a specific connection.
#[derive(Debug, Clone, Serialize)]
pub struct BoundModel {
    /// Lower-cased global identifier.
    pub identity: String,
    pub name: String,
    /// Name of the connection this model syncs through.
    pub connection: String,
    pub table_name: String,
    pub schema: Option<String>,
    pub attributes: Vec<(String, AttributeSpec)>,
    /// Indexes exactly as declared in the model options.
    pub declared_indexes: Vec<IndexSpec>,
    /// Indexes handed to the sync primitive.
    pub pending_indexes: Vec<IndexSpec>,
    /// Implicit unique keys added by many-to-many associations.
    pub unique_keys: Vec<Vec<String>>,
    pub associations: Vec<Association>,
    pub default_scope: Option<Scope>,
    pub extensions: ModelExtensions,
    /// Join table created for a `through` name no model defines.
    pub implicit: bool,
}

impl BoundModel {
    /// A model with no attributes beyond its primary key.
    pub fn bare(name: &str, connection: &str) -> Self {
        Self {
            identity: name.to_lowercase(),
            name: name.to_string(),
            connection: connection.to_string(),
            table_name: name.to_lowercase(),
            schema: None,
            attributes: vec![(
                "id".to_string(),
                AttributeSpec::new(DEFAULT_KEY_TYPE)
                    .primary_key()
                    .auto_increment(),
            )],
            declared_indexes: Vec::new(),
            pending_indexes: Vec::new(),
            unique_keys: Vec::new(),
            associations: Vec::new(),
            default_scope: None,
            extensions: ModelExtensions::default(),
            implicit: false,
        }
    }

    fn realize(definition: &ModelDefinition, connection: &str, options: &RegistryOptions) -> Self {
        let mut attributes = definition.attributes.clone();
        if !attributes.iter().any(|(_, spec)| spec.primary_key) {
            attributes.insert(
                0,
                (
                    "id".to_string(),
                    AttributeSpec::new(DEFAULT_KEY_TYPE)
                        .primary_key()
                        .auto_increment(),
                ),
            );
        }

        let mut model = Self {
            identity: definition.identity(),
            name: definition.global_id.clone(),
            connection: connection.to_string(),
            table_name: definition
                .options
                .table_name
                .clone()
                .unwrap_or_else(|| definition.identity()),
            schema: definition.options.schema.clone(),
            attributes,
            declared_indexes: definition.options.indexes.clone(),
            // Composite non-unique indexes are queued after associations are wired.
            pending_indexes: definition
                .options
                .indexes
                .iter()
                .filter(|index| !index.is_junction_index())
                .cloned()
                .collect(),
            unique_keys: Vec::new(),
            associations: Vec::new(),
            default_scope: None,
            extensions: ModelExtensions::default(),
            implicit: false,
        };

        if definition.options.timestamps {
            model.add_timestamps();
        }

        if let Some(extensions) = &definition.extensions {
            if options.orm_major_version >= EXTENSIONS_MIN_MAJOR_VERSION {
                model.extensions.merge(extensions);
            } else if !extensions.is_empty() {
                warn!(
                    "Ignoring extension methods on {}: ORM major version {} does not support them",
                    definition.global_id, options.orm_major_version
                );
            }
        }

        model
    }

    fn add_timestamps(&mut self) {
        for column in ["createdAt", "updatedAt"] {
            self.add_attribute_if_missing(column, AttributeSpec::new("DATE").not_null());
        }
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|(attr, _)| attr == name)
    }

    pub fn add_attribute_if_missing(&mut self, name: &str, spec: AttributeSpec) {
        if !self.has_attribute(name) {
            self.attributes.push((name.to_string(), spec));
        }
    }

    /// Column type of the primary key, used for foreign keys pointing here.
    pub fn primary_key_type(&self) -> String {
        self.attributes
            .iter()
            .find(|(_, spec)| spec.primary_key)
            .map(|(_, spec)| spec.column_type.clone())
            .unwrap_or_else(|| DEFAULT_KEY_TYPE.to_string())
    }

    /// `(column name, spec)` pairs, honouring `field` overrides.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &AttributeSpec)> {
        self.attributes
            .iter()
            .map(|(name, spec)| (spec.field.as_deref().unwrap_or(name.as_str()), spec))
    }
}

/// Bound models for one convergence run, keyed by lower-cased global id.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, BoundModel>,
    foreign: Vec<String>,
}

impl ModelRegistry {
    /// Bind definitions to connections in three ordered passes: realize every
    /// owned definition, wire associations and default scopes, then queue
    /// junction indexes.
    pub fn bind(
        sources: Vec<ModelSource>,
        connections: &ConnectionRegistry,
        options: &RegistryOptions,
    ) -> Result<Self> {
        let mut registry = ModelRegistry::default();
        let mut owned = Vec::new();

        for source in sources {
            match source {
                ModelSource::Owned(definition) => owned.push(definition),
                ModelSource::Foreign { global_id } => {
                    debug!("Skipping model {} (not owned by this ORM)", global_id);
                    registry.foreign.push(global_id);
                }
            }
        }

        let mut bound = Vec::with_capacity(owned.len());
        for definition in owned {
            if registry.define(&definition, connections, options)? {
                bound.push(definition);
            }
        }

        for definition in &bound {
            registry.associate(definition, options.junction_policy)?;
        }
        for definition in &bound {
            if let Some(scope) = &definition.default_scope {
                if let Some(model) = registry.models.get_mut(&definition.identity()) {
                    model.default_scope = Some(scope());
                }
            }
        }

        for definition in &bound {
            registry.queue_junction_indexes(definition);
        }

        info!(
            "Bound {} models ({} foreign definitions skipped)",
            registry.models.len(),
            registry.foreign.len()
        );

        Ok(registry)
    }

    fn define(
        &mut self,
        definition: &ModelDefinition,
        connections: &ConnectionRegistry,
        options: &RegistryOptions,
    ) -> Result<bool> {
        let connection = definition
            .connection_name
            .clone()
            .unwrap_or_else(|| connections.default_name().to_string());

        if connections.is_skipped(&connection) {
            warn!(
                "Skipping model {}: connection {} has no driver",
                definition.global_id, connection
            );
            self.foreign.push(definition.global_id.clone());
            return Ok(false);
        }

        if connections.get(&connection).is_none() {
            return Err(SyncError::UnknownConnection {
                model: definition.global_id.clone(),
                connection,
            });
        }

        let identity = definition.identity();
        if let Some(existing) = self.models.get(&identity) {
            return Err(SyncError::DuplicateModel {
                identity,
                first: existing.name.clone(),
                second: definition.global_id.clone(),
            });
        }

        let model = BoundModel::realize(definition, &connection, options);
        debug!(
            "Defined model {} on {} (table {})",
            model.name, model.connection, model.table_name
        );
        self.models.insert(identity, model);
        Ok(true)
    }

    fn associate(
        &mut self,
        definition: &ModelDefinition,
        policy: JunctionUniquePolicy,
    ) -> Result<()> {
        let associate = match &definition.associations {
            Some(associate) => associate,
            None => return Ok(()),
        };

        let identity = definition.identity();
        let associations = {
            let source = self.models.get(&identity).ok_or_else(|| {
                SyncError::Internal(format!("Model {} was not bound", definition.global_id))
            })?;
            let mut builder = AssociationBuilder::new(source, &self.models, policy);
            associate(&mut builder)?;
            builder.into_associations()
        };

        for association in associations {
            self.apply_association(&identity, association)?;
        }
        Ok(())
    }

    fn apply_association(&mut self, source: &str, association: Association) -> Result<()> {
        let (source_key_type, source_connection) = match self.models.get(source) {
            Some(model) => (model.primary_key_type(), model.connection.clone()),
            None => return Err(SyncError::Internal(format!("Model {} was not bound", source))),
        };
        let target_key_type = self
            .models
            .get(&association.target)
            .map(|model| model.primary_key_type())
            .unwrap_or_else(|| DEFAULT_KEY_TYPE.to_string());

        match association.kind {
            AssociationKind::BelongsTo => {
                if let Some(model) = self.models.get_mut(source) {
                    model.add_attribute_if_missing(
                        &association.foreign_key,
                        AttributeSpec::new(&target_key_type),
                    );
                }
            }
            AssociationKind::HasOne | AssociationKind::HasMany => {
                if let Some(model) = self.models.get_mut(&association.target) {
                    model.add_attribute_if_missing(
                        &association.foreign_key,
                        AttributeSpec::new(&source_key_type),
                    );
                }
            }
            AssociationKind::BelongsToMany => {
                let through = association.through.clone().unwrap_or_default();
                let junction_id = through.to_lowercase();

                let junction = self.models.entry(junction_id).or_insert_with(|| {
                    debug!(
                        "Creating implicit join table {} on {}",
                        through, source_connection
                    );
                    let mut junction = BoundModel::bare(&through, &source_connection);
                    junction.table_name = through.clone();
                    junction.implicit = true;
                    junction.add_timestamps();
                    junction
                });

                junction.add_attribute_if_missing(
                    &association.foreign_key,
                    AttributeSpec::new(&source_key_type).not_null(),
                );
                if let Some(other_key) = &association.other_key {
                    junction.add_attribute_if_missing(
                        other_key,
                        AttributeSpec::new(&target_key_type).not_null(),
                    );

                    if association.junction_unique {
                        let key = vec![association.foreign_key.clone(), other_key.clone()];
                        let reversed = vec![other_key.clone(), association.foreign_key.clone()];
                        if !junction.unique_keys.contains(&key)
                            && !junction.unique_keys.contains(&reversed)
                        {
                            junction.unique_keys.push(key);
                        }
                    }
                }
            }
        }

        if let Some(model) = self.models.get_mut(source) {
            model.associations.push(association);
        }
        Ok(())
    }

    fn queue_junction_indexes(&mut self, definition: &ModelDefinition) {
        let model = match self.models.get_mut(&definition.identity()) {
            Some(model) => model,
            None => return,
        };

        for index in definition
            .options
            .indexes
            .iter()
            .filter(|index| index.is_junction_index())
        {
            if model
                .pending_indexes
                .iter()
                .any(|pending| pending.fields == index.fields)
            {
                continue;
            }
            debug!(
                "Queued junction index {} on {}",
                index.derived_name(&model.table_name),
                model.name
            );
            model.pending_indexes.push(index.clone());
        }
    }

    pub fn get(&self, identity: &str) -> Option<&BoundModel> {
        self.models.get(&identity.to_lowercase())
    }

    /// Models bound to `connection`, ordered by identity.
    pub fn models_for(&self, connection: &str) -> Vec<&BoundModel> {
        self.models
            .values()
            .filter(|model| model.connection == connection)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoundModel> {
        self.models.values()
    }

    /// Global ids of definitions left to other data layers.
    pub fn foreign(&self) -> &[String] {
        &self.foreign
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::association::AssociationOptions;
    use crate::model::definition::ModelOptions;
    use crate::pool::{
        tracing_query_logger, ConnectionConfig, Dialect, Driver, DriverFactory, OwnedConnection,
        TextRow,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct NullDriver;

    #[async_trait]
    impl Driver for NullDriver {
        fn dialect(&self) -> Dialect {
            Dialect::Postgres
        }

        async fn query_text(&self, _sql: &str, _params: &[&str]) -> Result<Vec<TextRow>> {
            Ok(Vec::new())
        }

        async fn execute(&self, _sql: &str) -> Result<()> {
            Ok(())
        }
    }

    struct NullFactory;

    impl DriverFactory for NullFactory {
        fn create(&self, connection: &OwnedConnection) -> Result<Arc<dyn Driver>> {
            if connection.dialect == Dialect::Mssql {
                return Err(SyncError::UnsupportedDialect {
                    connection: connection.name.clone(),
                    dialect: connection.dialect.to_string(),
                });
            }
            Ok(Arc::new(NullDriver))
        }
    }

    fn connections() -> ConnectionRegistry {
        let configs: BTreeMap<String, ConnectionConfig> = serde_json::from_value(json!({
            "main": {"dialect": "postgres", "url": "postgres://localhost/app"},
            "analytics": {"dialect": "postgres", "url": "postgres://localhost/analytics"},
            "disk": {"adapter": "waterline-disk"},
            "reports": {"dialect": "mssql", "database": "reports"}
        }))
        .unwrap();
        ConnectionRegistry::build_with(&configs, "main", &tracing_query_logger(), &NullFactory)
            .unwrap()
    }

    fn bind(sources: Vec<ModelSource>) -> Result<ModelRegistry> {
        ModelRegistry::bind(sources, &connections(), &RegistryOptions::default())
    }

    #[test]
    fn test_foreign_definitions_are_excluded() {
        let registry = bind(vec![
            ModelDefinition::new("User", ModelOptions::default()).into(),
            ModelSource::Foreign {
                global_id: "Archive".to_string(),
            },
        ])
        .unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.get("archive").is_none());
        assert_eq!(registry.foreign(), ["Archive".to_string()]);
    }

    #[test]
    fn test_definition_pass_defaults() {
        let registry = bind(vec![ModelDefinition::new("User", ModelOptions::default())
            .attribute("email", AttributeSpec::new("STRING").unique())
            .into()])
        .unwrap();

        let user = registry.get("USER").unwrap();
        assert_eq!(user.table_name, "user");
        assert_eq!(user.connection, "main");
        let names: Vec<&str> = user.attributes.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["id", "email", "createdAt", "updatedAt"]);
    }

    #[test]
    fn test_duplicate_identity_is_fatal() {
        let err = bind(vec![
            ModelDefinition::new("User", ModelOptions::default()).into(),
            ModelDefinition::new("user", ModelOptions::default()).into(),
        ])
        .unwrap_err();

        assert!(matches!(err, SyncError::DuplicateModel { ref identity, .. } if identity == "user"));
    }

    #[test]
    fn test_unknown_or_foreign_connection_is_fatal() {
        let err = bind(vec![ModelDefinition::new("User", ModelOptions::default())
            .connection("disk")
            .into()])
        .unwrap_err();

        assert!(matches!(err, SyncError::UnknownConnection { ref connection, .. } if connection == "disk"));
    }

    #[test]
    fn test_model_binds_to_named_connection() {
        let registry = bind(vec![
            ModelDefinition::new("Event", ModelOptions::default())
                .connection("analytics")
                .into(),
            ModelDefinition::new("User", ModelOptions::default()).into(),
        ])
        .unwrap();

        let analytics: Vec<&str> = registry
            .models_for("analytics")
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(analytics, vec!["Event"]);
        assert_eq!(registry.models_for("main").len(), 1);
    }

    #[test]
    fn test_junction_scenario() {
        let user_role_options = ModelOptions {
            indexes: vec![IndexSpec::new(["userId", "roleId"])],
            ..Default::default()
        };

        let registry = bind(vec![
            ModelDefinition::new("User", ModelOptions::default())
                .associations(|builder| {
                    builder.belongs_to_many("Role", AssociationOptions::through("UserRole"))
                })
                .into(),
            ModelDefinition::new("Role", ModelOptions::default()).into(),
            ModelDefinition::new("UserRole", user_role_options).into(),
        ])
        .unwrap();

        let junction = registry.get("userrole").unwrap();
        assert!(junction.unique_keys.is_empty());
        assert!(junction.has_attribute("userId"));
        assert!(junction.has_attribute("roleId"));
        assert_eq!(junction.pending_indexes, vec![IndexSpec::new(["userId", "roleId"])]);

        let user = registry.get("user").unwrap();
        assert_eq!(user.associations.len(), 1);
        assert_eq!(user.associations[0].kind, AssociationKind::BelongsToMany);
    }

    #[test]
    fn test_implicit_junction_gets_unique_key() {
        let registry = bind(vec![
            ModelDefinition::new("User", ModelOptions::default())
                .associations(|builder| {
                    builder.belongs_to_many("Role", AssociationOptions::through("user_roles"))
                })
                .into(),
            ModelDefinition::new("Role", ModelOptions::default())
                .associations(|builder| {
                    builder.belongs_to_many("User", AssociationOptions::through("user_roles"))
                })
                .into(),
        ])
        .unwrap();

        let junction = registry.get("user_roles").unwrap();
        assert!(junction.implicit);
        assert_eq!(junction.table_name, "user_roles");
        assert_eq!(
            junction.unique_keys,
            vec![vec!["userId".to_string(), "roleId".to_string()]]
        );
    }

    #[test]
    fn test_foreign_keys_are_added() {
        let registry = bind(vec![
            ModelDefinition::new("User", ModelOptions::default())
                .associations(|builder| builder.has_many("Post", AssociationOptions::default()))
                .into(),
            ModelDefinition::new("Post", ModelOptions::default())
                .associations(|builder| {
                    builder.belongs_to("User", AssociationOptions::default().alias("author"))
                })
                .into(),
        ])
        .unwrap();

        let post = registry.get("post").unwrap();
        assert_eq!(
            post.attributes.iter().filter(|(n, _)| n == "userId").count(),
            1
        );
        assert_eq!(post.associations[0].alias.as_deref(), Some("author"));
    }

    #[test]
    fn test_default_scope_is_attached() {
        let registry = bind(vec![ModelDefinition::new("User", ModelOptions::default())
            .default_scope(|| json!({"where": {"deletedAt": null}}))
            .into()])
        .unwrap();

        assert_eq!(
            registry.get("user").unwrap().default_scope,
            Some(json!({"where": {"deletedAt": null}}))
        );
    }

    #[test]
    fn test_junction_indexes_are_deduplicated_by_fields() {
        let options = ModelOptions {
            indexes: vec![
                IndexSpec::new(["a", "b"]).unique(),
                IndexSpec::new(["a", "b"]),
                IndexSpec::new(["b", "a"]),
                IndexSpec::new(["b", "a"]).named("b_a_again"),
            ],
            ..Default::default()
        };
        let registry = bind(vec![ModelDefinition::new("Pair", options).into()]).unwrap();

        let pending = &registry.get("pair").unwrap().pending_indexes;
        assert_eq!(
            pending,
            &vec![IndexSpec::new(["a", "b"]).unique(), IndexSpec::new(["b", "a"])]
        );
    }

    #[test]
    fn test_extensions_respect_orm_version() {
        let extensions = ModelExtensions {
            class_methods: vec!["findByEmail".to_string()],
            instance_methods: Vec::new(),
        };
        let sources = || {
            vec![ModelDefinition::new("User", ModelOptions::default())
                .extensions(extensions.clone())
                .into()]
        };

        let modern = ModelRegistry::bind(sources(), &connections(), &RegistryOptions::default())
            .unwrap();
        assert_eq!(modern.get("user").unwrap().extensions, extensions);

        let legacy = ModelRegistry::bind(
            sources(),
            &connections(),
            &RegistryOptions {
                orm_major_version: 3,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(legacy.get("user").unwrap().extensions.is_empty());
    }

    #[test]
    fn test_models_on_driverless_connections_are_set_aside() {
        let registry = bind(vec![
            ModelDefinition::new("User", ModelOptions::default()).into(),
            ModelDefinition::new("Report", ModelOptions::default())
                .connection("reports")
                .into(),
        ])
        .unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.get("report").is_none());
        assert_eq!(registry.foreign(), ["Report".to_string()]);
    }
}
