mod association;
mod definition;
mod file;
mod registry;

pub use association::{
    default_foreign_key, Association, AssociationBuilder, AssociationKind, AssociationOptions,
    JunctionUniquePolicy,
};
pub use definition::{
    AssociationFn, AttributeSpec, IndexSpec, ModelDefinition, ModelExtensions, ModelOptions,
    ModelSource, Scope, ScopeFn,
};
pub use file::{load_model_sources, parse_model_sources};
pub use registry::{BoundModel, ModelRegistry, RegistryOptions};
