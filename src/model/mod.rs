pub mod builder;
pub mod field;
pub mod instance;
pub mod meta;
pub mod registry;
pub mod relation;

pub use builder::{ModelDef, collect_fields, create_model, resolve_schema};
pub use field::{Field, FieldKind, PRIMARY_KEY_ALIASES};
pub use instance::Model;
pub use meta::{Converter, ModelMeta, REV_KEY};
pub use registry::ModelRegistry;
pub use relation::{RelatedManager, RelatedManagerSpec};
