// ============================================================================
// lux-odm: object-document mapper core
// ============================================================================

pub mod config;
pub mod core;
mod macros;
pub mod mapper;
pub mod model;
pub mod store;

#[doc(hidden)]
pub use paste;

pub use config::OdmConfig;
pub use core::{FromValue, OdmError, Result, Value};
pub use mapper::{Manager, Mapper};
pub use model::{
    Field, FieldKind, Model, ModelDef, ModelMeta, ModelRegistry, RelatedManager, create_model,
};
pub use store::{MemoryMapper, MemoryStore, Store, StoreAction};
