//! Persistence collaborator interface.
//!
//! Instances never talk to a store directly: `Model::save` and
//! `Model::delete` ask the bound [`Mapper`] for the [`Manager`] of the
//! instance's model and delegate to it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{Result, Value};
use crate::model::meta::ModelMeta;
use crate::model::Model;

pub trait Mapper: Send + Sync {
    /// Manager of `meta`, or `OdmError::ManagerNotFound`.
    fn manager(&self, meta: &ModelMeta) -> Result<Arc<dyn Manager>>;
}

#[async_trait]
pub trait Manager: Send + Sync {
    fn meta(&self) -> &Arc<ModelMeta>;

    /// Insert or replace the row of `instance`.
    async fn save(&self, instance: &Model) -> Result<()>;

    async fn delete(&self, instance: &Model) -> Result<()>;

    async fn get(&self, pk: &Value) -> Result<Option<Model>>;

    /// Instances whose `field` equals `value`.
    async fn filter(&self, field: &str, value: &Value) -> Result<Vec<Model>>;

    async fn all(&self) -> Result<Vec<Model>>;
}
