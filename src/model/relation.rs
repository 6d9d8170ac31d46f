//! Relations between models.
//!
//! Many-to-many fields without an explicit junction get one synthesized by
//! [`through_def`]: two foreign keys, one to each side, and a composite
//! primary key over both. The reverse accessor of each junction foreign key
//! is a [`RelatedManager`] yielding instances of the other side.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{Level, event};

use crate::config::OdmConfig;
use crate::core::{OdmError, Result, Value};
use crate::model::builder::ModelDef;
use crate::model::field::Field;
use crate::model::meta::ModelMeta;
use crate::model::Model;

/// Related-manager parameters carried by a junction foreign key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedManagerSpec {
    /// Model whose instances the manager yields.
    pub model: String,
    /// Junction field referencing the owner.
    pub source_field: String,
    /// Junction field referencing `model`.
    pub target_field: String,
}

/// Field names and model name of the junction between `model` and `relmodel`.
///
/// Returns `(name_model, name_relmodel, through)`. When both sides are the
/// same model the second name carries the self-relation suffix.
pub fn junction_names(model: &str, relmodel: &str, config: &OdmConfig) -> (String, String, String) {
    let name_model = model.to_string();
    let mut name_relmodel = relmodel.to_string();
    if name_model == name_relmodel {
        name_relmodel.push_str(&config.self_relation_suffix);
    }
    let through = format!("{}_{}", name_model, name_relmodel);
    (name_model, name_relmodel, through)
}

/// Declaration of the junction model for the many-to-many `field` declared on
/// `model` and pointing at `relmodel`.
pub fn through_def(
    model: &ModelMeta,
    field: &Field,
    relmodel: &ModelMeta,
    config: &OdmConfig,
) -> ModelDef {
    let (name_model, name_relmodel, through) =
        junction_names(model.name(), relmodel.name(), config);

    let related_name = field
        .get_related_name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}{}", model.name(), config.related_name_suffix));

    let to_model = Field::foreign_key(model.name())
        .required()
        .related_name(field.name())
        .related_manager(RelatedManagerSpec {
            model: relmodel.name().to_string(),
            source_field: name_model.clone(),
            target_field: name_relmodel.clone(),
        });
    let to_relmodel = Field::foreign_key(relmodel.name())
        .required()
        .related_name(&related_name)
        .related_manager(RelatedManagerSpec {
            model: model.name().to_string(),
            source_field: name_relmodel.clone(),
            target_field: name_model.clone(),
        });
    let pk = Field::composite_id([name_model.clone(), name_relmodel.clone()]).primary_key();

    event!(
        Level::DEBUG,
        model = model.name(),
        field = field.name(),
        through = through.as_str(),
        "synthesizing junction model"
    );

    let mut def = ModelDef::new(&through)
        .field(&name_model, to_model)
        .field(&name_relmodel, to_relmodel)
        .field("id", pk);
    if let Some(label) = model.app_label() {
        def = def.app_label(label);
    }
    def
}

/// Accessor for the instances related to an owner.
///
/// Rows of `through` whose `source_field` references the owner are the
/// relation. For a reverse foreign key those rows are the result; for a
/// many-to-many relation each row's `target_field` is looked up in `target`.
#[derive(Debug, Clone)]
pub struct RelatedManager {
    through: Arc<ModelMeta>,
    source_field: String,
    target: Arc<ModelMeta>,
    target_field: Option<String>,
}

impl RelatedManager {
    /// Reverse accessor of a plain foreign key `field` declared on `model`.
    pub fn reverse(model: Arc<ModelMeta>, field: &str) -> Self {
        Self {
            through: Arc::clone(&model),
            source_field: field.to_string(),
            target: model,
            target_field: None,
        }
    }

    /// Many-to-many accessor going through `through`.
    pub fn many_to_many(
        through: Arc<ModelMeta>,
        source_field: &str,
        target: Arc<ModelMeta>,
        target_field: &str,
    ) -> Self {
        Self {
            through,
            source_field: source_field.to_string(),
            target,
            target_field: Some(target_field.to_string()),
        }
    }

    /// Many-to-many accessor over a user-declared junction. The first foreign
    /// key to `owner` is the source, the next one to `target` the target.
    pub fn explicit(through: Arc<ModelMeta>, owner: &str, target: Arc<ModelMeta>) -> Result<Self> {
        let source = through
            .fields()
            .iter()
            .find(|field| field.is_foreign_key() && refers_to(field, owner))
            .map(|field| field.name().to_string())
            .ok_or_else(|| {
                OdmError::field(format!(
                    "Junction '{}' has no foreign key to '{}'",
                    through.name(),
                    owner
                ))
            })?;
        let target_field = through
            .fields()
            .iter()
            .find(|field| {
                field.is_foreign_key()
                    && refers_to(field, target.name())
                    && field.name() != source
            })
            .map(|field| field.name().to_string())
            .ok_or_else(|| {
                OdmError::field(format!(
                    "Junction '{}' has no foreign key to '{}'",
                    through.name(),
                    target.name()
                ))
            })?;

        Ok(Self {
            through,
            source_field: source,
            target,
            target_field: Some(target_field),
        })
    }

    pub fn through(&self) -> &Arc<ModelMeta> {
        &self.through
    }

    pub fn source_field(&self) -> &str {
        &self.source_field
    }

    pub fn target(&self) -> &Arc<ModelMeta> {
        &self.target
    }

    pub fn target_field(&self) -> Option<&str> {
        self.target_field.as_deref()
    }

    pub fn is_many_to_many(&self) -> bool {
        self.target_field.is_some()
    }

    /// Unsaved junction row relating `owner` to `other`. The row inherits the
    /// owner's mapper.
    pub fn link(&self, owner: &Model, other: &Model) -> Result<Model> {
        let target_field = self.target_field.as_deref().ok_or_else(|| {
            OdmError::field(format!(
                "'{}' is a foreign key of '{}', assign it on the related instance",
                self.source_field,
                self.through.name()
            ))
        })?;

        let mut row = Model::new(
            Arc::clone(&self.through),
            [
                (self.source_field.as_str(), owner_pk(owner)?),
                (target_field, owner_pk(other)?),
            ],
        )?;
        if let Some(mapper) = owner.mapper() {
            row.bind_mapper(Arc::clone(mapper));
        }
        Ok(row)
    }

    /// Link `owner` to `other` and save the junction row.
    pub async fn add(&self, owner: &Model, other: &Model) -> Result<Model> {
        let mut row = self.link(owner, other)?;
        row.save().await?;
        Ok(row)
    }

    /// Every instance related to `owner`, loaded through the owner's mapper.
    pub async fn all(&self, owner: &Model) -> Result<Vec<Model>> {
        let mapper = owner
            .mapper()
            .cloned()
            .ok_or_else(|| OdmError::MapperNotAvailable(owner.meta().name().to_string()))?;
        let pk = owner_pk(owner)?;

        let rows = mapper
            .manager(&self.through)?
            .filter(&self.source_field, &pk)
            .await?;

        let Some(target_field) = &self.target_field else {
            return Ok(rows);
        };

        let key = self.through.resolve_key(target_field);
        let manager = mapper.manager(&self.target)?;
        let lookups = rows
            .iter()
            .filter_map(|row| row.get_raw(&key))
            .map(|fk| manager.get(fk));
        let related = try_join_all(lookups).await?;
        Ok(related.into_iter().flatten().collect())
    }
}

fn refers_to(field: &Field, model: &str) -> bool {
    field
        .related_model()
        .is_some_and(|target| target.eq_ignore_ascii_case(model))
}

fn owner_pk(instance: &Model) -> Result<Value> {
    instance
        .pk()
        .filter(|pk| !pk.is_nothing())
        .ok_or_else(|| {
            OdmError::field(format!(
                "Instance of '{}' has no primary key value",
                instance.meta().name()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_junction_names() {
        let config = OdmConfig::default();
        assert_eq!(
            junction_names("post", "tag", &config),
            ("post".into(), "tag".into(), "post_tag".into())
        );
        assert_eq!(
            junction_names("person", "person", &config),
            ("person".into(), "person2".into(), "person_person2".into())
        );

        let custom = OdmConfig::new().self_relation_suffix("_b");
        assert_eq!(junction_names("node", "node", &custom).2, "node_node_b");
    }
}
