//! Schema builder.
//!
//! A [`ModelDef`] is the declaration of a model: its bases, its own fields and
//! the metadata options. [`resolve_schema`] turns a declaration into an
//! immutable [`ModelMeta`]; [`ModelDef::build`] does so and registers the
//! result with a [`ModelRegistry`].

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::config::OdmConfig;
use crate::core::{OdmError, Result, Value};
use crate::model::ModelRegistry;
use crate::model::field::{Field, FieldKind, is_primary_key_alias, is_private_field};
use crate::model::meta::{Converter, MetaParts, ModelMeta, REV_KEY, rev_key};

/// Declaration of a model type.
pub struct ModelDef {
    name: String,
    bases: Vec<Arc<ModelMeta>>,
    fields: Vec<(String, Field)>,
    is_abstract: bool,
    app_label: Option<String>,
    table_name: Option<String>,
    pk_name: Option<String>,
    converters: Vec<(String, Converter)>,
}

impl ModelDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            bases: Vec::new(),
            fields: Vec::new(),
            is_abstract: false,
            app_label: None,
            table_name: None,
            pk_name: None,
            converters: Vec::new(),
        }
    }

    /// Inherit the fields of `base`. Bases are merged in the order added.
    pub fn base(mut self, base: &Arc<ModelMeta>) -> Self {
        self.bases.push(Arc::clone(base));
        self
    }

    pub fn field(mut self, name: &str, field: Field) -> Self {
        self.fields.push((name.to_string(), field));
        self
    }

    /// Abstract models only carry fields for subclasses to inherit.
    pub fn abstract_model(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn app_label(mut self, label: &str) -> Self {
        self.app_label = Some(label.to_string());
        self
    }

    pub fn table_name(mut self, table_name: &str) -> Self {
        self.table_name = Some(table_name.to_string());
        self
    }

    /// Name of the synthesized primary key when no field is marked as one.
    pub fn pk_name(mut self, name: &str) -> Self {
        self.pk_name = Some(name.to_string());
        self
    }

    /// Lazy conversion for the instance key `key`.
    pub fn converter<F>(mut self, key: &str, converter: F) -> Self
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.converters.push((key.to_string(), Arc::new(converter)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn build(self, registry: &mut ModelRegistry) -> Result<Arc<ModelMeta>> {
        registry.register(self)
    }
}

fn upsert(fields: &mut Vec<(String, Field)>, name: &str, field: Field) {
    match fields.iter_mut().find(|(existing, _)| existing == name) {
        Some(slot) => slot.1 = field,
        None => fields.push((name.to_string(), field)),
    }
}

/// Merge inherited and declared fields.
///
/// Base fields, many-to-many relations included, come first, in base order
/// and each base's own field order, followed by `declared` sorted by
/// creation counter. A name seen again replaces the earlier descriptor in
/// place. Every descriptor is a copy.
pub fn collect_fields(
    bases: &[Arc<ModelMeta>],
    declared: &[(String, Field)],
) -> Vec<(String, Field)> {
    let mut merged: Vec<(String, Field)> = Vec::new();

    for base in bases {
        for field in base.fields().iter().chain(base.many_to_many()) {
            upsert(&mut merged, field.name(), field.clone());
        }
    }

    let mut own: Vec<&(String, Field)> = declared.iter().collect();
    own.sort_by_key(|(_, field)| field.creation_counter());
    for (name, field) in own {
        upsert(&mut merged, name, field.clone());
    }

    merged
}

/// Validate a declaration and produce its finalized schema.
pub fn resolve_schema(def: ModelDef, config: &OdmConfig) -> Result<ModelMeta> {
    let name = config.model_name(&def.name);
    if name.is_empty() {
        return Err(OdmError::field("Model name cannot be empty"));
    }

    let mut declared_names = HashSet::new();
    for (field_name, _) in &def.fields {
        if !declared_names.insert(field_name.as_str()) {
            return Err(OdmError::field(format!(
                "Field '{}' declared more than once in '{}'",
                field_name, name
            )));
        }
    }

    let merged = collect_fields(&def.bases, &def.fields);
    let (relations, merged): (Vec<_>, Vec<_>) = merged
        .into_iter()
        .partition(|(_, field)| field.is_many_to_many());

    let mut pk: Option<&str> = None;
    for (field_name, field) in merged.iter().chain(relations.iter()) {
        if field_name.is_empty() {
            return Err(OdmError::field(format!(
                "Empty field name in '{}'",
                name
            )));
        }
        if is_private_field(field_name) {
            return Err(OdmError::field(format!(
                "{} is a reserved field name",
                field_name
            )));
        }
        if field.is_primary_key() && !field.is_many_to_many() {
            if let Some(existing) = pk {
                return Err(OdmError::field(format!(
                    "Primary key already available in '{}': '{}' and '{}' are both primary keys",
                    name, existing, field_name
                )));
            }
            pk = Some(field_name);
        } else if is_primary_key_alias(field_name) {
            return Err(OdmError::field(format!(
                "{} is a reserved field name for primary keys",
                field_name
            )));
        }
    }
    let pk = pk.map(str::to_string);

    for (field_name, field) in &merged {
        if let FieldKind::CompositeId { fields } = field.kind() {
            if let Some(missing) = fields
                .iter()
                .find(|component| !merged.iter().any(|(n, _)| n == *component))
            {
                return Err(OdmError::field(format!(
                    "Composite key '{}' of '{}' references unknown field '{}'",
                    field_name, name, missing
                )));
            }
        }
    }

    let default_pk = def
        .pk_name
        .clone()
        .unwrap_or_else(|| config.default_pk_name.clone());

    let (fields, many_to_many, pk_name) = if def.is_abstract {
        let fields = merged.iter().map(|(n, f)| f.named(n)).collect();
        let many_to_many = relations.iter().map(|(n, f)| f.named(n)).collect();
        (fields, many_to_many, pk.unwrap_or(default_pk))
    } else {
        let mut fields: Vec<Field> = merged
            .iter()
            .map(|(n, f)| f.register_with_model(n, &name))
            .collect();
        let many_to_many = relations
            .iter()
            .map(|(n, f)| f.register_with_model(n, &name))
            .collect();

        let pk_name = match pk {
            Some(pk) => pk,
            None => {
                if fields.iter().any(|field| field.name() == default_pk) {
                    return Err(OdmError::field(format!(
                        "{} is reserved for the primary key of '{}'",
                        default_pk, name
                    )));
                }
                fields.insert(0, Field::auto_id().register_with_model(&default_pk, &name));
                default_pk
            }
        };
        (fields, many_to_many, pk_name)
    };

    let mut converters: BTreeMap<String, Converter> = BTreeMap::new();
    converters.insert(REV_KEY.to_string(), Arc::new(rev_key));
    for (key, converter) in def.converters {
        converters.insert(key, converter);
    }

    Ok(ModelMeta::from_parts(MetaParts {
        table_name: def.table_name.unwrap_or_else(|| name.clone()),
        app_label: def.app_label.or_else(|| config.default_app_label.clone()),
        name,
        is_abstract: def.is_abstract,
        fields,
        pk_name,
        many_to_many,
        converters,
    }))
}

/// Define and register a concrete model with default options.
pub fn create_model<I>(
    registry: &mut ModelRegistry,
    name: &str,
    fields: I,
) -> Result<Arc<ModelMeta>>
where
    I: IntoIterator<Item = (&'static str, Field)>,
{
    let def = fields
        .into_iter()
        .fold(ModelDef::new(name), |def, (field_name, field)| {
            def.field(field_name, field)
        });
    registry.register(def)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(def: ModelDef) -> Result<ModelMeta> {
        resolve_schema(def, &OdmConfig::default())
    }

    #[test]
    fn test_auto_primary_key_is_first() {
        let meta = resolve(
            ModelDef::new("Person")
                .field("name", Field::char().required())
                .field("age", Field::integer()),
        )
        .unwrap();

        assert_eq!(meta.name(), "person");
        assert_eq!(meta.table_name(), "person");
        assert_eq!(meta.field_names(), vec!["id", "name", "age"]);
        assert_eq!(meta.pkname(), "id");
        assert!(meta.pk().unwrap().is_auto_id());
    }

    #[test]
    fn test_explicit_primary_key_keeps_position() {
        let meta = resolve(
            ModelDef::new("Account")
                .field("owner", Field::char())
                .field("code", Field::char().primary_key())
                .field("balance", Field::float()),
        )
        .unwrap();

        assert_eq!(meta.field_names(), vec!["owner", "code", "balance"]);
        assert_eq!(meta.pkname(), "code");
        assert!(!meta.pk().unwrap().is_auto_id());
    }

    #[test]
    fn test_two_primary_keys_fail() {
        let err = resolve(
            ModelDef::new("Account")
                .field("a", Field::char().primary_key())
                .field("b", Field::char().primary_key()),
        )
        .unwrap_err();
        assert!(err.is_field_error());
    }

    #[test]
    fn test_reserved_names_fail() {
        for name in ["id", "ID", "pk", "PK", "_secret", "Type"] {
            let err = resolve(ModelDef::new("Thing").field(name, Field::char())).unwrap_err();
            assert!(err.is_field_error(), "{} accepted", name);
        }
    }

    #[test]
    fn test_alias_allowed_as_explicit_primary_key() {
        let meta = resolve(ModelDef::new("Thing").field("pk", Field::integer().primary_key()))
            .unwrap();
        assert_eq!(meta.pkname(), "pk");
        assert_eq!(meta.field_names(), vec!["pk"]);
    }

    #[test]
    fn test_duplicate_declaration_fails() {
        let err = resolve(
            ModelDef::new("Thing")
                .field("name", Field::char())
                .field("name", Field::integer()),
        )
        .unwrap_err();
        assert!(err.is_field_error());
    }

    #[test]
    fn test_custom_pk_name_collision_fails() {
        let err = resolve(
            ModelDef::new("Thing")
                .pk_name("key")
                .field("key", Field::char()),
        )
        .unwrap_err();
        assert!(err.is_field_error());
    }

    #[test]
    fn test_abstract_model_has_no_primary_key() {
        let meta = resolve(
            ModelDef::new("Timestamped")
                .abstract_model()
                .field("created", Field::datetime()),
        )
        .unwrap();

        assert!(meta.is_abstract());
        assert!(meta.pk().is_none());
        assert_eq!(meta.field_names(), vec!["created"]);
        assert_eq!(meta.fields()[0].model(), None);
    }

    #[test]
    fn test_composite_key_components_must_exist() {
        let err = resolve(
            ModelDef::new("Pair")
                .field("left", Field::char())
                .field("id", Field::composite_id(["left", "right"]).primary_key()),
        )
        .unwrap_err();
        assert!(err.is_field_error());
    }

    #[test]
    fn test_declared_fields_sorted_by_creation_counter() {
        let first = Field::char();
        let second = Field::integer();
        let merged = collect_fields(
            &[],
            &[("b".to_string(), second), ("a".to_string(), first)],
        );
        let names: Vec<&str> = merged.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_rev_converter_installed() {
        let meta = resolve(ModelDef::new("Doc").field("title", Field::char())).unwrap();
        assert!(meta.has_converter(REV_KEY));
    }
}
