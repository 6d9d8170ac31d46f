use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::core::{OdmError, Result, Value};
use crate::mapper::Mapper;
use crate::model::field::{FieldKind, composite_value, is_private_field};
use crate::model::meta::ModelMeta;

/// One row of a model.
///
/// Values are kept in insertion order under their store names. Reads convert
/// lazily, once per key, and writes record the key in the dirty set only when
/// the stored value actually changes.
pub struct Model {
    meta: Arc<ModelMeta>,
    data: Vec<(String, Value)>,
    access_cache: HashSet<String>,
    modified: HashSet<String>,
    tracking: bool,
    mapper: Option<Arc<dyn Mapper>>,
}

impl Model {
    /// Build an instance from field values. Declared defaults and the
    /// automatic identifier fill the gaps; nothing is marked dirty.
    pub fn new<I, K, V>(meta: Arc<ModelMeta>, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut model = Self::empty(meta)?;
        model.update(values)?;

        let meta = Arc::clone(&model.meta);
        for field in meta.fields() {
            let present = model
                .get_raw(field.get_store_name())
                .is_some_and(|value| !value.is_nothing());
            if present {
                continue;
            }
            if let Some(value) = field.initial_value() {
                model.put(field.get_store_name(), value);
            }
        }

        model.tracking = true;
        Ok(model)
    }

    /// Instance loaded from store pairs. Values are kept as stored and
    /// converted on first read.
    pub fn from_store<I, K>(meta: Arc<ModelMeta>, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut model = Self::empty(meta)?;
        for (key, value) in pairs {
            model.put(&key.into(), value);
        }
        model.tracking = true;
        Ok(model)
    }

    fn empty(meta: Arc<ModelMeta>) -> Result<Self> {
        if meta.is_abstract() {
            return Err(OdmError::AbstractModel(meta.name().to_string()));
        }
        Ok(Self {
            meta,
            data: Vec::new(),
            access_cache: HashSet::new(),
            modified: HashSet::new(),
            tracking: false,
            mapper: None,
        })
    }

    pub fn meta(&self) -> &Arc<ModelMeta> {
        &self.meta
    }

    /// Value of `name`, converted on the first read.
    ///
    /// Primary key aliases resolve to the primary key. Special keys run
    /// through the schema converters, declared fields through their
    /// descriptor.
    pub fn get(&mut self, name: &str) -> Result<Option<&Value>> {
        let key = self.meta.resolve_key(name);
        let Some(idx) = self.position(&key) else {
            return Ok(None);
        };

        if !self.access_cache.contains(&key) {
            let raw = &self.data[idx].1;
            let converted = if let Some(converter) = self.meta.converter(&key) {
                converter(raw)?
            } else if let Some(field) = self.meta.field_by_store_name(&key) {
                field.to_python(raw)?
            } else {
                raw.clone()
            };
            self.data[idx].1 = converted;
            self.access_cache.insert(key);
        }

        Ok(Some(&self.data[idx].1))
    }

    /// Stored value of `name` without conversion.
    pub fn get_raw(&self, name: &str) -> Option<&Value> {
        let key = self.meta.resolve_key(name);
        self.position(&key).map(|idx| &self.data[idx].1)
    }

    /// Primary key value. Composite keys are computed from their components.
    pub fn pk(&self) -> Option<Value> {
        let field = self.meta.pk()?;
        match field.kind() {
            FieldKind::CompositeId { fields } => match composite_value(fields, self) {
                Value::Null => None,
                value => Some(value),
            },
            _ => self.get_raw(field.get_store_name()).cloned(),
        }
    }

    /// Assign `value` to `name`.
    ///
    /// With `modify` the value goes through the field's coercion and the key
    /// becomes dirty when it was absent or differs from the stored value.
    /// Without it the value is stored as given and converted on next read.
    /// Private keys (`_rev`, `_mapper`, ...) are always stored as given and
    /// never become dirty.
    pub fn set(&mut self, name: &str, value: impl Into<Value>, modify: bool) -> Result<()> {
        let value = value.into();
        if is_private_field(name) {
            self.access_cache.remove(name);
            self.put(name, value);
            return Ok(());
        }

        let key = self.meta.resolve_key(name);
        if !modify {
            self.access_cache.remove(&key);
            self.put(&key, value);
            return Ok(());
        }

        if self.meta.many_to_many_field(name).is_some() {
            return Err(OdmError::field(format!(
                "'{}' is a many-to-many relation of '{}', use its related manager",
                name,
                self.meta.name()
            )));
        }

        let value = match self.meta.field_by_store_name(&key) {
            Some(field) => field.get_value(value)?,
            None => value,
        };

        self.access_cache.remove(&key);
        let changed = self
            .position(&key)
            .map(|idx| &self.data[idx].1)
            .is_none_or(|current| current != &value);
        if changed && self.tracking {
            self.modified.insert(key.clone());
        }
        self.put(&key, value);
        Ok(())
    }

    pub fn insert(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.set(name, value, true)
    }

    pub fn update<I, K, V>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (name, value) in values {
            self.set(name.as_ref(), value, true)?;
        }
        Ok(())
    }

    /// Point the foreign key `name` at `related`.
    pub fn set_related(&mut self, name: &str, related: &Model) -> Result<()> {
        let field = self
            .meta
            .field(name)
            .filter(|field| field.is_foreign_key())
            .ok_or_else(|| {
                OdmError::field(format!(
                    "'{}' is not a foreign key of '{}'",
                    name,
                    self.meta.name()
                ))
            })?;
        if let Some(target) = field.related_model() {
            if !target.eq_ignore_ascii_case(related.meta.name()) {
                return Err(OdmError::field(format!(
                    "'{}' expects '{}', got '{}'",
                    name,
                    target,
                    related.meta.name()
                )));
            }
        }
        let pk = related.pk().ok_or_else(|| {
            OdmError::field(format!(
                "Instance of '{}' has no primary key value",
                related.meta.name()
            ))
        })?;
        self.set(name, pk, true)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(&self.meta.resolve_key(name)).is_some()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.iter().map(|(key, _)| key.as_str())
    }

    pub(crate) fn entries(&self) -> &[(String, Value)] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Keys changed since the instance was built, loaded or saved.
    pub fn modified(&self) -> &HashSet<String> {
        &self.modified
    }

    pub fn is_modified(&self, name: &str) -> bool {
        self.modified.contains(&self.meta.resolve_key(name))
    }

    pub fn is_accessed(&self, name: &str) -> bool {
        self.access_cache.contains(&self.meta.resolve_key(name))
    }

    pub fn mark_clean(&mut self) {
        self.modified.clear();
    }

    pub fn bind_mapper(&mut self, mapper: Arc<dyn Mapper>) {
        self.mapper = Some(mapper);
    }

    pub fn mapper(&self) -> Option<&Arc<dyn Mapper>> {
        self.mapper.as_ref()
    }

    fn bound_mapper(&self) -> Result<Arc<dyn Mapper>> {
        self.mapper
            .clone()
            .ok_or_else(|| OdmError::MapperNotAvailable(self.meta.name().to_string()))
    }

    /// Persist through the bound mapper and clear the dirty set.
    pub async fn save(&mut self) -> Result<()> {
        let manager = self.bound_mapper()?.manager(&self.meta)?;
        manager.save(self).await?;
        self.modified.clear();
        Ok(())
    }

    /// Remove from the store through the bound mapper.
    pub async fn delete(&self) -> Result<()> {
        let manager = self.bound_mapper()?.manager(&self.meta)?;
        manager.delete(self).await
    }

    /// JSON object of this instance: the primary key first, then every
    /// public key in insertion order. Absent values are omitted.
    pub fn to_json(&mut self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let mut json = serde_json::Map::new();
        let meta = Arc::clone(&self.meta);

        let pk_key = meta.pk().map(|pk| pk.get_store_name().to_string());
        if let (Some(pk_field), Some(pk)) = (meta.pk(), self.pk()) {
            if !pk.is_nothing() {
                json.insert(meta.pkname().to_string(), pk_field.to_json(&pk));
            }
        }

        let keys: Vec<String> = self.keys().map(str::to_string).collect();
        for key in keys {
            if pk_key.as_deref() == Some(key.as_str()) || is_private_field(&key) {
                continue;
            }
            let Some(value) = self.get(&key)?.cloned() else {
                continue;
            };
            if value.is_nothing() {
                continue;
            }
            let rendered = match meta.field_by_store_name(&key) {
                Some(field) => field.to_json(&value),
                None => value.to_json(),
            };
            json.insert(key, rendered);
        }

        Ok(json)
    }

    pub fn to_json_string(&mut self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_json()?)?)
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.data.iter().position(|(existing, _)| existing == key)
    }

    fn put(&mut self, key: &str, value: Value) {
        match self.position(key) {
            Some(idx) => self.data[idx].1 = value,
            None => self.data.push((key.to_string(), value)),
        }
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.meta, &other.meta) && self.pk() == other.pk()
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("model", &self.meta.name())
            .field("data", &self.data)
            .field("modified", &self.modified)
            .field("bound", &self.mapper.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::model::{Field, ModelDef, ModelRegistry};

    fn person() -> Arc<ModelMeta> {
        let mut registry = ModelRegistry::new();
        ModelDef::new("Person")
            .field("name", Field::char().required())
            .field("age", Field::integer())
            .field("active", Field::boolean().default(true))
            .build(&mut registry)
            .unwrap()
    }

    #[test]
    fn test_construction_is_clean() {
        let model = Model::new(person(), [("name", "Ann")]).unwrap();
        assert!(model.modified().is_empty());
        assert_eq!(model.get_raw("name"), Some(&Value::Text("Ann".into())));
        assert_eq!(model.get_raw("active"), Some(&Value::Boolean(true)));
        assert!(matches!(model.pk(), Some(Value::Text(_))));
    }

    #[test]
    fn test_set_tracks_changes_only() {
        let mut model = Model::new(person(), [("name", "Ann")]).unwrap();

        model.set("name", "Ann", true).unwrap();
        assert!(!model.is_modified("name"));

        model.set("name", "Bob", true).unwrap();
        assert!(model.is_modified("name"));

        model.set("age", 30, true).unwrap();
        assert!(model.is_modified("age"));

        model.mark_clean();
        model.set("age", "30", true).unwrap();
        assert!(!model.is_modified("age"));
    }

    #[test]
    fn test_set_without_modify_is_raw() {
        let mut model = Model::new(person(), Vec::<(&str, Value)>::new()).unwrap();
        model.set("age", "41", false).unwrap();
        assert!(model.modified().is_empty());
        assert_eq!(model.get_raw("age"), Some(&Value::Text("41".into())));
        assert_eq!(model.get("age").unwrap(), Some(&Value::Integer(41)));
    }

    #[test]
    fn test_private_writes_are_not_tracked() {
        let mut model = Model::new(person(), [("name", "Ann")]).unwrap();

        model.set("_rev", "3", true).unwrap();
        model.set("Type", "person", true).unwrap();
        assert!(model.modified().is_empty());
        assert_eq!(model.get_raw("_rev"), Some(&Value::Text("3".into())));
        assert_eq!(model.get("_rev").unwrap(), Some(&Value::Integer(3)));

        model.set("_rev", "4", true).unwrap();
        assert!(!model.is_accessed("_rev"));
        assert_eq!(model.get("_rev").unwrap(), Some(&Value::Integer(4)));
        assert!(model.modified().is_empty());
    }

    #[test]
    fn test_aliases_resolve_to_pk() {
        let mut model = Model::new(person(), [("name", "Ann")]).unwrap();
        let id = model.pk().unwrap();
        for alias in ["id", "ID", "pk", "PK"] {
            assert_eq!(model.get(alias).unwrap(), Some(&id));
        }
    }

    #[test]
    fn test_converter_runs_once() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        let mut registry = ModelRegistry::new();
        let meta = ModelDef::new("Doc")
            .converter("_stamp", |value| {
                CALLS.fetch_add(1, Ordering::SeqCst);
                Ok(value.clone())
            })
            .build(&mut registry)
            .unwrap();

        let mut model = Model::from_store(meta, [("_stamp", Value::Integer(1))]).unwrap();
        model.get("_stamp").unwrap();
        model.get("_stamp").unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert!(model.is_accessed("_stamp"));
    }

    #[test]
    fn test_many_to_many_is_not_assignable() {
        let mut registry = ModelRegistry::new();
        let meta = ModelDef::new("Person")
            .field("friends", Field::many_to_many("self"))
            .build(&mut registry)
            .unwrap();
        let mut model = Model::new(meta, Vec::<(&str, Value)>::new()).unwrap();
        assert!(model.set("friends", "x", true).unwrap_err().is_field_error());
    }
}
