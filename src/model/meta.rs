use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::core::{Result, Value};
use crate::model::Model;
use crate::model::field::{Field, is_primary_key_alias};
use crate::store::{Store, StoreAction, StoreData};

/// Lazy conversion applied to a special instance key the first time it is read.
pub type Converter = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// Revision key maintained by document stores.
pub const REV_KEY: &str = "_rev";

/// Revisions are integers when they parse as one, text otherwise.
pub fn rev_key(value: &Value) -> Result<Value> {
    Ok(match value {
        Value::Integer(_) => value.clone(),
        Value::Text(s) => match s.trim().parse::<i64>() {
            Ok(i) => Value::Integer(i),
            Err(_) => value.clone(),
        },
        Value::Float(_) => value
            .as_i64()
            .map(Value::Integer)
            .unwrap_or_else(|| Value::Text(value.to_string())),
        Value::Null => Value::Null,
        other => Value::Text(other.to_string()),
    })
}

/// Finalized schema of one model type.
///
/// Built once by the schema builder and shared read-only afterwards. Field
/// order is the merged declaration order; the primary key is resolved.
pub struct ModelMeta {
    name: String,
    app_label: Option<String>,
    table_name: String,
    is_abstract: bool,
    fields: Vec<Field>,
    pk_name: String,
    pk: Option<usize>,
    many_to_many: Vec<Field>,
    converters: BTreeMap<String, Converter>,
}

pub(crate) struct MetaParts {
    pub name: String,
    pub app_label: Option<String>,
    pub table_name: String,
    pub is_abstract: bool,
    pub fields: Vec<Field>,
    pub pk_name: String,
    pub many_to_many: Vec<Field>,
    pub converters: BTreeMap<String, Converter>,
}

impl ModelMeta {
    pub(crate) fn from_parts(parts: MetaParts) -> Self {
        let pk = if parts.is_abstract {
            None
        } else {
            parts
                .fields
                .iter()
                .position(|field| field.is_primary_key() && field.name() == parts.pk_name)
        };

        Self {
            name: parts.name,
            app_label: parts.app_label,
            table_name: parts.table_name,
            is_abstract: parts.is_abstract,
            fields: parts.fields,
            pk_name: parts.pk_name,
            pk,
            many_to_many: parts.many_to_many,
            converters: parts.converters,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn app_label(&self) -> Option<&str> {
        self.app_label.as_deref()
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(Field::name).collect()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name() == name)
    }

    pub fn field_by_store_name(&self, store_name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|field| field.get_store_name() == store_name)
    }

    /// Primary key descriptor. `None` only for abstract models.
    pub fn pk(&self) -> Option<&Field> {
        self.pk.map(|idx| &self.fields[idx])
    }

    /// Primary key name. A shortcut for `self.pk().name()`.
    pub fn pkname(&self) -> &str {
        &self.pk_name
    }

    /// Convert a primary key value to its in-memory representation.
    pub fn pk_to_python(&self, value: &Value) -> Result<Value> {
        match self.pk() {
            Some(pk) => pk.to_python(value),
            None => Ok(value.clone()),
        }
    }

    pub fn many_to_many(&self) -> &[Field] {
        &self.many_to_many
    }

    pub fn many_to_many_field(&self, name: &str) -> Option<&Field> {
        self.many_to_many.iter().find(|field| field.name() == name)
    }

    pub fn converter(&self, key: &str) -> Option<&Converter> {
        self.converters.get(key)
    }

    pub fn has_converter(&self, key: &str) -> bool {
        self.converters.contains_key(key)
    }

    /// Indexed fields: the primary key first, then every field flagged
    /// `index`, in field order.
    pub fn indexes(&self) -> Vec<&Field> {
        let mut indexes: Vec<&Field> = self.pk().into_iter().collect();
        indexes.extend(
            self.fields
                .iter()
                .filter(|field| field.is_index() && !field.is_primary_key()),
        );
        indexes
    }

    /// Instance key for `name`: primary key aliases resolve to the primary
    /// key, declared fields to their store name.
    pub fn resolve_key(&self, name: &str) -> String {
        let name = if is_primary_key_alias(name) {
            self.pkname()
        } else {
            name
        };
        match self.field(name) {
            Some(field) => field.get_store_name().to_string(),
            None => name.to_string(),
        }
    }

    /// Lazy sequence of `(store name, value)` pairs to persist `instance`.
    pub fn store_data<'a>(
        &'a self,
        instance: &'a Model,
        store: &'a dyn Store,
        action: StoreAction,
    ) -> StoreData<'a> {
        StoreData::new(self, instance, store, action)
    }
}

impl fmt::Debug for ModelMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelMeta")
            .field("name", &self.name)
            .field("app_label", &self.app_label)
            .field("table_name", &self.table_name)
            .field("is_abstract", &self.is_abstract)
            .field("fields", &self.field_names())
            .field("pk_name", &self.pk_name)
            .field(
                "many_to_many",
                &self.many_to_many.iter().map(Field::name).collect::<Vec<_>>(),
            )
            .field("converters", &self.converters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl fmt::Display for ModelMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rev_key_conversion() {
        assert_eq!(rev_key(&Value::Text("12".into())).unwrap(), Value::Integer(12));
        assert_eq!(
            rev_key(&Value::Text("3-abc".into())).unwrap(),
            Value::Text("3-abc".into())
        );
        assert_eq!(rev_key(&Value::Integer(4)).unwrap(), Value::Integer(4));
        let once = rev_key(&Value::Text("7".into())).unwrap();
        assert_eq!(rev_key(&once).unwrap(), once);
    }
}
