//! Field descriptors.
//!
//! A [`Field`] carries the metadata of one model attribute together with the
//! conversions between its in-memory, store and JSON representations. Fields
//! are declared unbound, then copied and bound to a model by
//! [`Field::register_with_model`] while the schema is finalized. A bound field
//! is never mutated again.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::core::value::DATE_FORMAT;
use crate::core::{OdmError, Result, Value};
use crate::model::Model;
use crate::model::relation::RelatedManagerSpec;
use crate::store::Store;

/// Reserved names resolving to the primary key of any model.
pub const PRIMARY_KEY_ALIASES: [&str; 4] = ["id", "ID", "pk", "PK"];

pub const PRIVATE_FIELD_PREFIX: char = '_';

/// Many-to-many target naming the declaring model itself.
pub const SELF_RELATION: &str = "self";

static CREATION_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_creation_counter() -> u64 {
    CREATION_COUNTER.fetch_add(1, Ordering::Relaxed)
}

pub fn is_private_field(name: &str) -> bool {
    name.starts_with(PRIVATE_FIELD_PREFIX) || name == "Type"
}

pub fn is_primary_key_alias(name: &str) -> bool {
    PRIMARY_KEY_ALIASES.contains(&name)
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Char,
    Integer,
    Float,
    Boolean,
    DateTime,
    Date,
    Bytes,
    Json,
    /// Synthesized identifier, filled with a UUID v4 when an instance is built.
    AutoId,
    ForeignKey {
        to: String,
        related_name: Option<String>,
        manager: Option<RelatedManagerSpec>,
    },
    /// Primary key composed from the values of other fields.
    CompositeId { fields: Vec<String> },
    /// Never stored on the row itself; resolved through a junction model.
    ManyToMany {
        to: String,
        through: Option<String>,
        related_name: Option<String>,
    },
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Char => "CharField",
            Self::Integer => "IntegerField",
            Self::Float => "FloatField",
            Self::Boolean => "BooleanField",
            Self::DateTime => "DateTimeField",
            Self::Date => "DateField",
            Self::Bytes => "ByteField",
            Self::Json => "JSONField",
            Self::AutoId => "AutoIdField",
            Self::ForeignKey { .. } => "ForeignKey",
            Self::CompositeId { .. } => "CompositeIdField",
            Self::ManyToMany { .. } => "ManyToManyField",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    store_name: String,
    explicit_store_name: Option<String>,
    model: Option<String>,
    kind: FieldKind,
    required: bool,
    primary_key: bool,
    index: bool,
    default: Option<Value>,
    creation_counter: u64,
}

impl Field {
    pub fn new(kind: FieldKind) -> Self {
        let primary_key = matches!(kind, FieldKind::AutoId);
        Self {
            name: String::new(),
            store_name: String::new(),
            explicit_store_name: None,
            model: None,
            kind,
            required: false,
            primary_key,
            index: false,
            default: None,
            creation_counter: next_creation_counter(),
        }
    }

    pub fn char() -> Self {
        Self::new(FieldKind::Char)
    }

    pub fn integer() -> Self {
        Self::new(FieldKind::Integer)
    }

    pub fn float() -> Self {
        Self::new(FieldKind::Float)
    }

    pub fn boolean() -> Self {
        Self::new(FieldKind::Boolean)
    }

    pub fn datetime() -> Self {
        Self::new(FieldKind::DateTime)
    }

    pub fn date() -> Self {
        Self::new(FieldKind::Date)
    }

    pub fn bytes() -> Self {
        Self::new(FieldKind::Bytes)
    }

    pub fn json() -> Self {
        Self::new(FieldKind::Json)
    }

    pub fn auto_id() -> Self {
        Self::new(FieldKind::AutoId)
    }

    pub fn foreign_key(to: &str) -> Self {
        Self::new(FieldKind::ForeignKey {
            to: to.to_string(),
            related_name: None,
            manager: None,
        })
    }

    pub fn composite_id<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(FieldKind::CompositeId {
            fields: fields.into_iter().map(Into::into).collect(),
        })
    }

    /// Many-to-many relation to `to`; pass `"self"` for a relation between
    /// instances of the declaring model.
    pub fn many_to_many(to: &str) -> Self {
        Self::new(FieldKind::ManyToMany {
            to: to.to_string(),
            through: None,
            related_name: None,
        })
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn index(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn store_name(mut self, name: &str) -> Self {
        self.explicit_store_name = Some(name.to_string());
        self
    }

    /// Reverse accessor name on the related model. Ignored by non-relational
    /// fields.
    pub fn related_name(mut self, name: &str) -> Self {
        match &mut self.kind {
            FieldKind::ForeignKey { related_name, .. }
            | FieldKind::ManyToMany { related_name, .. } => {
                *related_name = Some(name.to_string());
            }
            _ => {}
        }
        self
    }

    /// Explicit junction model for a many-to-many field.
    pub fn through(mut self, model: &str) -> Self {
        if let FieldKind::ManyToMany { through, .. } = &mut self.kind {
            *through = Some(model.to_string());
        }
        self
    }

    pub(crate) fn related_manager(mut self, spec: RelatedManagerSpec) -> Self {
        if let FieldKind::ForeignKey { manager, .. } = &mut self.kind {
            *manager = Some(spec);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key under which the value is kept on instances and in stores.
    pub fn get_store_name(&self) -> &str {
        &self.store_name
    }

    /// Model this descriptor is registered with, `None` until registration
    /// and for fields of abstract models.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn is_index(&self) -> bool {
        self.index
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn creation_counter(&self) -> u64 {
        self.creation_counter
    }

    pub fn is_auto_id(&self) -> bool {
        matches!(self.kind, FieldKind::AutoId)
    }

    pub fn is_many_to_many(&self) -> bool {
        matches!(self.kind, FieldKind::ManyToMany { .. })
    }

    pub fn is_foreign_key(&self) -> bool {
        matches!(self.kind, FieldKind::ForeignKey { .. })
    }

    /// Target model of a relational field.
    pub fn related_model(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::ForeignKey { to, .. } | FieldKind::ManyToMany { to, .. } => Some(to),
            _ => None,
        }
    }

    pub fn get_related_name(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::ForeignKey { related_name, .. }
            | FieldKind::ManyToMany { related_name, .. } => related_name.as_deref(),
            _ => None,
        }
    }

    pub fn get_through(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::ManyToMany { through, .. } => through.as_deref(),
            _ => None,
        }
    }

    pub fn get_related_manager(&self) -> Option<&RelatedManagerSpec> {
        match &self.kind {
            FieldKind::ForeignKey { manager, .. } => manager.as_ref(),
            _ => None,
        }
    }

    /// Component field names of a composite key.
    pub fn components(&self) -> &[String] {
        match &self.kind {
            FieldKind::CompositeId { fields } => fields,
            _ => &[],
        }
    }

    /// Copy of this descriptor bound to `model` under `name`. A `"self"`
    /// relation target resolves to `model`.
    pub fn register_with_model(&self, name: &str, model: &str) -> Field {
        let mut field = self.named(name);
        field.model = Some(model.to_string());
        match &mut field.kind {
            FieldKind::ForeignKey { to, .. } | FieldKind::ManyToMany { to, .. }
                if to.as_str() == SELF_RELATION =>
            {
                *to = model.to_string();
            }
            _ => {}
        }
        field
    }

    /// Copy carrying a name but no model binding. Used for the fields of
    /// abstract models.
    pub(crate) fn named(&self, name: &str) -> Field {
        let mut field = self.clone();
        field.name = name.to_string();
        field.store_name = match &field.explicit_store_name {
            Some(store_name) => store_name.clone(),
            None if field.is_foreign_key() => format!("{}_id", name),
            None => name.to_string(),
        };
        field
    }

    /// Store representation to in-memory representation. Applying it to an
    /// already converted value returns the value unchanged.
    pub fn to_python(&self, value: &Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        match &self.kind {
            FieldKind::Char => match value {
                Value::Text(_) => Ok(value.clone()),
                Value::Bytes(bytes) => String::from_utf8(bytes.clone())
                    .map(Value::Text)
                    .map_err(|_| self.mismatch(value)),
                Value::Integer(_) | Value::Float(_) | Value::Boolean(_) => {
                    Ok(Value::Text(value.to_string()))
                }
                Value::Json(serde_json::Value::String(s)) => Ok(Value::Text(s.clone())),
                _ => Err(self.mismatch(value)),
            },
            FieldKind::Integer => match value {
                Value::Integer(_) => Ok(value.clone()),
                Value::Float(_) => value
                    .as_i64()
                    .map(Value::Integer)
                    .ok_or_else(|| self.mismatch(value)),
                Value::Boolean(b) => Ok(Value::Integer(i64::from(*b))),
                Value::Text(s) => {
                    let s = s.trim();
                    s.parse::<i64>()
                        .ok()
                        .or_else(|| Value::Float(s.parse::<f64>().ok()?).as_i64())
                        .map(Value::Integer)
                        .ok_or_else(|| self.mismatch(value))
                }
                _ => Err(self.mismatch(value)),
            },
            FieldKind::Float => match value {
                Value::Float(_) => Ok(value.clone()),
                Value::Integer(i) => Ok(Value::Float(*i as f64)),
                Value::Text(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| self.mismatch(value)),
                _ => Err(self.mismatch(value)),
            },
            FieldKind::Boolean => match value {
                Value::Boolean(_) => Ok(value.clone()),
                Value::Integer(i) => Ok(Value::Boolean(*i != 0)),
                Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" | "on" => Ok(Value::Boolean(true)),
                    "false" | "0" | "no" | "off" | "" => Ok(Value::Boolean(false)),
                    _ => Err(self.mismatch(value)),
                },
                _ => Err(self.mismatch(value)),
            },
            FieldKind::DateTime => match value {
                Value::Timestamp(_) => Ok(value.clone()),
                Value::Date(d) => Ok(Value::Timestamp(d.and_time(NaiveTime::MIN).and_utc())),
                Value::Integer(secs) => DateTime::from_timestamp(*secs, 0)
                    .map(Value::Timestamp)
                    .ok_or_else(|| self.mismatch(value)),
                Value::Float(secs) => DateTime::from_timestamp_millis((secs * 1000.0) as i64)
                    .map(Value::Timestamp)
                    .ok_or_else(|| self.mismatch(value)),
                Value::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                    .map(|ts| Value::Timestamp(ts.with_timezone(&Utc)))
                    .map_err(|_| self.mismatch(value)),
                _ => Err(self.mismatch(value)),
            },
            FieldKind::Date => match value {
                Value::Date(_) => Ok(value.clone()),
                Value::Timestamp(ts) => Ok(Value::Date(ts.date_naive())),
                Value::Text(s) => NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
                    .map(Value::Date)
                    .or_else(|_| {
                        DateTime::parse_from_rfc3339(s.trim()).map(|ts| Value::Date(ts.date_naive()))
                    })
                    .map_err(|_| self.mismatch(value)),
                _ => Err(self.mismatch(value)),
            },
            FieldKind::Bytes => match value {
                Value::Bytes(_) => Ok(value.clone()),
                Value::Text(s) => Ok(Value::Bytes(s.as_bytes().to_vec())),
                _ => Err(self.mismatch(value)),
            },
            FieldKind::Json => match value {
                Value::Json(_) => Ok(value.clone()),
                Value::Text(s) => Ok(Value::Json(
                    serde_json::from_str(s).unwrap_or_else(|_| serde_json::Value::String(s.clone())),
                )),
                other => Ok(Value::Json(other.to_json())),
            },
            FieldKind::AutoId
            | FieldKind::ForeignKey { .. }
            | FieldKind::CompositeId { .. }
            | FieldKind::ManyToMany { .. } => Ok(value.clone()),
        }
    }

    /// Coercion applied when a value is assigned to an instance.
    pub fn get_value(&self, value: Value) -> Result<Value> {
        self.to_python(&value)
    }

    /// Store representation of this field's current value on `instance`.
    /// Returns `Value::Null` when the value is missing.
    pub fn to_store(&self, instance: &Model, store: &dyn Store) -> Result<Value> {
        let value = match &self.kind {
            FieldKind::CompositeId { fields } => composite_value(fields, instance),
            _ => instance
                .get_raw(&self.store_name)
                .cloned()
                .unwrap_or(Value::Null),
        };

        self.store_value(&value, store)
    }

    /// Store representation of `value` for this field. Stores without
    /// structured values get JSON, timestamps, dates and lists as text.
    pub fn store_value(&self, value: &Value, store: &dyn Store) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        let value = self.to_python(value)?;
        Ok(if store.supports_structured() {
            value
        } else {
            flatten_structured(value)
        })
    }

    pub fn to_json(&self, value: &Value) -> serde_json::Value {
        match self.to_python(value) {
            Ok(converted) => converted.to_json(),
            Err(_) => value.to_json(),
        }
    }

    /// Value assigned to this field when an instance is built without one.
    pub(crate) fn initial_value(&self) -> Option<Value> {
        match (&self.default, &self.kind) {
            (Some(value), _) => Some(value.clone()),
            (None, FieldKind::AutoId) => Some(Value::Text(Uuid::new_v4().to_string())),
            _ => None,
        }
    }

    fn mismatch(&self, value: &Value) -> OdmError {
        OdmError::TypeMismatch(format!(
            "{} '{}' cannot hold {} value '{}'",
            self.kind.name(),
            self.name,
            value.type_name(),
            value
        ))
    }
}

/// `Value::List` of the component values, or `Value::Null` when any of them
/// is missing.
pub(crate) fn composite_value(fields: &[String], instance: &Model) -> Value {
    let meta = instance.meta();
    let mut parts = Vec::with_capacity(fields.len());
    for name in fields {
        let key = meta
            .field(name)
            .map(|field| field.get_store_name())
            .unwrap_or(name.as_str());
        match instance.get_raw(key) {
            Some(value) if !value.is_nothing() => parts.push(value.clone()),
            _ => return Value::Null,
        }
    }
    Value::List(parts)
}

fn flatten_structured(value: Value) -> Value {
    match value {
        Value::Json(json) => Value::Text(json.to_string()),
        Value::Timestamp(ts) => Value::Text(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        Value::Date(d) => Value::Text(d.format(DATE_FORMAT).to_string()),
        Value::List(items) => Value::Text(Value::List(items).to_json().to_string()),
        other => other,
    }
}
