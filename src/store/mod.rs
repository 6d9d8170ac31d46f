pub mod memory;

pub use memory::{MemoryManager, MemoryMapper, MemoryStore};

use std::collections::HashSet;
use std::fmt;

use tracing::{Level, Span, event, span};

use crate::core::{OdmError, Result, Value};
use crate::model::field::{Field, is_private_field};
use crate::model::meta::ModelMeta;
use crate::model::Model;

/// Backend receiving serialized instances.
pub trait Store: Send + Sync {
    fn name(&self) -> &str;

    /// Whether JSON, timestamps, dates and composite keys can be kept as
    /// structured values. Stores returning `false` receive them as text.
    fn supports_structured(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreAction {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for StoreAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Lazy `(store name, value)` pairs of one instance.
///
/// Declared fields come first in field order, then the remaining instance
/// keys in insertion order. A delete only carries the primary key. The first
/// error ends the sequence.
pub struct StoreData<'a> {
    meta: &'a ModelMeta,
    instance: &'a Model,
    store: &'a dyn Store,
    action: StoreAction,
    fields: std::slice::Iter<'a, Field>,
    extra: std::slice::Iter<'a, (String, Value)>,
    declared: HashSet<&'a str>,
    done: bool,
    span: Span,
}

impl<'a> StoreData<'a> {
    pub(crate) fn new(
        meta: &'a ModelMeta,
        instance: &'a Model,
        store: &'a dyn Store,
        action: StoreAction,
    ) -> Self {
        let span = span!(
            Level::TRACE,
            "store_data",
            model = meta.name(),
            store = store.name(),
            action = %action
        );
        let declared = meta.fields().iter().map(Field::get_store_name).collect();

        Self {
            meta,
            instance,
            store,
            action,
            fields: meta.fields().iter(),
            extra: instance.entries().iter(),
            declared,
            done: false,
            span,
        }
    }

    pub fn action(&self) -> StoreAction {
        self.action
    }

    fn next_field(&mut self) -> Option<Result<(String, Value)>> {
        for field in self.fields.by_ref() {
            if self.action == StoreAction::Delete && !field.is_primary_key() {
                continue;
            }

            let value = match field.to_store(self.instance, self.store) {
                Ok(value) => value,
                Err(err) => return Some(Err(err)),
            };

            if value.is_nothing() && field.is_required() && !field.is_auto_id() {
                return Some(Err(OdmError::field(format!(
                    "Field '{}' is required for '{}'.",
                    field.name(),
                    self.meta
                ))));
            }

            if !value.is_null() {
                return Some(Ok((field.get_store_name().to_string(), value)));
            }
        }
        None
    }

    fn next_extra(&mut self) -> Option<Result<(String, Value)>> {
        if self.action == StoreAction::Delete {
            return None;
        }

        for (key, value) in self.extra.by_ref() {
            if self.declared.contains(key.as_str()) {
                continue;
            }

            let value = match self.meta.converter(key) {
                Some(converter) => match converter(value) {
                    Ok(value) => value,
                    Err(err) => return Some(Err(err)),
                },
                None if is_private_field(key) => continue,
                None => value.clone(),
            };

            if !value.is_null() {
                return Some(Ok((key.clone(), value)));
            }
        }
        None
    }
}

impl Iterator for StoreData<'_> {
    type Item = Result<(String, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let span = self.span.clone();
        let _enter = span.enter();

        let item = match self.next_field() {
            Some(item) => Some(item),
            None => self.next_extra(),
        };

        match &item {
            Some(Err(err)) => {
                event!(Level::DEBUG, error = %err, "store serialization failed");
                self.done = true;
            }
            None => self.done = true,
            Some(Ok(_)) => {}
        }
        item
    }
}
