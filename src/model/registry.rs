use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{Level, event, info_span};

use crate::config::OdmConfig;
use crate::core::{OdmError, Result};
use crate::model::builder::{ModelDef, resolve_schema};
use crate::model::meta::ModelMeta;
use crate::model::relation::{RelatedManager, through_def};

type ClassPrepared = Box<dyn Fn(&Arc<ModelMeta>) + Send + Sync>;

/// Registry of finalized model schemas.
///
/// Owns every [`ModelMeta`] built through it, including synthesized junction
/// models, and dispatches class-prepared callbacks after each registration.
pub struct ModelRegistry {
    config: OdmConfig,
    models: Vec<Arc<ModelMeta>>,
    index: HashMap<String, usize>,
    junctions: HashMap<(String, String), Arc<ModelMeta>>,
    junction_owners: HashMap<String, (String, String)>,
    listeners: Vec<ClassPrepared>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::with_config(OdmConfig::default())
    }

    pub fn with_config(config: OdmConfig) -> Self {
        Self {
            config,
            models: Vec::new(),
            index: HashMap::new(),
            junctions: HashMap::new(),
            junction_owners: HashMap::new(),
            listeners: Vec::new(),
        }
    }

    pub fn config(&self) -> &OdmConfig {
        &self.config
    }

    /// Finalize `def` and register it.
    ///
    /// Junction models of many-to-many relations whose both sides are now
    /// registered are synthesized before returning. On error the registry is
    /// left as it was: neither the model nor any junction built for it is
    /// kept.
    pub fn register(&mut self, def: ModelDef) -> Result<Arc<ModelMeta>> {
        let span = info_span!("register_model", model = def.name());
        let _enter = span.enter();

        let meta = resolve_schema(def, &self.config)?;
        self.commit(|registry| {
            let meta = registry.add_model(meta)?;
            registry.resolve_pending()?;
            Ok(meta)
        })
    }

    pub fn get(&self, name: &str) -> Result<Arc<ModelMeta>> {
        self.index
            .get(name)
            .map(|&idx| Arc::clone(&self.models[idx]))
            .ok_or_else(|| OdmError::ModelNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Registered models in registration order, abstract ones included.
    pub fn models(&self) -> &[Arc<ModelMeta>] {
        &self.models
    }

    /// Synthesized and explicit junction models, keyed by declaring model
    /// and field.
    pub fn junctions(&self) -> impl Iterator<Item = (&(String, String), &Arc<ModelMeta>)> {
        self.junctions.iter()
    }

    /// Register a callback invoked with every model finalized afterwards.
    pub fn on_class_prepared<F>(&mut self, callback: F)
    where
        F: Fn(&Arc<ModelMeta>) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(callback));
    }

    /// Junction model of the many-to-many `field` declared on `model`.
    ///
    /// Synthesized on first call and cached; later calls return the same
    /// `Arc`.
    pub fn through_model(&mut self, model: &str, field: &str) -> Result<Arc<ModelMeta>> {
        self.commit(|registry| registry.junction(model, field))
    }

    fn junction(&mut self, model: &str, field: &str) -> Result<Arc<ModelMeta>> {
        let key = (model.to_string(), field.to_string());
        if let Some(junction) = self.junctions.get(&key) {
            return Ok(Arc::clone(junction));
        }

        let meta = self.get(model)?;
        if meta.is_abstract() {
            return Err(OdmError::AbstractModel(model.to_string()));
        }
        let relation = meta.many_to_many_field(field).ok_or_else(|| {
            OdmError::field(format!(
                "'{}' is not a many-to-many field of '{}'",
                field, model
            ))
        })?;
        let relmodel = match relation.related_model() {
            Some(target) => self.get(&self.config.model_name(target))?,
            None => return Err(OdmError::field(format!("'{}' has no target model", field))),
        };

        let junction = match relation.get_through() {
            Some(through) => self.get(&self.config.model_name(through))?,
            None => {
                let def = through_def(&meta, relation, &relmodel, &self.config);
                let name = self.config.model_name(def.name());
                if let Some((owner, owner_field)) = self.junction_owners.get(&name) {
                    return Err(OdmError::field(format!(
                        "Junction '{}' for '{}.{}' is already used by '{}.{}'",
                        name, model, field, owner, owner_field
                    )));
                }
                self.add_model(resolve_schema(def, &self.config)?)?
            }
        };

        self.junction_owners
            .insert(junction.name().to_string(), key.clone());
        self.junctions.insert(key, Arc::clone(&junction));
        Ok(junction)
    }

    /// Related manager named `name` on `model`.
    ///
    /// Covers the forward and reverse sides of many-to-many relations and
    /// the reverse side of foreign keys. A foreign key without a related name
    /// is reachable as `<declaring model><related_name_suffix>`.
    pub fn related_manager(&mut self, model: &str, name: &str) -> Result<RelatedManager> {
        self.commit(|registry| registry.find_related_manager(model, name))
    }

    fn find_related_manager(&mut self, model: &str, name: &str) -> Result<RelatedManager> {
        let meta = self.get(model)?;
        self.resolve_pending()?;

        if let Some(field) = meta.many_to_many_field(name) {
            let junction = self.junction(model, name)?;
            if field.get_through().is_some() {
                let target = match field.related_model() {
                    Some(target) => self.get(&self.config.model_name(target))?,
                    None => return Err(OdmError::field(format!("'{}' has no target model", name))),
                };
                return RelatedManager::explicit(junction, meta.name(), target);
            }
        }

        for candidate in self.models.iter().filter(|m| !m.is_abstract()) {
            for field in candidate.fields().iter().filter(|f| f.is_foreign_key()) {
                let target = field.related_model().map(|t| self.config.model_name(t));
                if target.as_deref() != Some(meta.name()) {
                    continue;
                }
                let related_name = match field.get_related_name() {
                    Some(related_name) => related_name.to_string(),
                    None => format!("{}{}", candidate.name(), self.config.related_name_suffix),
                };
                if related_name != name {
                    continue;
                }

                return match field.get_related_manager() {
                    Some(spec) => Ok(RelatedManager::many_to_many(
                        Arc::clone(candidate),
                        &spec.source_field,
                        self.get(&spec.model)?,
                        &spec.target_field,
                    )),
                    None => Ok(RelatedManager::reverse(Arc::clone(candidate), field.name())),
                };
            }
        }

        Err(OdmError::field(format!(
            "'{}' has no related manager named '{}'",
            model, name
        )))
    }

    fn add_model(&mut self, meta: ModelMeta) -> Result<Arc<ModelMeta>> {
        if self.index.contains_key(meta.name()) {
            return Err(OdmError::ModelExists(meta.name().to_string()));
        }

        let meta = Arc::new(meta);
        self.index.insert(meta.name().to_string(), self.models.len());
        self.models.push(Arc::clone(&meta));

        event!(
            Level::DEBUG,
            model = meta.name(),
            fields = meta.fields().len(),
            pk = meta.pkname(),
            is_abstract = meta.is_abstract(),
            "model schema finalized"
        );

        Ok(meta)
    }

    /// Run `op`, keeping the models it adds only when it succeeds.
    /// Class-prepared callbacks see kept models only.
    fn commit<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let start = self.models.len();
        match op(self) {
            Ok(value) => {
                self.dispatch_prepared(start);
                Ok(value)
            }
            Err(err) => {
                self.rollback(start);
                Err(err)
            }
        }
    }

    fn rollback(&mut self, start: usize) {
        for meta in self.models.drain(start..) {
            self.index.remove(meta.name());
            event!(Level::DEBUG, model = meta.name(), "registration rolled back");
        }

        let index = &self.index;
        self.junctions.retain(|(model, _), junction| {
            index.contains_key(model.as_str()) && index.contains_key(junction.name())
        });
        self.junction_owners.retain(|name, (model, _)| {
            index.contains_key(name.as_str()) && index.contains_key(model.as_str())
        });
    }

    fn dispatch_prepared(&self, start: usize) {
        if self.listeners.is_empty() {
            return;
        }
        for meta in &self.models[start..] {
            for listener in &self.listeners {
                listener(meta);
            }
            event!(
                Level::TRACE,
                model = meta.name(),
                listeners = self.listeners.len(),
                "class prepared dispatched"
            );
        }
    }

    /// Synthesize every junction whose two sides are registered.
    fn resolve_pending(&mut self) -> Result<()> {
        let pending: Vec<(String, String)> = self
            .models
            .iter()
            .filter(|meta| !meta.is_abstract())
            .flat_map(|meta| {
                meta.many_to_many()
                    .iter()
                    .filter(|field| {
                        field
                            .related_model()
                            .is_some_and(|target| self.contains(&self.config.model_name(target)))
                            && field
                                .get_through()
                                .is_none_or(|through| self.contains(&self.config.model_name(through)))
                    })
                    .map(|field| (meta.name().to_string(), field.name().to_string()))
            })
            .filter(|key| !self.junctions.contains_key(key))
            .collect();

        for (model, field) in pending {
            self.junction(&model, &field)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("config", &self.config)
            .field(
                "models",
                &self.models.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field("junctions", &self.junction_owners.keys().collect::<Vec<_>>())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::model::field::Field;

    #[test]
    fn test_duplicate_model_name() {
        let mut registry = ModelRegistry::new();
        registry.register(ModelDef::new("Person")).unwrap();
        let err = registry.register(ModelDef::new("person")).unwrap_err();
        assert!(matches!(err, OdmError::ModelExists(name) if name == "person"));
    }

    #[test]
    fn test_class_prepared_fires_for_junctions() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ModelRegistry::new();
        let sink = Arc::clone(&seen);
        registry.on_class_prepared(move |meta| {
            sink.lock().unwrap().push(meta.name().to_string());
        });

        registry.register(ModelDef::new("Tag")).unwrap();
        registry
            .register(ModelDef::new("Post").field("tags", Field::many_to_many("tag")))
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["tag", "post", "post_tag"]);
    }

    #[test]
    fn test_failed_registration_is_rolled_back() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ModelRegistry::new();
        let sink = Arc::clone(&seen);
        registry.on_class_prepared(move |meta| {
            sink.lock().unwrap().push(meta.name().to_string());
        });

        registry.register(ModelDef::new("Tag")).unwrap();
        let err = registry
            .register(
                ModelDef::new("Post")
                    .field("tags", Field::many_to_many("tag"))
                    .field("labels", Field::many_to_many("tag")),
            )
            .unwrap_err();
        assert!(err.is_field_error());
        assert!(!registry.contains("post"));
        assert!(!registry.contains("post_tag"));
        assert_eq!(registry.junctions().count(), 0);
        assert_eq!(registry.models().len(), 1);

        registry.register(ModelDef::new("Unrelated")).unwrap();
        registry
            .register(ModelDef::new("Post").field("tags", Field::many_to_many("tag")))
            .unwrap();
        assert!(registry.contains("post_tag"));
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["tag", "unrelated", "post", "post_tag"]
        );
    }

    #[test]
    fn test_unknown_model() {
        let registry = ModelRegistry::new();
        assert!(matches!(
            registry.get("ghost"),
            Err(OdmError::ModelNotFound(_))
        ));
    }

    #[test]
    fn test_through_model_requires_many_to_many_field() {
        let mut registry = ModelRegistry::new();
        registry
            .register(ModelDef::new("Person").field("name", Field::char()))
            .unwrap();
        let err = registry.through_model("person", "name").unwrap_err();
        assert!(err.is_field_error());
    }
}
