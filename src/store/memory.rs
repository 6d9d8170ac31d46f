//! In-memory store and mapper.
//!
//! Tables live behind per-table async locks, rows are the `(store name,
//! value)` pairs produced by `store_data` and are keyed by the rendered
//! primary key. Loaded instances are bound back to the mapper that produced
//! them so they can be saved again.

use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock, Weak};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{Instrument, Level, event, info_span};

use crate::core::{OdmError, Result, Value};
use crate::mapper::{Manager, Mapper};
use crate::model::meta::ModelMeta;
use crate::model::{Model, ModelRegistry};
use crate::store::{Store, StoreAction};

pub type Row = Vec<(String, Value)>;

#[derive(Debug, Default)]
struct MemoryTable {
    rows: Vec<(String, Row)>,
}

impl MemoryTable {
    fn position(&self, key: &str) -> Option<usize> {
        self.rows.iter().position(|(existing, _)| existing == key)
    }
}

pub struct MemoryStore {
    name: String,
    structured: bool,
    tables: RwLock<HashMap<String, Arc<Mutex<MemoryTable>>>>,
}

impl MemoryStore {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            structured: true,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Store keeping every structured value as text.
    pub fn text_only(name: &str) -> Self {
        Self {
            structured: false,
            ..Self::new(name)
        }
    }

    /// Create `table` if missing. Returns `true` when it was created.
    pub async fn create_table(&self, table: &str) -> bool {
        let mut tables = self.tables.write().await;
        if tables.contains_key(table) {
            return false;
        }
        tables.insert(table.to_string(), Arc::new(Mutex::new(MemoryTable::default())));
        true
    }

    pub async fn table_exists(&self, table: &str) -> bool {
        self.tables.read().await.contains_key(table)
    }

    /// Table names, sorted.
    pub async fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn row_count(&self, table: &str) -> usize {
        match self.get_table(table).await {
            Some(handle) => handle.lock().await.rows.len(),
            None => 0,
        }
    }

    async fn get_table(&self, table: &str) -> Option<Arc<Mutex<MemoryTable>>> {
        self.tables.read().await.get(table).cloned()
    }

    async fn table_or_create(&self, table: &str) -> Arc<Mutex<MemoryTable>> {
        if let Some(handle) = self.get_table(table).await {
            return handle;
        }
        let mut tables = self.tables.write().await;
        Arc::clone(
            tables
                .entry(table.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(MemoryTable::default()))),
        )
    }

    async fn contains_row(&self, table: &str, key: &str) -> bool {
        match self.get_table(table).await {
            Some(handle) => handle.lock().await.position(key).is_some(),
            None => false,
        }
    }

    async fn upsert(&self, table: &str, key: String, row: Row) {
        let handle = self.table_or_create(table).await;
        let mut table = handle.lock().await;
        match table.position(&key) {
            Some(idx) => table.rows[idx].1 = row,
            None => table.rows.push((key, row)),
        }
    }

    async fn remove(&self, table: &str, key: &str) -> bool {
        let Some(handle) = self.get_table(table).await else {
            return false;
        };
        let mut table = handle.lock().await;
        match table.position(key) {
            Some(idx) => {
                table.rows.remove(idx);
                true
            }
            None => false,
        }
    }

    async fn row(&self, table: &str, key: &str) -> Option<Row> {
        let handle = self.get_table(table).await?;
        let table = handle.lock().await;
        table.position(key).map(|idx| table.rows[idx].1.clone())
    }

    async fn rows(&self, table: &str) -> Vec<Row> {
        match self.get_table(table).await {
            Some(handle) => handle
                .lock()
                .await
                .rows
                .iter()
                .map(|(_, row)| row.clone())
                .collect(),
            None => Vec::new(),
        }
    }
}

impl Store for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_structured(&self) -> bool {
        self.structured
    }
}

/// Per-model manager over a [`MemoryStore`].
pub struct MemoryManager {
    meta: Arc<ModelMeta>,
    store: Arc<MemoryStore>,
    mapper: Weak<MemoryMapper>,
}

impl MemoryManager {
    fn row_key(&self, instance: &Model) -> Result<String> {
        instance
            .pk()
            .filter(|pk| !pk.is_nothing())
            .map(|pk| pk.to_string())
            .ok_or_else(|| {
                OdmError::field(format!(
                    "Instance of '{}' has no primary key value",
                    self.meta.name()
                ))
            })
    }

    fn check_model(&self, instance: &Model) -> Result<()> {
        if instance.meta().name() != self.meta.name() {
            return Err(OdmError::StoreError(format!(
                "Manager of '{}' cannot handle instances of '{}'",
                self.meta.name(),
                instance.meta().name()
            )));
        }
        Ok(())
    }

    fn load(&self, row: Row) -> Result<Model> {
        let mut model = Model::from_store(Arc::clone(&self.meta), row)?;
        if let Some(mapper) = self.mapper.upgrade() {
            model.bind_mapper(mapper);
        }
        Ok(model)
    }
}

#[async_trait]
impl Manager for MemoryManager {
    fn meta(&self) -> &Arc<ModelMeta> {
        &self.meta
    }

    async fn save(&self, instance: &Model) -> Result<()> {
        self.check_model(instance)?;
        let key = self.row_key(instance)?;
        let table = self.meta.table_name();

        let action = if self.store.contains_row(table, &key).await {
            StoreAction::Update
        } else {
            StoreAction::Insert
        };
        let row = self
            .meta
            .store_data(instance, self.store.as_ref(), action)
            .collect::<Result<Row>>()?;

        self.store.upsert(table, key.clone(), row).await;
        event!(
            Level::DEBUG,
            model = self.meta.name(),
            pk = %key,
            action = %action,
            "instance saved"
        );
        Ok(())
    }

    async fn delete(&self, instance: &Model) -> Result<()> {
        self.check_model(instance)?;
        let key = self.row_key(instance)?;
        let removed = self.store.remove(self.meta.table_name(), &key).await;
        event!(
            Level::DEBUG,
            model = self.meta.name(),
            pk = %key,
            removed,
            "instance deleted"
        );
        Ok(())
    }

    async fn get(&self, pk: &Value) -> Result<Option<Model>> {
        let key = self.meta.pk_to_python(pk)?.to_string();
        match self.store.row(self.meta.table_name(), &key).await {
            Some(row) => self.load(row).map(Some),
            None => Ok(None),
        }
    }

    async fn filter(&self, field: &str, value: &Value) -> Result<Vec<Model>> {
        let key = self.meta.resolve_key(field);
        let value = match self.meta.field_by_store_name(&key) {
            Some(field) => field.store_value(value, self.store.as_ref())?,
            None => value.clone(),
        };

        self.store
            .rows(self.meta.table_name())
            .await
            .into_iter()
            .filter(|row| row.iter().any(|(k, v)| k == &key && v == &value))
            .map(|row| self.load(row))
            .collect()
    }

    async fn all(&self) -> Result<Vec<Model>> {
        self.store
            .rows(self.meta.table_name())
            .await
            .into_iter()
            .map(|row| self.load(row))
            .collect()
    }
}

/// [`Mapper`] handing out [`MemoryManager`]s for registered models.
pub struct MemoryMapper {
    store: Arc<MemoryStore>,
    managers: StdRwLock<Vec<Arc<MemoryManager>>>,
    this: Weak<MemoryMapper>,
}

impl MemoryMapper {
    pub fn new(store: MemoryStore) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            store: Arc::new(store),
            managers: StdRwLock::new(Vec::new()),
            this: this.clone(),
        })
    }

    /// Mapper with a manager for every concrete model of `registry`.
    pub fn with_registry(store: MemoryStore, registry: &ModelRegistry) -> Result<Arc<Self>> {
        let mapper = Self::new(store);
        mapper.register_all(registry)?;
        Ok(mapper)
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Add a manager for `meta`. Registering a model twice is a no-op.
    pub fn register(&self, meta: Arc<ModelMeta>) -> Result<()> {
        if meta.is_abstract() {
            return Err(OdmError::AbstractModel(meta.name().to_string()));
        }
        let mut managers = self.managers.write()?;
        if managers.iter().any(|m| m.meta.name() == meta.name()) {
            return Ok(());
        }
        managers.push(Arc::new(MemoryManager {
            meta,
            store: Arc::clone(&self.store),
            mapper: self.this.clone(),
        }));
        Ok(())
    }

    pub fn register_all(&self, registry: &ModelRegistry) -> Result<()> {
        for meta in registry.models().iter().filter(|m| !m.is_abstract()) {
            self.register(Arc::clone(meta))?;
        }
        Ok(())
    }

    /// Create one table per registered model, in registration order, and
    /// return their names. A dry run only reports them.
    pub async fn database_create(&self, dry_run: bool) -> Result<Vec<String>> {
        let span = info_span!("database_create", store = self.store.name(), dry_run);

        let tables: Vec<String> = self
            .managers
            .read()?
            .iter()
            .map(|manager| manager.meta.table_name().to_string())
            .collect();

        async {
            for table in &tables {
                let created = !dry_run && self.store.create_table(table).await;
                event!(Level::INFO, table = table.as_str(), created, "table");
            }
        }
        .instrument(span)
        .await;

        Ok(tables)
    }
}

impl Mapper for MemoryMapper {
    fn manager(&self, meta: &ModelMeta) -> Result<Arc<dyn Manager>> {
        let managers = self.managers.read()?;
        managers
            .iter()
            .find(|manager| manager.meta.name() == meta.name())
            .map(|manager| Arc::clone(manager) as Arc<dyn Manager>)
            .ok_or_else(|| OdmError::ManagerNotFound(meta.name().to_string()))
    }
}
