//! Entity store facade: create, fetch, count, save and truncate entities.
//!
//! The store owns its storage handle. With [`SqliteDatabase`] every statement
//! runs under the database mutex, so an `Arc<EntityStore>` can be shared
//! between threads; a custom [`StorageClient`] carries that obligation itself.
//! Each operation is one synchronous round trip per statement, no
//! transaction is opened.

use crate::error::{Result, StorageError};
use crate::mapper;
use crate::query::{self, QuerySpec};
use crate::schema::{schema_of, Model, Schema};
use crate::sqlite::{Row, SqlQuery, SqliteDatabase, StorageClient, StoreConfig, Value};
use std::any::TypeId;
use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// A fresh, globally unique object identifier.
pub fn new_identifier() -> String {
    Uuid::new_v4().to_string()
}

/// One persisted instance of a model.
///
/// Changes to the model are only written by [`EntityStore::save_entity`].
#[derive(Debug, Clone, PartialEq)]
pub struct Entity<M> {
    object_id: String,
    delete_flag: bool,
    model: M,
}

impl<M: Model> Entity<M> {
    /// An entity with a new identifier and every field at its zero value.
    pub fn create(schema: &Schema<M>) -> Self {
        let mut model = M::default();
        for field in schema.fields() {
            field.reset(&mut model);
        }
        Self::from_parts(new_identifier(), model)
    }
}

impl<M> Entity<M> {
    pub(crate) fn from_parts(object_id: String, model: M) -> Self {
        Self {
            object_id,
            delete_flag: false,
            model,
        }
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    /// Whether the next save deletes this entity.
    pub fn delete_flag(&self) -> bool {
        self.delete_flag
    }

    pub fn set_delete_flag(&mut self, delete: bool) {
        self.delete_flag = delete;
    }

    /// Delete this entity on the next save.
    pub fn mark_for_deletion(&mut self) {
        self.delete_flag = true;
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }
}

impl<M> Deref for Entity<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.model
    }
}

impl<M> DerefMut for Entity<M> {
    fn deref_mut(&mut self) -> &mut M {
        &mut self.model
    }
}

/// Maps model types onto tables of one database.
pub struct EntityStore<S = SqliteDatabase> {
    client: S,
    config: StoreConfig,
    prepared: Mutex<HashSet<TypeId>>,
}

impl EntityStore<SqliteDatabase> {
    /// Open the database named by `config` and build a store over it.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let database = SqliteDatabase::open(&config)?;
        Ok(Self::with_config(database, config))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(StoreConfig::default())
    }
}

impl<S: StorageClient> EntityStore<S> {
    pub fn new(client: S) -> Self {
        Self::with_config(client, StoreConfig::default())
    }

    pub fn with_config(client: S, config: StoreConfig) -> Self {
        Self {
            client,
            config,
            prepared: Mutex::new(HashSet::new()),
        }
    }

    pub fn client(&self) -> &S {
        &self.client
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn prepared(&self) -> MutexGuard<'_, HashSet<TypeId>> {
        match self.prepared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("entity store mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Derive the schema of `M` and create or extend its table.
    ///
    /// Runs regardless of `create_tables`; idempotent.
    #[instrument(skip(self), fields(operation = "register", table = M::table_name()))]
    pub fn register<M: Model>(&self) -> Result<Arc<Schema<M>>> {
        let schema = schema_of::<M>()?;
        let mut prepared = self.prepared();
        self.prepare_table(&schema)?;
        prepared.insert(TypeId::of::<M>());
        Ok(schema)
    }

    fn ensure_table<M: Model>(&self, schema: &Schema<M>) -> Result<()> {
        if !self.config.create_tables {
            return Ok(());
        }
        let mut prepared = self.prepared();
        if prepared.contains(&TypeId::of::<M>()) {
            return Ok(());
        }
        self.prepare_table(schema)?;
        prepared.insert(TypeId::of::<M>());
        Ok(())
    }

    fn prepare_table<M: Model>(&self, schema: &Schema<M>) -> Result<()> {
        let table = schema.table_name();
        let definition = schema.table_definition();
        self.client.execute(&definition.create_statement())?;
        debug!(table, "table ready");

        if !self.config.add_missing_columns {
            return Ok(());
        }
        let existing: HashSet<String> = self
            .client
            .query(&query::table_info(table))?
            .iter()
            .filter_map(|row| match row.get("name") {
                Some(Value::Text(name)) => Some(name.to_ascii_lowercase()),
                _ => None,
            })
            .collect();
        // the primary key is created with the table and cannot be added later
        for column in definition.columns.iter().skip(1) {
            if existing.contains(&column.name.to_ascii_lowercase()) {
                continue;
            }
            info!(table, column = %column.name, "adding missing column");
            self.client.execute(&query::add_column(table, column))?;
        }
        Ok(())
    }

    /// A new, unsaved entity. Performs no I/O.
    pub fn create_entity<M: Model>(&self) -> Result<Entity<M>> {
        let schema = schema_of::<M>()?;
        Ok(Entity::create(&schema))
    }

    /// Write `entity` back: delete it when flagged, insert it when its
    /// identifier is not stored yet, update it otherwise.
    ///
    /// Deletes report whether a row was removed and inserts whether a row was
    /// added. Updates report `true` whenever the statement runs, even if no
    /// value changed.
    #[instrument(skip(self, entity), fields(operation = "save", table = M::table_name(), object_id = %entity.object_id()))]
    pub fn save_entity<M: Model>(&self, entity: &Entity<M>) -> Result<bool> {
        let schema = schema_of::<M>()?;
        self.ensure_table(&schema)?;
        let table = schema.table_name();

        if entity.delete_flag() {
            let affected = self.client.execute(&query::delete(table, entity.object_id()))?;
            debug!(affected, "deleted");
            return Ok(affected > 0);
        }

        let rows = self.client.query(&query::exists(table, entity.object_id()))?;
        let params = mapper::bind_values(&schema, entity);
        if count_from(&rows)? > 0 {
            self.client
                .execute(&query::update(table, &schema.descriptors(), params))?;
            debug!("updated");
            Ok(true)
        } else {
            let affected = self
                .client
                .execute(&query::insert(table, &schema.descriptors(), params))?;
            debug!(affected, "inserted");
            Ok(affected == 1)
        }
    }

    /// Entities matching `spec`, in the order it requests.
    #[instrument(skip(self), fields(operation = "fetch", table = M::table_name()))]
    pub fn fetch<M: Model>(&self, spec: &QuerySpec) -> Result<Vec<Entity<M>>> {
        let schema = schema_of::<M>()?;
        let statement = query::select_all(schema.table_name(), spec)?;
        self.ensure_table(&schema)?;
        let rows = self.client.query(&statement)?;
        let entities = materialize_all(&schema, &rows)?;
        debug!(count = entities.len(), "fetched");
        Ok(entities)
    }

    pub fn fetch_all<M: Model>(&self) -> Result<Vec<Entity<M>>> {
        self.fetch(&QuerySpec::new())
    }

    pub fn fetch_all_where<M: Model>(&self, filter: &str) -> Result<Vec<Entity<M>>> {
        self.fetch(&QuerySpec::new().filter(filter))
    }

    pub fn fetch_all_where_ordered<M: Model>(
        &self,
        filter: &str,
        order: &str,
    ) -> Result<Vec<Entity<M>>> {
        self.fetch(&QuerySpec::new().filter(filter).order_by(order))
    }

    /// Page `page_index` (from 0) of `page_size` entities.
    ///
    /// Without an order clause the database picks the row order, and pages
    /// may overlap or skip rows.
    pub fn fetch_all_where_paged<M: Model>(
        &self,
        filter: &str,
        order: &str,
        page_index: i64,
        page_size: i64,
    ) -> Result<Vec<Entity<M>>> {
        self.fetch(
            &QuerySpec::new()
                .filter(filter)
                .order_by(order)
                .paginate(page_index, page_size),
        )
    }

    /// The first entity matching `filter`, `None` when nothing matches.
    #[instrument(skip(self), fields(operation = "fetch_one", table = M::table_name()))]
    pub fn fetch_one_where<M: Model>(&self, filter: &str) -> Result<Option<Entity<M>>> {
        let schema = schema_of::<M>()?;
        let statement = query::select_one(schema.table_name(), &QuerySpec::new().filter(filter));
        self.fetch_first(&schema, &statement)
    }

    #[instrument(skip(self), fields(operation = "fetch_by_id", table = M::table_name()))]
    pub fn fetch_one_by_id<M: Model>(&self, object_id: &str) -> Result<Option<Entity<M>>> {
        let schema = schema_of::<M>()?;
        let statement = query::select_by_id(schema.table_name(), object_id);
        self.fetch_first(&schema, &statement)
    }

    fn fetch_first<M: Model>(
        &self,
        schema: &Schema<M>,
        statement: &SqlQuery,
    ) -> Result<Option<Entity<M>>> {
        self.ensure_table(schema)?;
        let rows = self.client.query(statement)?;
        match rows.first() {
            Some(row) => Ok(Some(mapper::materialize(schema, row)?)),
            None => Ok(None),
        }
    }

    pub fn count_all<M: Model>(&self) -> Result<u64> {
        self.count_all_where::<M>("")
    }

    #[instrument(skip(self), fields(operation = "count", table = M::table_name()))]
    pub fn count_all_where<M: Model>(&self, filter: &str) -> Result<u64> {
        let schema = schema_of::<M>()?;
        let statement = query::count(schema.table_name(), &QuerySpec::new().filter(filter));
        self.ensure_table(&schema)?;
        let rows = self.client.query(&statement)?;
        Ok(count_from(&rows)?)
    }

    /// Remove every row of `M`'s table. Irreversible.
    #[instrument(skip(self), fields(operation = "truncate", table = M::table_name()))]
    pub fn truncate_all<M: Model>(&self) -> Result<bool> {
        let schema = schema_of::<M>()?;
        self.ensure_table(&schema)?;
        let removed = self.client.execute(&query::truncate(schema.table_name()))?;
        info!(removed, "table truncated");
        Ok(true)
    }

    /// Drop `M`'s table. It is created again on next use.
    #[instrument(skip(self), fields(operation = "drop", table = M::table_name()))]
    pub fn drop_table<M: Model>(&self) -> Result<bool> {
        let schema = schema_of::<M>()?;
        let mut prepared = self.prepared();
        self.client.execute(&query::drop_table(schema.table_name()))?;
        prepared.remove(&TypeId::of::<M>());
        info!("table dropped");
        Ok(true)
    }
}

fn materialize_all<M: Model>(schema: &Schema<M>, rows: &[Row]) -> Result<Vec<Entity<M>>, StorageError> {
    rows.iter().map(|row| mapper::materialize(schema, row)).collect()
}

/// Read the single value of a `SELECT COUNT(*)` result.
fn count_from(rows: &[Row]) -> Result<u64, StorageError> {
    match rows.first().and_then(|row| row.values().next()) {
        Some(Value::Integer(n)) => {
            u64::try_from(*n).map_err(|e| StorageError::new("count", e))
        }
        other => Err(StorageError::new(
            "count",
            format!("expected an integer count, got {other:?}"),
        )),
    }
}
