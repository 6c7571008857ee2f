//! Cache-aside repository for one entity kind.
//!
//! - `EntityRepository`: CRUD by primary key over a `QueryExecutor`, with a
//!   `KeyStore` side-cache keyed by table and identity
//! - `RepositoryConfig`: cache TTL
//! - `RepositoryConnection`: backend connection setup

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    AttributeValue, CacheableRow, Delete, Entity, EntityDefinition, EntityKind, Filter, Identity,
    Insert, KeyStore, QueryExecutor, Row, Select, StorageError, TransactionExecutor, Update,
    Value,
};

/// Default lifetime of a cached entity.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Connection configuration for database backends.
#[derive(Debug, Clone)]
pub enum ConnectionConfig {
    /// Connect using a database URL string.
    Url(String),
}

impl From<&str> for ConnectionConfig {
    fn from(url: &str) -> Self {
        ConnectionConfig::Url(url.to_string())
    }
}

impl From<String> for ConnectionConfig {
    fn from(url: String) -> Self {
        ConnectionConfig::Url(url)
    }
}

impl From<&String> for ConnectionConfig {
    fn from(url: &String) -> Self {
        ConnectionConfig::Url(url.clone())
    }
}

/// Trait for opening a database session.
#[async_trait]
pub trait RepositoryConnection: Sized + Send {
    /// Connect to the database using the provided configuration.
    async fn connect(config: impl Into<ConnectionConfig> + Send) -> Result<Self, StorageError>;
}

/// Repository settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryConfig {
    /// Lifetime of cached rows. Zero keeps them until invalidated.
    pub cache_ttl: Duration,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

impl RepositoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }
}

/// Cache-aside persistence for one entity kind.
///
/// Reads go to the cache first and fall back to the store, writing the
/// authoritative row back on a miss. Writes go to the store, drop the cached
/// copy and reload. Inside a transaction cache reads are skipped so rows
/// written by the transaction are always seen.
///
/// One repository serves one sequence of operations; it is not shared
/// between concurrent requests.
pub struct EntityRepository<D, K: ?Sized> {
    db: D,
    cache: Arc<K>,
    definition: Arc<EntityDefinition>,
    config: RepositoryConfig,
    in_transaction: bool,
}

impl<D, K> EntityRepository<D, K>
where
    D: QueryExecutor + TransactionExecutor,
    K: KeyStore + ?Sized,
{
    pub fn new(definition: EntityDefinition, db: D, cache: Arc<K>) -> Self {
        Self::with_config(definition, db, cache, RepositoryConfig::default())
    }

    pub fn with_config(
        definition: EntityDefinition,
        db: D,
        cache: Arc<K>,
        config: RepositoryConfig,
    ) -> Self {
        Self {
            db,
            cache,
            definition: Arc::new(definition),
            config,
            in_transaction: false,
        }
    }

    /// Repository for a typed entity kind.
    pub fn for_kind<T: EntityKind>(db: D, cache: Arc<K>) -> Result<Self, StorageError> {
        Ok(Self::new(T::definition()?, db, cache))
    }

    pub fn definition(&self) -> &EntityDefinition {
        &self.definition
    }

    pub fn table_name(&self) -> &str {
        self.definition.table_name()
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub fn db(&self) -> &D {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut D {
        &mut self.db
    }

    pub fn cache(&self) -> &K {
        &self.cache
    }

    pub fn into_db(self) -> D {
        self.db
    }

    /// Bind a raw value for `column` using its declared type.
    fn bind(&self, column: &str, raw: Option<&str>) -> Result<Value, StorageError> {
        let ty = self.definition.schema().type_of(column).ok_or_else(|| {
            StorageError::invalid(format!(
                "Unknown column '{}' for '{}'",
                column,
                self.definition.table_name()
            ))
        })?;
        Value::bind(ty, raw)
    }

    /// Reorder `id` into key order with typed values. `None` unless it names
    /// exactly the id columns, each with a non-null value.
    fn normalize_identity(&self, id: &Identity) -> Option<Identity> {
        let id_columns = self.definition.id_columns();
        if !id.is_complete_for(id_columns) {
            return None;
        }

        let mut normalized = Identity::new();
        for column in id_columns {
            let raw = id.get(column)?.to_raw();
            let value = self.bind(column, raw.as_deref()).ok()?;
            normalized.insert(column.clone(), value);
        }
        Some(normalized)
    }

    fn id_filters(id: &Identity) -> Vec<Filter> {
        id.iter()
            .map(|(column, value)| Filter::Eq(column.to_string(), value.clone()))
            .collect()
    }

    /// Identity a persisted entity was loaded under, else the one it holds.
    fn identity_of(&self, entity: &Entity) -> Option<Identity> {
        if entity.row().id().is_empty() {
            self.normalize_identity(&entity.identity())
        } else {
            self.normalize_identity(entity.row().id())
        }
    }

    fn new_row(&self, id: Identity) -> CacheableRow {
        CacheableRow::new(self.definition.table_name(), id, self.config.cache_ttl)
    }

    /// Keep only declared columns of a fetched row.
    fn schema_row(&self, row: Row) -> Row {
        row.into_iter()
            .filter(|(column, _)| self.definition.schema().contains(column))
            .collect()
    }

    async fn invalidate(&self, id: &Identity) -> Result<(), StorageError> {
        self.new_row(id.clone()).delete(&*self.cache).await
    }

    /// Entity with primary key `id`, or `None` when the id is empty, does not
    /// match the key columns, or no row exists.
    pub async fn get_by_id(&mut self, id: &Identity) -> Result<Option<Entity>, StorageError> {
        let Some(id) = self.normalize_identity(id) else {
            debug!(table = %self.definition.table_name(), "ignoring lookup with invalid identity");
            return Ok(None);
        };

        let mut row = if self.in_transaction {
            debug!(table = %self.definition.table_name(), "bypassing entity cache inside transaction");
            self.new_row(id.clone())
        } else {
            self.cache
                .entity_cache(self.definition.table_name(), &id, self.config.cache_ttl)
                .await?
        };

        // Every stored row has at least one column, so an empty row is a miss
        if row.values().is_empty() {
            let select = Select {
                filters: Self::id_filters(&id),
                ..Select::new(self.definition.table_name())
            };

            let Some(found) = self.db.fetch_optional(&select).await? else {
                return Ok(None);
            };

            row.set_row(self.schema_row(found));
            row.save(&*self.cache).await?;
        }

        Ok(Some(Entity::from_row(Arc::clone(&self.definition), row)))
    }

    /// Look up each id in order. Misses stay in place as `None`.
    pub async fn get_entities_from_ids(
        &mut self,
        ids: &[Identity],
    ) -> Result<Vec<Option<Entity>>, StorageError> {
        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            entities.push(self.get_by_id(id).await?);
        }
        Ok(entities)
    }

    /// Build a new, unsaved entity from field values. The fields do not
    /// count as changes.
    pub fn create_entity<I, N, V>(&self, fields: I) -> Result<Entity, StorageError>
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: Into<AttributeValue>,
    {
        let mut entity = Entity::from_row(
            Arc::clone(&self.definition),
            self.new_row(Identity::new()),
        );
        for (name, value) in fields {
            entity.set(name.as_ref(), value)?;
        }

        entity.reset_changed();
        entity.set_new(true);
        Ok(entity)
    }

    /// Build a new, unsaved entity from a typed value.
    pub fn create_from<T: EntityKind>(&self, item: &T) -> Result<Entity, StorageError> {
        let mut entity = self.create_entity(std::iter::empty::<(&str, AttributeValue)>())?;
        item.apply_to(&mut entity)?;
        entity.reset_changed();
        Ok(entity)
    }

    /// Persist `entity` and return the stored state.
    ///
    /// New entities are inserted with the values they hold; persisted ones
    /// are updated with their changed values only. Either way the cached copy
    /// is dropped and the entity is reloaded from the store, so defaults and
    /// triggers applied by the store are reflected. A new entity without id
    /// columns cannot be reloaded and is returned as constructed.
    pub async fn save(&mut self, entity: &Entity) -> Result<Entity, StorageError> {
        let entity = entity.clone();
        if entity.is_new() {
            self.insert_new(entity).await
        } else {
            self.update_existing(entity).await
        }
    }

    async fn insert_new(&mut self, mut entity: Entity) -> Result<Entity, StorageError> {
        let definition = Arc::clone(&self.definition);
        let id_columns = definition.id_columns();

        // A composite key cannot be recovered after the insert
        if id_columns.len() > 1 && !entity.identity().is_complete_for(id_columns) {
            return Err(StorageError::invalid(
                "Unable to save entity - primary key not set",
            ));
        }

        let mut insert = Insert::new(definition.table_name());
        for (column, raw) in entity.values() {
            let value = self.bind(&column, raw.as_deref())?;
            insert = insert.value(column, value);
        }

        debug!(table = %definition.table_name(), columns = ?insert.columns(), "inserting entity");
        let outcome = self.db.insert(&insert).await?;

        let identity = match id_columns {
            [] => Identity::new(),
            [column] => match outcome.last_insert_id.filter(|id| *id > 0) {
                Some(generated) => {
                    let value = i64::try_from(generated)
                        .map(Value::Int)
                        .unwrap_or(Value::UInt(generated));
                    Identity::single(column.clone(), value)
                }
                None => self.normalize_identity(&entity.identity()).ok_or_else(|| {
                    StorageError::invalid("Unable to save entity - failed to retrieve id after save")
                })?,
            },
            _ => self
                .normalize_identity(&entity.identity())
                .ok_or_else(|| StorageError::invalid("Unable to save entity - primary key not set"))?,
        };

        entity.row_mut().set_id(identity.clone());
        entity.row().delete(&*self.cache).await?;

        if identity.is_empty() {
            return Ok(entity);
        }

        self.reload(&identity).await
    }

    async fn update_existing(&mut self, entity: Entity) -> Result<Entity, StorageError> {
        if !entity.has_changed() {
            return Ok(entity);
        }

        let definition = Arc::clone(&self.definition);
        let id = self
            .identity_of(&entity)
            .ok_or_else(|| StorageError::invalid("Unable to save entity - primary key not set"))?;

        let changed = entity.changed_values()?;
        if changed.is_empty() {
            return Err(StorageError::invalid(
                "Unable to save entity - nothing was changed, but marked as changed",
            ));
        }

        // Changing the key would overwrite a different row
        for column in definition.id_columns() {
            if changed.contains_key(column) {
                return Err(StorageError::invalid(
                    "Unable to save entity - primary key was changed",
                ));
            }
            if !id.contains(column) {
                return Err(StorageError::invalid(
                    "Unable to save entity - primary key not set",
                ));
            }
        }

        let mut update = Update::new(definition.table_name()).limit(1);
        for (column, raw) in &changed {
            let value = self.bind(column, raw.as_deref())?;
            update = update.set(column.clone(), value);
        }
        for filter in Self::id_filters(&id) {
            update = update.filter(filter);
        }

        debug!(table = %definition.table_name(), columns = ?update.columns(), "updating entity");
        self.db.update(&update).await?;

        self.invalidate(&id).await?;
        self.reload(&id).await
    }

    async fn reload(&mut self, id: &Identity) -> Result<Entity, StorageError> {
        self.get_by_id(id).await?.ok_or_else(|| {
            StorageError::NotFound(format!(
                "{} row vanished after save",
                self.definition.table_name()
            ))
        })
    }

    /// Delete the row of `entity` and return the entity as it was.
    pub async fn delete(&mut self, entity: &Entity) -> Result<Entity, StorageError> {
        let entity = entity.clone();
        let id = self
            .identity_of(&entity)
            .ok_or_else(|| StorageError::invalid("Unable to delete entity - primary key not set"))?;

        let mut delete = Delete::new(self.definition.table_name()).limit(1);
        for filter in Self::id_filters(&id) {
            delete = delete.filter(filter);
        }

        debug!(table = %self.definition.table_name(), "deleting entity");
        self.db.delete(&delete).await?;

        self.invalidate(&id).await?;
        Ok(entity)
    }

    /// Delete by primary key. Fails with `InvalidArgument` when no such
    /// entity exists; nothing is deleted in that case.
    pub async fn delete_by_id(&mut self, id: &Identity) -> Result<Entity, StorageError> {
        let entity = self.get_by_id(id).await?.ok_or_else(|| {
            StorageError::invalid("Unable to delete entity - no entity with that primary key")
        })?;
        self.delete(&entity).await
    }

    /// Start a transaction. Cache reads are bypassed until commit or rollback.
    pub async fn begin_transaction(&mut self) -> Result<(), StorageError> {
        if self.in_transaction {
            return Err(StorageError::invalid("Transaction already in progress"));
        }

        self.in_transaction = true;
        if let Err(e) = self.db.begin_transaction().await {
            self.in_transaction = false;
            return Err(e);
        }
        Ok(())
    }

    pub async fn commit(&mut self) -> Result<(), StorageError> {
        if !self.in_transaction {
            return Err(StorageError::invalid("No transaction in progress"));
        }

        self.in_transaction = false;
        self.db.commit().await
    }

    pub async fn rollback(&mut self) -> Result<(), StorageError> {
        if !self.in_transaction {
            return Err(StorageError::invalid("No transaction in progress"));
        }

        self.in_transaction = false;
        self.db.rollback().await
    }

    /// Total row count of the immediately preceding row-counting SELECT
    /// (see [`Select::count_rows`]).
    pub async fn get_found_rows(&mut self) -> Result<u64, StorageError> {
        self.db.found_rows().await
    }

    /// A SELECT on this repository's table, for use with [`EntityRepository::find`].
    pub fn select(&self) -> Select {
        Select::new(self.definition.table_name())
    }

    /// Run a filtered SELECT on this repository's table.
    ///
    /// Reads the store directly; the cache is neither read nor written.
    pub async fn find(&mut self, select: Select) -> Result<Vec<Entity>, StorageError> {
        if select.table != self.definition.table_name() {
            return Err(StorageError::invalid(format!(
                "Select on '{}' issued through the '{}' repository",
                select.table,
                self.definition.table_name()
            )));
        }

        let mut bound = Select {
            filters: Vec::with_capacity(select.filters.len()),
            ..select.clone()
        };
        for filter in select.filters {
            bound.filters.push(self.bind_filter(filter)?);
        }
        for (column, _) in &bound.order_by {
            if !self.definition.schema().contains(column) {
                return Err(StorageError::invalid(format!(
                    "Cannot order by unknown column '{}'",
                    column
                )));
            }
        }

        let rows = self.db.fetch(&bound).await?;
        Ok(rows
            .into_iter()
            .map(|found| {
                let mut row = self.new_row(Identity::new());
                row.set_row(self.schema_row(found));
                let mut entity = Entity::from_row(Arc::clone(&self.definition), row);
                let id = self.normalize_identity(&entity.identity()).unwrap_or_default();
                entity.row_mut().set_id(id);
                entity
            })
            .collect())
    }

    /// Re-bind a filter value with the declared type of its column.
    fn bind_filter(&self, filter: Filter) -> Result<Filter, StorageError> {
        let rebind = |field: &str, value: &Value| self.bind(field, value.to_raw().as_deref());
        Ok(match filter {
            Filter::Eq(field, value) => {
                let value = rebind(&field, &value)?;
                Filter::Eq(field, value)
            }
            Filter::Ne(field, value) => {
                let value = rebind(&field, &value)?;
                Filter::Ne(field, value)
            }
            Filter::Gt(field, value) => {
                let value = rebind(&field, &value)?;
                Filter::Gt(field, value)
            }
            Filter::Gte(field, value) => {
                let value = rebind(&field, &value)?;
                Filter::Gte(field, value)
            }
            Filter::Lt(field, value) => {
                let value = rebind(&field, &value)?;
                Filter::Lt(field, value)
            }
            Filter::Lte(field, value) => {
                let value = rebind(&field, &value)?;
                Filter::Lte(field, value)
            }
            Filter::IsNull(field) => {
                self.bind(&field, None)?;
                Filter::IsNull(field)
            }
            Filter::IsNotNull(field) => {
                self.bind(&field, None)?;
                Filter::IsNotNull(field)
            }
        })
    }
}
