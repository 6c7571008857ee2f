use std::time::Duration;

use tracing::{debug, warn};

use crate::keystore::entity_cache_key;
use crate::{KeyStore, Row, StorageError, Value};

/// Ordered mapping of primary key column to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Identity {
    columns: Vec<(String, Value)>,
}

impl Identity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new().with(column, value)
    }

    /// Add or replace a column, keeping its original position on replace.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(name, _)| *name == column) {
            Some(entry) => entry.1 = value,
            None => self.columns.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// True when every listed column carries a non-null value and nothing else is present.
    pub fn is_complete_for(&self, id_columns: &[String]) -> bool {
        !id_columns.is_empty()
            && self.columns.len() == id_columns.len()
            && id_columns
                .iter()
                .all(|column| self.get(column).is_some_and(|value| !value.is_null()))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Identity {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut identity = Identity::new();
        for (column, value) in iter {
            identity.insert(column, value);
        }
        identity
    }
}

/// Column values of one entity in storage form, plus the identity that keys
/// them in the cache.
///
/// A column missing from the row is unset; a column mapped to `None` holds
/// SQL NULL.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheableRow {
    table: String,
    id: Identity,
    ttl: Duration,
    values: Row,
}

impl CacheableRow {
    pub fn new(table: impl Into<String>, id: Identity, ttl: Duration) -> Self {
        Self {
            table: table.into(),
            id,
            ttl,
            values: Row::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id(&self) -> &Identity {
        &self.id
    }

    pub fn set_id(&mut self, id: Identity) {
        self.id = id;
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn values(&self) -> &Row {
        &self.values
    }

    /// Replace every held value.
    pub fn set_row(&mut self, values: Row) {
        self.values = values;
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    /// `None` when unset, `Some(None)` when NULL.
    pub fn get(&self, column: &str) -> Option<Option<&str>> {
        self.values.get(column).map(|value| value.as_deref())
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Option<String>) {
        self.values.insert(column.into(), value);
    }

    pub fn remove(&mut self, column: &str) -> Option<Option<String>> {
        self.values.remove(column)
    }

    /// Cache key for this row; `None` while the identity is unknown.
    pub fn cache_key(&self) -> Option<String> {
        if self.id.is_empty() {
            None
        } else {
            Some(entity_cache_key(&self.table, &self.id))
        }
    }

    /// Populate the row from the cache. Returns whether a cached copy was found.
    ///
    /// An undecodable payload is treated as a miss.
    pub async fn load<K: KeyStore + ?Sized>(&mut self, cache: &K) -> Result<bool, StorageError> {
        let Some(key) = self.cache_key() else {
            return Ok(false);
        };

        let Some(payload) = cache.get(&key).await? else {
            debug!(key = %key, "entity cache miss");
            return Ok(false);
        };

        match serde_json::from_str::<Row>(&payload) {
            Ok(values) => {
                debug!(key = %key, "entity cache hit");
                self.values = values;
                Ok(true)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "discarding undecodable entity cache entry");
                Ok(false)
            }
        }
    }

    /// Write the row into the cache under its identity.
    pub async fn save<K: KeyStore + ?Sized>(&self, cache: &K) -> Result<(), StorageError> {
        let Some(key) = self.cache_key() else {
            return Ok(());
        };

        let payload = serde_json::to_string(&self.values)
            .map_err(|e| StorageError::invalid(format!("Failed to encode row: {}", e)))?;
        cache.set(&key, &payload, self.ttl).await?;
        debug!(key = %key, "entity cached");
        Ok(())
    }

    /// Drop any cached copy of this row.
    pub async fn delete<K: KeyStore + ?Sized>(&self, cache: &K) -> Result<(), StorageError> {
        let Some(key) = self.cache_key() else {
            return Ok(());
        };

        cache.delete(&key).await?;
        debug!(key = %key, "entity cache invalidated");
        Ok(())
    }
}
