use std::collections::BTreeSet;
use std::sync::Arc;

use crate::{AttributeSchema, CacheableRow, Row, StorageError};

/// Enforces the attribute schema over a [`CacheableRow`] and records which
/// attributes changed since the last reset.
///
/// Values pass through in storage form. Only names are recorded as changed;
/// the current value is always read back from the row.
#[derive(Debug, Clone)]
pub struct AttributeMapper {
    schema: Arc<AttributeSchema>,
    changed: BTreeSet<String>,
}

impl AttributeMapper {
    pub fn new(schema: Arc<AttributeSchema>) -> Self {
        Self {
            schema,
            changed: BTreeSet::new(),
        }
    }

    pub fn schema(&self) -> &AttributeSchema {
        &self.schema
    }

    fn require_known(&self, name: &str) -> Result<(), StorageError> {
        if self.schema.contains(name) {
            Ok(())
        } else {
            Err(StorageError::invalid(format!(
                "Unknown attribute '{}' - not in allowed attributes",
                name
            )))
        }
    }

    /// Current value of `name`: the row's value, else the schema default.
    pub fn get(&self, row: &CacheableRow, name: &str) -> Result<Option<String>, StorageError> {
        self.require_known(name)?;

        if let Some(value) = row.get(name) {
            return Ok(value.map(str::to_string));
        }
        if let Some(default) = self.schema.default_of(name) {
            return Ok(Some(default.to_string()));
        }

        Err(StorageError::invalid(format!(
            "Tried to get attribute '{}' that hasn't been set",
            name
        )))
    }

    pub fn set(
        &mut self,
        row: &mut CacheableRow,
        name: &str,
        value: Option<String>,
    ) -> Result<(), StorageError> {
        self.require_known(name)?;

        let differs = match row.get(name) {
            Some(current) => current != value.as_deref(),
            None => true,
        };
        if differs {
            self.changed.insert(name.to_string());
        }

        row.insert(name, value);
        Ok(())
    }

    /// True when the row holds a value or the schema has a default.
    pub fn is_set(&self, row: &CacheableRow, name: &str) -> bool {
        row.contains(name) || self.schema.default_of(name).is_some()
    }

    /// Remove `name` from the row. Marked changed only when a value was held.
    pub fn unset(&mut self, row: &mut CacheableRow, name: &str) -> Result<(), StorageError> {
        self.require_known(name)?;

        if row.remove(name).is_some() {
            self.changed.insert(name.to_string());
        }
        Ok(())
    }

    /// Values of the changed attributes; unset ones map to NULL.
    pub fn changed_values(&self, row: &CacheableRow) -> Result<Row, StorageError> {
        let mut values = Row::new();
        for name in &self.changed {
            let value = if self.is_set(row, name) {
                self.get(row, name)?
            } else {
                None
            };
            values.insert(name.clone(), value);
        }
        Ok(values)
    }

    /// Values held in the row, in schema order. Defaults are not included.
    pub fn values(&self, row: &CacheableRow) -> Vec<(String, Option<String>)> {
        self.schema
            .names()
            .filter_map(|name| {
                row.get(name)
                    .map(|value| (name.to_string(), value.map(str::to_string)))
            })
            .collect()
    }

    pub fn has_changed(&self) -> bool {
        !self.changed.is_empty()
    }

    pub fn changed_attributes(&self) -> impl Iterator<Item = &str> {
        self.changed.iter().map(String::as_str)
    }

    pub fn reset_changed(&mut self) {
        self.changed.clear();
    }
}
