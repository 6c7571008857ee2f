use std::sync::Arc;

use crate::{
    AttributeMapper, AttributeType, AttributeValue, CacheableRow, EntityDefinition,
    FromAttribute, Identity, Row, StorageError, Value,
};

/// Typed view over one [`CacheableRow`].
///
/// Cloning an entity copies its row and change tracking; the repository
/// works on such copies so a failed save never leaves the caller's value
/// half-updated.
#[derive(Debug, Clone)]
pub struct Entity {
    definition: Arc<EntityDefinition>,
    mapper: AttributeMapper,
    row: CacheableRow,
    is_new: bool,
}

impl Entity {
    /// Wrap a row as a persisted, unchanged entity.
    pub fn from_row(definition: Arc<EntityDefinition>, row: CacheableRow) -> Self {
        let mapper = AttributeMapper::new(definition.shared_schema());
        Self {
            definition,
            mapper,
            row,
            is_new: false,
        }
    }

    pub fn definition(&self) -> &EntityDefinition {
        &self.definition
    }

    pub fn table_name(&self) -> &str {
        self.definition.table_name()
    }

    pub fn row(&self) -> &CacheableRow {
        &self.row
    }

    pub(crate) fn row_mut(&mut self) -> &mut CacheableRow {
        &mut self.row
    }

    fn type_of(&self, name: &str) -> Result<AttributeType, StorageError> {
        self.definition.schema().type_of(name).ok_or_else(|| {
            StorageError::invalid(format!(
                "Unknown attribute '{}' - not in allowed attributes",
                name
            ))
        })
    }

    /// Decoded value of `name`. NULL decodes to [`AttributeValue::Null`].
    pub fn get(&self, name: &str) -> Result<AttributeValue, StorageError> {
        let ty = self.type_of(name)?;
        match self.mapper.get(&self.row, name)? {
            Some(raw) => ty.decode(&raw),
            None => Ok(AttributeValue::Null),
        }
    }

    /// Storage form of `name`.
    pub fn get_raw(&self, name: &str) -> Result<Option<String>, StorageError> {
        self.mapper.get(&self.row, name)
    }

    pub fn read<T: FromAttribute>(&self, name: &str) -> Result<T, StorageError> {
        T::from_attribute(self.get(name)?)
    }

    /// Like [`Entity::read`], but an attribute that is not set yields `None`.
    pub fn read_optional<T: FromAttribute>(&self, name: &str) -> Result<Option<T>, StorageError> {
        if !self.is_set(name) {
            return Ok(None);
        }
        Option::<T>::from_attribute(self.get(name)?)
    }

    /// Encode `value` with the declared type of `name` and store it.
    pub fn set(
        &mut self,
        name: &str,
        value: impl Into<AttributeValue>,
    ) -> Result<(), StorageError> {
        let ty = self.type_of(name)?;
        let value = value.into();
        let raw = if value.is_null() {
            None
        } else {
            Some(ty.encode(&value)?)
        };
        self.mapper.set(&mut self.row, name, raw)
    }

    pub fn set_raw(&mut self, name: &str, raw: Option<String>) -> Result<(), StorageError> {
        self.mapper.set(&mut self.row, name, raw)
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.mapper.is_set(&self.row, name)
    }

    pub fn unset(&mut self, name: &str) -> Result<(), StorageError> {
        self.mapper.unset(&mut self.row, name)
    }

    /// Values currently held, in schema order; what an INSERT writes.
    pub fn values(&self) -> Vec<(String, Option<String>)> {
        self.mapper.values(&self.row)
    }

    /// Values of changed attributes; what an UPDATE writes.
    pub fn changed_values(&self) -> Result<Row, StorageError> {
        self.mapper.changed_values(&self.row)
    }

    pub fn has_changed(&self) -> bool {
        self.mapper.has_changed()
    }

    pub fn changed_attributes(&self) -> impl Iterator<Item = &str> {
        self.mapper.changed_attributes()
    }

    pub fn reset_changed(&mut self) {
        self.mapper.reset_changed();
    }

    /// True until the entity has been saved with a known identity.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub(crate) fn set_new(&mut self, is_new: bool) {
        self.is_new = is_new;
    }

    /// Primary key values currently held in the row. Columns that are unset
    /// or NULL are left out.
    pub fn identity(&self) -> Identity {
        let mut identity = Identity::new();
        for column in self.definition.id_columns() {
            let Some(Some(raw)) = self.row.get(column) else {
                continue;
            };
            let value = self
                .definition
                .schema()
                .type_of(column)
                .and_then(|ty| Value::bind(ty, Some(raw)).ok())
                .unwrap_or_else(|| Value::String(raw.to_string()));
            identity.insert(column.clone(), value);
        }
        identity
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.table_name() == other.table_name()
            && self.row.values() == other.row.values()
            && self.is_new == other.is_new
    }
}

/// A Rust type stored as one entity kind.
///
/// Usually derived with `#[derive(EntityKind)]`.
pub trait EntityKind: Sized {
    /// Table, primary key and attribute schema of this kind.
    fn definition() -> Result<EntityDefinition, StorageError>;

    /// Read a typed value out of an entity.
    fn from_entity(entity: &Entity) -> Result<Self, StorageError>;

    /// Write every field into `entity`. `None` fields are left untouched.
    fn apply_to(&self, entity: &mut Entity) -> Result<(), StorageError>;
}
