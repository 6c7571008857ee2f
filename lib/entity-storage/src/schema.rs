//! Per-entity-kind schema: allowed attributes, their declared types and defaults.

use std::collections::HashSet;
use std::sync::Arc;

use crate::{AttributeType, StorageError};

/// One declared attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDef {
    pub name: String,
    pub ty: AttributeType,
    /// Default value in storage form.
    pub default: Option<String>,
}

/// Ordered, immutable set of attribute declarations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeSchema {
    attributes: Vec<AttributeDef>,
}

impl AttributeSchema {
    /// Build a schema from declarations. Fails on duplicate names and on
    /// defaults that do not decode under their declared type.
    pub fn new(attributes: Vec<AttributeDef>) -> Result<Self, StorageError> {
        let mut seen = HashSet::new();
        for attribute in &attributes {
            if attribute.name.is_empty() {
                return Err(StorageError::invalid("Attribute name must not be empty"));
            }
            if !seen.insert(attribute.name.as_str()) {
                return Err(StorageError::invalid(format!(
                    "Attribute '{}' declared twice",
                    attribute.name
                )));
            }
            if let Some(default) = &attribute.default {
                attribute.ty.decode(default).map_err(|e| {
                    StorageError::invalid(format!(
                        "Default for '{}' is not a valid {}: {}",
                        attribute.name, attribute.ty, e
                    ))
                })?;
            }
        }

        Ok(Self { attributes })
    }

    pub fn get(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|attribute| attribute.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn type_of(&self, name: &str) -> Option<AttributeType> {
        self.get(name).map(|attribute| attribute.ty)
    }

    pub fn default_of(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|attribute| attribute.default.as_deref())
    }

    /// Declarations in definition order.
    pub fn iter(&self) -> impl Iterator<Item = &AttributeDef> {
        self.attributes.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|attribute| attribute.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// Everything the repository needs to know about one entity kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDefinition {
    table: String,
    id_columns: Vec<String>,
    schema: Arc<AttributeSchema>,
}

impl EntityDefinition {
    pub fn builder(table: impl Into<String>) -> EntityDefinitionBuilder {
        EntityDefinitionBuilder {
            table: table.into(),
            id_columns: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub fn new(
        table: impl Into<String>,
        id_columns: Vec<String>,
        schema: AttributeSchema,
    ) -> Result<Self, StorageError> {
        let table = table.into();
        if table.is_empty() {
            return Err(StorageError::invalid("Table name must not be empty"));
        }

        let mut seen = HashSet::new();
        for column in &id_columns {
            if !schema.contains(column) {
                return Err(StorageError::invalid(format!(
                    "Id column '{}' is not an attribute of '{}'",
                    column, table
                )));
            }
            if !seen.insert(column.as_str()) {
                return Err(StorageError::invalid(format!(
                    "Id column '{}' listed twice",
                    column
                )));
            }
        }

        Ok(Self {
            table,
            id_columns,
            schema: Arc::new(schema),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Primary key columns in key order.
    pub fn id_columns(&self) -> &[String] {
        &self.id_columns
    }

    pub fn is_id_column(&self, name: &str) -> bool {
        self.id_columns.iter().any(|column| column == name)
    }

    pub fn schema(&self) -> &AttributeSchema {
        &self.schema
    }

    pub fn shared_schema(&self) -> Arc<AttributeSchema> {
        Arc::clone(&self.schema)
    }
}

pub struct EntityDefinitionBuilder {
    table: String,
    id_columns: Vec<String>,
    attributes: Vec<AttributeDef>,
}

impl EntityDefinitionBuilder {
    /// Declare an attribute that is also part of the primary key.
    pub fn id(mut self, name: impl Into<String>, ty: AttributeType) -> Self {
        let name = name.into();
        self.id_columns.push(name.clone());
        self.attributes.push(AttributeDef {
            name,
            ty,
            default: None,
        });
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, ty: AttributeType) -> Self {
        self.attributes.push(AttributeDef {
            name: name.into(),
            ty,
            default: None,
        });
        self
    }

    /// Declare an attribute with a default in storage form.
    pub fn attribute_with_default(
        mut self,
        name: impl Into<String>,
        ty: AttributeType,
        default: impl Into<String>,
    ) -> Self {
        self.attributes.push(AttributeDef {
            name: name.into(),
            ty,
            default: Some(default.into()),
        });
        self
    }

    pub fn build(self) -> Result<EntityDefinition, StorageError> {
        let schema = AttributeSchema::new(self.attributes)?;
        EntityDefinition::new(self.table, self.id_columns, schema)
    }
}
