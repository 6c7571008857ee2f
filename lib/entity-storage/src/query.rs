//! Database-agnostic statement model for entity storage.
//!
//! Statements carry the table, the typed bind values and the filters; a
//! backend translates them to its own dialect.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::{AttributeType, BindKind, StorageError};

/// A fetched row in storage form. `None` is SQL NULL.
pub type Row = BTreeMap<String, Option<String>>;

/// A value that can be bound to a query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Null,
}

impl Value {
    /// Bind a raw storage value using the category of its declared type.
    pub fn bind(ty: AttributeType, raw: Option<&str>) -> Result<Self, StorageError> {
        let Some(raw) = raw else {
            return Ok(Value::Null);
        };

        match ty.bind_kind() {
            BindKind::Int => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    Ok(Value::Int(0))
                } else if let Ok(n) = trimmed.parse::<i64>() {
                    Ok(Value::Int(n))
                } else if let Ok(n) = trimmed.parse::<u64>() {
                    Ok(Value::UInt(n))
                } else {
                    Err(StorageError::decode(format!(
                        "Cannot bind '{}' as an integer",
                        raw
                    )))
                }
            }
            BindKind::Bool => Ok(Value::Bool(!(raw.is_empty() || raw == "0"))),
            BindKind::Str => Ok(Value::String(raw.to_string())),
        }
    }

    /// Storage form of the value; `None` for NULL.
    pub fn to_raw(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Int(n) => Some(n.to_string()),
            Value::UInt(n) => Some(n.to_string()),
            Value::Float(n) => Some(n.to_string()),
            Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            Value::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::UInt(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::UInt(n.into())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Filter conditions for queries.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// field = value
    Eq(String, Value),
    /// field != value
    Ne(String, Value),
    /// field > value
    Gt(String, Value),
    /// field >= value
    Gte(String, Value),
    /// field < value
    Lt(String, Value),
    /// field <= value
    Lte(String, Value),
    /// field IS NULL
    IsNull(String),
    /// field IS NOT NULL
    IsNotNull(String),
}

impl Filter {
    pub fn field(&self) -> &str {
        match self {
            Filter::Eq(field, _)
            | Filter::Ne(field, _)
            | Filter::Gt(field, _)
            | Filter::Gte(field, _)
            | Filter::Lt(field, _)
            | Filter::Lte(field, _)
            | Filter::IsNull(field)
            | Filter::IsNotNull(field) => field,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Filter::Eq(_, value)
            | Filter::Ne(_, value)
            | Filter::Gt(_, value)
            | Filter::Gte(_, value)
            | Filter::Lt(_, value)
            | Filter::Lte(_, value) => Some(value),
            Filter::IsNull(_) | Filter::IsNotNull(_) => None,
        }
    }
}

/// Sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// A SELECT over a single table.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    /// The table to query.
    pub table: String,
    /// Filter conditions, joined with AND.
    pub filters: Vec<Filter>,
    /// Order by clauses.
    pub order_by: Vec<(String, Order)>,
    /// Maximum number of results.
    pub limit: Option<u64>,
    /// Offset for pagination.
    pub offset: Option<u64>,
    /// Issue the row-counting variant so the total can be read afterwards
    /// with [`QueryExecutor::found_rows`].
    pub count_rows: bool,
}

impl Select {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            count_rows: false,
        }
    }

    /// Add a filter condition.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add an equality filter (shorthand for Filter::Eq).
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(field.into(), value.into()))
    }

    /// Add an order-by clause.
    pub fn order_by(mut self, field: impl Into<String>, order: Order) -> Self {
        self.order_by.push((field.into(), order));
        self
    }

    /// Set the maximum number of results.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the offset for pagination.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn count_rows(mut self) -> Self {
        self.count_rows = true;
        self
    }
}

/// An INSERT of explicit columns. Columns not listed keep their table default.
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    pub values: Vec<(String, Value)>,
}

impl Insert {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: Vec::new(),
        }
    }

    pub fn value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((column.into(), value.into()));
        self
    }

    pub fn columns(&self) -> Vec<&str> {
        self.values.iter().map(|(column, _)| column.as_str()).collect()
    }
}

/// Result of an INSERT.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub rows_affected: u64,
    /// Identifier generated by the store for an auto-increment column, if any.
    pub last_insert_id: Option<u64>,
}

/// An UPDATE of explicit columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    pub values: Vec<(String, Value)>,
    pub filters: Vec<Filter>,
    pub limit: Option<u64>,
}

impl Update {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: Vec::new(),
            filters: Vec::new(),
            limit: None,
        }
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((column.into(), value.into()));
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(field.into(), value.into()))
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn columns(&self) -> Vec<&str> {
        self.values.iter().map(|(column, _)| column.as_str()).collect()
    }
}

/// A DELETE query builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    /// The table to delete from.
    pub table: String,
    /// Filter conditions.
    pub filters: Vec<Filter>,
    pub limit: Option<u64>,
}

impl Delete {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            limit: None,
        }
    }

    /// Add a filter condition.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add an equality filter (shorthand).
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(field.into(), value.into()))
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Trait for executing statements against a database backend.
///
/// One executor is one logical session: consecutive calls observe each
/// other, which [`QueryExecutor::found_rows`] relies on.
#[async_trait]
pub trait QueryExecutor: Send {
    /// Execute a SELECT and return all rows.
    async fn fetch(&mut self, select: &Select) -> Result<Vec<Row>, StorageError>;

    /// Execute a SELECT and return at most one row.
    async fn fetch_optional(&mut self, select: &Select) -> Result<Option<Row>, StorageError> {
        let mut select = select.clone();
        select.limit = Some(1);

        let rows = self.fetch(&select).await?;
        Ok(rows.into_iter().next())
    }

    /// Execute an INSERT.
    async fn insert(&mut self, insert: &Insert) -> Result<InsertOutcome, StorageError>;

    /// Execute an UPDATE and return the number of rows affected.
    async fn update(&mut self, update: &Update) -> Result<u64, StorageError>;

    /// Execute a DELETE and return the number of rows affected.
    async fn delete(&mut self, delete: &Delete) -> Result<u64, StorageError>;

    /// Total row count of the immediately preceding row-counting SELECT.
    async fn found_rows(&mut self) -> Result<u64, StorageError>;
}

/// Trait for bracketing statements in a transaction on the same session.
#[async_trait]
pub trait TransactionExecutor: Send {
    /// Begin a transaction. Statements until commit/rollback run inside it.
    async fn begin_transaction(&mut self) -> Result<(), StorageError>;

    /// Commit the transaction.
    async fn commit(&mut self) -> Result<(), StorageError>;

    /// Rollback the transaction.
    async fn rollback(&mut self) -> Result<(), StorageError>;
}
