//! Helper utilities for integration tests

#![allow(dead_code)]

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;

use async_trait::async_trait;
use entity_storage::{
    AttributeType, Delete, EntityDefinition, EntityRepository, Filter, Insert, InsertOutcome,
    KeyStore, KeyStoreStats, MemoryKeyStore, Order, QueryExecutor, Row, Select, StorageError,
    TransactionExecutor, Update, Value,
};

/// A statement seen by [`FakeDb`].
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Select),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    FoundRows,
    Begin,
    Commit,
    Rollback,
}

/// In-memory relational store.
///
/// Rows are kept in storage form. Columns listed with [`FakeDb::with_default`]
/// are filled in on insert when omitted, and an auto-increment column is
/// assigned when missing or NULL.
#[derive(Default)]
pub struct FakeDb {
    tables: HashMap<String, Vec<Row>>,
    auto_increment: HashMap<String, (String, u64)>,
    defaults: HashMap<String, Row>,
    snapshot: Option<HashMap<String, Vec<Row>>>,
    found_rows: u64,
    statements: Vec<Statement>,
    fail_next: Option<String>,
}

impl FakeDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_increment(mut self, table: &str, column: &str) -> Self {
        self.auto_increment
            .insert(table.to_string(), (column.to_string(), 1));
        self
    }

    pub fn with_default(mut self, table: &str, column: &str, value: &str) -> Self {
        self.defaults
            .entry(table.to_string())
            .or_default()
            .insert(column.to_string(), Some(value.to_string()));
        self
    }

    /// Insert a row directly, bypassing the statement log.
    pub fn seed(&mut self, table: &str, values: &[(&str, Option<&str>)]) {
        let row: Row = values
            .iter()
            .map(|(column, value)| (column.to_string(), value.map(str::to_string)))
            .collect();
        self.tables.entry(table.to_string()).or_default().push(row);
    }

    /// Make the next statement fail with a storage error.
    pub fn fail_next(&mut self, message: &str) {
        self.fail_next = Some(message.to_string());
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.get(table).cloned().unwrap_or_default()
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn clear_statements(&mut self) {
        self.statements.clear();
    }

    pub fn reads(&self) -> usize {
        self.statements
            .iter()
            .filter(|s| matches!(s, Statement::Select(_)))
            .count()
    }

    pub fn inserts(&self) -> Vec<&Insert> {
        self.statements
            .iter()
            .filter_map(|s| match s {
                Statement::Insert(insert) => Some(insert),
                _ => None,
            })
            .collect()
    }

    pub fn updates(&self) -> Vec<&Update> {
        self.statements
            .iter()
            .filter_map(|s| match s {
                Statement::Update(update) => Some(update),
                _ => None,
            })
            .collect()
    }

    pub fn deletes(&self) -> Vec<&Delete> {
        self.statements
            .iter()
            .filter_map(|s| match s {
                Statement::Delete(delete) => Some(delete),
                _ => None,
            })
            .collect()
    }

    /// Number of INSERT, UPDATE and DELETE statements seen.
    pub fn writes(&self) -> usize {
        self.inserts().len() + self.updates().len() + self.deletes().len()
    }

    fn record(&mut self, statement: Statement) -> Result<(), StorageError> {
        self.statements.push(statement);
        match self.fail_next.take() {
            Some(message) => Err(StorageError::storage(message)),
            None => Ok(()),
        }
    }
}

fn compare(left: &str, right: &str) -> Ordering {
    match (left.parse::<f64>(), right.parse::<f64>()) {
        (Ok(l), Ok(r)) => l.partial_cmp(&r).unwrap_or(Ordering::Equal),
        _ => left.cmp(right),
    }
}

fn matches(row: &Row, filter: &Filter) -> bool {
    let current = row.get(filter.field()).cloned().flatten();
    let ordering = |value: &Value| match (&current, value.to_raw()) {
        (Some(current), Some(wanted)) => Some(compare(current, &wanted)),
        _ => None,
    };

    match filter {
        Filter::Eq(_, value) => ordering(value) == Some(Ordering::Equal),
        Filter::Ne(_, value) => ordering(value).is_some_and(|o| o != Ordering::Equal),
        Filter::Gt(_, value) => ordering(value) == Some(Ordering::Greater),
        Filter::Gte(_, value) => ordering(value).is_some_and(|o| o != Ordering::Less),
        Filter::Lt(_, value) => ordering(value) == Some(Ordering::Less),
        Filter::Lte(_, value) => ordering(value).is_some_and(|o| o != Ordering::Greater),
        Filter::IsNull(_) => current.is_none(),
        Filter::IsNotNull(_) => current.is_some(),
    }
}

fn matches_all(row: &Row, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| matches(row, filter))
}

#[async_trait]
impl QueryExecutor for FakeDb {
    async fn fetch(&mut self, select: &Select) -> Result<Vec<Row>, StorageError> {
        self.record(Statement::Select(select.clone()))?;

        let mut rows: Vec<Row> = self
            .rows(&select.table)
            .into_iter()
            .filter(|row| matches_all(row, &select.filters))
            .collect();

        for (field, order) in select.order_by.iter().rev() {
            rows.sort_by(|a, b| {
                let a = a.get(field).cloned().flatten().unwrap_or_default();
                let b = b.get(field).cloned().flatten().unwrap_or_default();
                match order {
                    Order::Asc => compare(&a, &b),
                    Order::Desc => compare(&b, &a),
                }
            });
        }

        if select.count_rows {
            self.found_rows = rows.len() as u64;
        }

        let offset = select.offset.unwrap_or(0) as usize;
        let limit = select.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn insert(&mut self, insert: &Insert) -> Result<InsertOutcome, StorageError> {
        self.record(Statement::Insert(insert.clone()))?;

        let mut row = self.defaults.get(&insert.table).cloned().unwrap_or_default();
        for (column, value) in &insert.values {
            row.insert(column.clone(), value.to_raw());
        }

        let mut last_insert_id = None;
        if let Some((column, next)) = self.auto_increment.get_mut(&insert.table) {
            match row.get(column.as_str()).cloned().flatten() {
                Some(given) => {
                    if let Ok(given) = given.parse::<u64>() {
                        *next = (*next).max(given + 1);
                    }
                }
                None => {
                    row.insert(column.clone(), Some(next.to_string()));
                    last_insert_id = Some(*next);
                    *next += 1;
                }
            }
        }

        self.tables.entry(insert.table.clone()).or_default().push(row);
        Ok(InsertOutcome {
            rows_affected: 1,
            last_insert_id,
        })
    }

    async fn update(&mut self, update: &Update) -> Result<u64, StorageError> {
        self.record(Statement::Update(update.clone()))?;

        let limit = update.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let mut affected = 0;
        if let Some(rows) = self.tables.get_mut(&update.table) {
            for row in rows
                .iter_mut()
                .filter(|row| matches_all(row, &update.filters))
                .take(limit)
            {
                for (column, value) in &update.values {
                    row.insert(column.clone(), value.to_raw());
                }
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn delete(&mut self, delete: &Delete) -> Result<u64, StorageError> {
        self.record(Statement::Delete(delete.clone()))?;

        let limit = delete.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let Some(rows) = self.tables.get_mut(&delete.table) else {
            return Ok(0);
        };

        let mut removed = 0;
        rows.retain(|row| {
            if removed < limit && matches_all(row, &delete.filters) {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed as u64)
    }

    async fn found_rows(&mut self) -> Result<u64, StorageError> {
        self.record(Statement::FoundRows)?;
        Ok(self.found_rows)
    }
}

#[async_trait]
impl TransactionExecutor for FakeDb {
    async fn begin_transaction(&mut self) -> Result<(), StorageError> {
        self.record(Statement::Begin)?;
        self.snapshot = Some(self.tables.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StorageError> {
        self.record(Statement::Commit)?;
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StorageError> {
        self.record(Statement::Rollback)?;
        if let Some(tables) = self.snapshot.take() {
            self.tables = tables;
        }
        Ok(())
    }
}

/// Key store that counts calls on top of [`MemoryKeyStore`].
#[derive(Default)]
pub struct CountingKeyStore {
    inner: MemoryKeyStore,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl CountingKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gets(&self) -> usize {
        self.gets.load(AtomicOrdering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(AtomicOrdering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(AtomicOrdering::SeqCst)
    }

    pub fn reset(&self) {
        self.gets.store(0, AtomicOrdering::SeqCst);
        self.sets.store(0, AtomicOrdering::SeqCst);
        self.deletes.store(0, AtomicOrdering::SeqCst);
    }
}

#[async_trait]
impl KeyStore for CountingKeyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.gets.fetch_add(1, AtomicOrdering::SeqCst);
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StorageError> {
        self.sets.fetch_add(1, AtomicOrdering::SeqCst);
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.deletes.fetch_add(1, AtomicOrdering::SeqCst);
        self.inner.delete(key).await
    }

    async fn increment(
        &self,
        key: &str,
        delta: i64,
        initial: i64,
        ttl: Duration,
    ) -> Result<i64, StorageError> {
        self.inner.increment(key, delta, initial, ttl).await
    }

    async fn touch(&self, key: &str, ttl: Duration) -> Result<bool, StorageError> {
        self.inner.touch(key, ttl).await
    }

    fn stats(&self) -> KeyStoreStats {
        self.inner.stats()
    }
}

/// Key store whose every call fails with [`StorageError::Cache`] once
/// [`FailingKeyStore::go_down`] is called. Until then it behaves like
/// [`MemoryKeyStore`].
#[derive(Default)]
pub struct FailingKeyStore {
    inner: MemoryKeyStore,
    down: AtomicBool,
}

impl FailingKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn go_down(&self) {
        self.down.store(true, AtomicOrdering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.down.load(AtomicOrdering::SeqCst) {
            Err(StorageError::cache("cache unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyStore for FailingKeyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StorageError> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn increment(
        &self,
        key: &str,
        delta: i64,
        initial: i64,
        ttl: Duration,
    ) -> Result<i64, StorageError> {
        self.check()?;
        self.inner.increment(key, delta, initial, ttl).await
    }

    async fn touch(&self, key: &str, ttl: Duration) -> Result<bool, StorageError> {
        self.check()?;
        self.inner.touch(key, ttl).await
    }

    fn stats(&self) -> KeyStoreStats {
        self.inner.stats()
    }
}

/// `widgets`: auto-increment `id`, a name, an epoch timestamp and a flag
/// with a default.
pub fn widgets() -> EntityDefinition {
    EntityDefinition::builder("widgets")
        .id("id", AttributeType::Int)
        .attribute("name", AttributeType::String)
        .attribute("created", AttributeType::Epoch)
        .attribute_with_default("enabled", AttributeType::Bool, "1")
        .build()
        .unwrap()
}

/// `memberships`: composite key of two ints.
pub fn memberships() -> EntityDefinition {
    EntityDefinition::builder("memberships")
        .id("group_id", AttributeType::Int)
        .id("user_id", AttributeType::Int)
        .attribute("role", AttributeType::String)
        .build()
        .unwrap()
}

/// `events`: no primary key at all.
pub fn events() -> EntityDefinition {
    EntityDefinition::builder("events")
        .attribute("message", AttributeType::String)
        .build()
        .unwrap()
}

pub type TestRepository = EntityRepository<FakeDb, CountingKeyStore>;

pub fn widget_repository() -> (TestRepository, Arc<CountingKeyStore>) {
    let cache = Arc::new(CountingKeyStore::new());
    let db = FakeDb::new()
        .with_auto_increment("widgets", "id")
        .with_default("widgets", "enabled", "1");
    (EntityRepository::new(widgets(), db, Arc::clone(&cache)), cache)
}

pub fn membership_repository() -> (TestRepository, Arc<CountingKeyStore>) {
    let cache = Arc::new(CountingKeyStore::new());
    (
        EntityRepository::new(memberships(), FakeDb::new(), Arc::clone(&cache)),
        cache,
    )
}

pub fn failing_widget_repository() -> (
    EntityRepository<FakeDb, FailingKeyStore>,
    Arc<FailingKeyStore>,
) {
    let cache = Arc::new(FailingKeyStore::new());
    let db = FakeDb::new()
        .with_auto_increment("widgets", "id")
        .with_default("widgets", "enabled", "1");
    (EntityRepository::new(widgets(), db, Arc::clone(&cache)), cache)
}
