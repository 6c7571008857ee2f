//! MySQL implementation of QueryExecutor and TransactionExecutor.

use async_trait::async_trait;
use entity_storage::{
    ConnectionConfig, Delete, Filter, Insert, InsertOutcome, Order, QueryExecutor,
    RepositoryConnection, Row, Select, StorageError, TransactionExecutor, Update, Value,
};
use sqlx::mysql::{MySqlArguments, MySqlConnection, MySqlPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::{Arguments, MySql, Transaction};
use tracing::debug;

use crate::row::{column_to_string, row_to_map};

const DEFAULT_MAX_CONNECTIONS: u32 = 16;

/// Largest row count MySQL accepts, for an OFFSET without a LIMIT.
const UNBOUNDED_LIMIT: u64 = u64::MAX;

/// Quote an identifier with backticks.
fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Build a WHERE clause from filters.
fn build_where_clause(filters: &[Filter]) -> String {
    if filters.is_empty() {
        return String::new();
    }

    let clauses: Vec<String> = filters
        .iter()
        .map(|filter| {
            let field = quote_ident(filter.field());
            match filter {
                Filter::Eq(_, _) => format!("{} = ?", field),
                Filter::Ne(_, _) => format!("{} != ?", field),
                Filter::Gt(_, _) => format!("{} > ?", field),
                Filter::Gte(_, _) => format!("{} >= ?", field),
                Filter::Lt(_, _) => format!("{} < ?", field),
                Filter::Lte(_, _) => format!("{} <= ?", field),
                Filter::IsNull(_) => format!("{} IS NULL", field),
                Filter::IsNotNull(_) => format!("{} IS NOT NULL", field),
            }
        })
        .collect();

    format!(" WHERE {}", clauses.join(" AND "))
}

/// Bind filter values to MySqlArguments.
fn bind_filters(args: &mut MySqlArguments, filters: &[Filter]) -> Result<(), StorageError> {
    for value in filters.iter().filter_map(Filter::value) {
        bind_value(args, value)?;
    }
    Ok(())
}

/// Bind a Value to MySqlArguments.
fn bind_value(args: &mut MySqlArguments, value: &Value) -> Result<(), StorageError> {
    match value {
        Value::String(s) => args.add(s.as_str()),
        Value::Int(n) => args.add(*n),
        Value::UInt(n) => args.add(*n),
        Value::Float(n) => args.add(*n),
        Value::Bool(b) => args.add(*b),
        Value::Null => args.add(None::<String>),
    }
    .map_err(StorageError::storage)
}

/// Build ORDER BY clause.
fn build_order_clause(order_by: &[(String, Order)]) -> String {
    if order_by.is_empty() {
        return String::new();
    }

    let clauses: Vec<String> = order_by
        .iter()
        .map(|(field, order)| {
            let dir = match order {
                Order::Asc => "ASC",
                Order::Desc => "DESC",
            };
            format!("{} {}", quote_ident(field), dir)
        })
        .collect();

    format!(" ORDER BY {}", clauses.join(", "))
}

fn build_limit_clause(limit: Option<u64>, offset: Option<u64>) -> String {
    match (limit, offset) {
        (Some(limit), Some(offset)) => format!(" LIMIT {} OFFSET {}", limit, offset),
        (Some(limit), None) => format!(" LIMIT {}", limit),
        (None, Some(offset)) => format!(" LIMIT {} OFFSET {}", UNBOUNDED_LIMIT, offset),
        (None, None) => String::new(),
    }
}

pub(crate) fn select_sql(select: &Select) -> String {
    let modifier = if select.count_rows {
        "SQL_CALC_FOUND_ROWS "
    } else {
        ""
    };

    format!(
        "SELECT {}* FROM {}{}{}{}",
        modifier,
        quote_ident(&select.table),
        build_where_clause(&select.filters),
        build_order_clause(&select.order_by),
        build_limit_clause(select.limit, select.offset)
    )
}

pub(crate) fn insert_sql(insert: &Insert) -> String {
    let columns: Vec<String> = insert.values.iter().map(|(c, _)| quote_ident(c)).collect();
    let placeholders = vec!["?"; columns.len()];

    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(&insert.table),
        columns.join(", "),
        placeholders.join(", ")
    )
}

pub(crate) fn update_sql(update: &Update) -> String {
    let assignments: Vec<String> = update
        .values
        .iter()
        .map(|(column, _)| format!("{} = ?", quote_ident(column)))
        .collect();

    format!(
        "UPDATE {} SET {}{}{}",
        quote_ident(&update.table),
        assignments.join(", "),
        build_where_clause(&update.filters),
        build_limit_clause(update.limit, None)
    )
}

pub(crate) fn delete_sql(delete: &Delete) -> String {
    format!(
        "DELETE FROM {}{}{}",
        quote_ident(&delete.table),
        build_where_clause(&delete.filters),
        build_limit_clause(delete.limit, None)
    )
}

/// Connection currently held by a session.
enum SessionConnection {
    Pooled(PoolConnection<MySql>),
    Transaction(Transaction<'static, MySql>),
}

impl SessionConnection {
    fn connection(&mut self) -> &mut MySqlConnection {
        match self {
            SessionConnection::Pooled(conn) => &mut **conn,
            SessionConnection::Transaction(tx) => &mut **tx,
        }
    }
}

/// One logical MySQL session over a pool.
///
/// A connection is checked out on first use and held for the life of the
/// session, so `SELECT FOUND_ROWS()` and transactions see the statements
/// that preceded them.
pub struct MySqlSession {
    pool: sqlx::MySqlPool,
    conn: Option<SessionConnection>,
}

impl MySqlSession {
    /// Create a new session from an sqlx MySqlPool.
    pub fn new(pool: sqlx::MySqlPool) -> Self {
        Self { pool, conn: None }
    }

    /// Connect to a MySQL database.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(url)
            .await
            .map_err(StorageError::storage)?;
        Ok(Self::new(pool))
    }

    /// Get the inner sqlx::MySqlPool.
    pub fn pool(&self) -> &sqlx::MySqlPool {
        &self.pool
    }

    pub fn in_transaction(&self) -> bool {
        matches!(self.conn, Some(SessionConnection::Transaction(_)))
    }

    async fn connection(&mut self) -> Result<&mut MySqlConnection, StorageError> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => SessionConnection::Pooled(
                self.pool.acquire().await.map_err(StorageError::storage)?,
            ),
        };
        Ok(self.conn.insert(conn).connection())
    }

    fn take_transaction(&mut self) -> Result<Transaction<'static, MySql>, StorageError> {
        match self.conn.take() {
            Some(SessionConnection::Transaction(tx)) => Ok(tx),
            other => {
                self.conn = other;
                Err(StorageError::invalid("No transaction in progress"))
            }
        }
    }
}

#[async_trait]
impl RepositoryConnection for MySqlSession {
    async fn connect(config: impl Into<ConnectionConfig> + Send) -> Result<Self, StorageError> {
        match config.into() {
            ConnectionConfig::Url(url) => MySqlSession::connect(&url).await,
        }
    }
}

#[async_trait]
impl QueryExecutor for MySqlSession {
    async fn fetch(&mut self, select: &Select) -> Result<Vec<Row>, StorageError> {
        let sql = select_sql(select);
        let mut args = MySqlArguments::default();
        bind_filters(&mut args, &select.filters)?;

        debug!(sql = %sql, "fetch");
        let conn = self.connection().await?;
        let rows = sqlx::query_with(&sql, args)
            .fetch_all(conn)
            .await
            .map_err(StorageError::storage)?;

        rows.iter().map(row_to_map).collect()
    }

    async fn insert(&mut self, insert: &Insert) -> Result<InsertOutcome, StorageError> {
        let sql = insert_sql(insert);
        let mut args = MySqlArguments::default();
        for (_, value) in &insert.values {
            bind_value(&mut args, value)?;
        }

        debug!(sql = %sql, "insert");
        let conn = self.connection().await?;
        let result = sqlx::query_with(&sql, args)
            .execute(conn)
            .await
            .map_err(StorageError::storage)?;

        let last_insert_id = result.last_insert_id();
        Ok(InsertOutcome {
            rows_affected: result.rows_affected(),
            last_insert_id: (last_insert_id > 0).then_some(last_insert_id),
        })
    }

    async fn update(&mut self, update: &Update) -> Result<u64, StorageError> {
        let sql = update_sql(update);
        let mut args = MySqlArguments::default();
        for (_, value) in &update.values {
            bind_value(&mut args, value)?;
        }
        bind_filters(&mut args, &update.filters)?;

        debug!(sql = %sql, "update");
        let conn = self.connection().await?;
        let result = sqlx::query_with(&sql, args)
            .execute(conn)
            .await
            .map_err(StorageError::storage)?;

        Ok(result.rows_affected())
    }

    async fn delete(&mut self, delete: &Delete) -> Result<u64, StorageError> {
        let sql = delete_sql(delete);
        let mut args = MySqlArguments::default();
        bind_filters(&mut args, &delete.filters)?;

        debug!(sql = %sql, "delete");
        let conn = self.connection().await?;
        let result = sqlx::query_with(&sql, args)
            .execute(conn)
            .await
            .map_err(StorageError::storage)?;

        Ok(result.rows_affected())
    }

    async fn found_rows(&mut self) -> Result<u64, StorageError> {
        let conn = self.connection().await?;
        let row = sqlx::query("SELECT FOUND_ROWS()")
            .fetch_one(conn)
            .await
            .map_err(StorageError::storage)?;

        let raw = column_to_string(&row, 0)?.unwrap_or_default();
        raw.parse()
            .map_err(|e| StorageError::decode(format!("Invalid FOUND_ROWS() '{}': {}", raw, e)))
    }
}

#[async_trait]
impl TransactionExecutor for MySqlSession {
    async fn begin_transaction(&mut self) -> Result<(), StorageError> {
        if self.in_transaction() {
            return Err(StorageError::invalid("Transaction already in progress"));
        }

        // The plain connection goes back to the pool
        self.conn = None;
        let tx = self.pool.begin().await.map_err(StorageError::storage)?;
        self.conn = Some(SessionConnection::Transaction(tx));
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StorageError> {
        self.take_transaction()?
            .commit()
            .await
            .map_err(StorageError::storage)
    }

    async fn rollback(&mut self) -> Result<(), StorageError> {
        self.take_transaction()?
            .rollback()
            .await
            .map_err(StorageError::storage)
    }
}
