//! MySQL implementation for entity-storage.
//!
//! [`MySqlSession`] runs the statements built by an
//! [`EntityRepository`](entity_storage::EntityRepository) on one checked-out
//! connection, with backtick-quoted identifiers and `?` placeholders.
//!
//! # Usage
//!
//! ```text
//! use entity_storage::{EntityKind, EntityRepository, MemoryKeyStore, StorageDatetime};
//! use entity_storage_mysql::MySqlSession;
//!
//! #[derive(EntityKind)]
//! #[entity(table = "widgets")]
//! pub struct Widget {
//!     #[id]
//!     pub id: Option<i64>,
//!     pub name: String,
//!     #[attribute(kind = "epoch")]
//!     pub created: StorageDatetime,
//! }
//!
//! let session = MySqlSession::connect("mysql://localhost/app").await?;
//! let mut widgets = EntityRepository::for_kind::<Widget>(session, Arc::new(MemoryKeyStore::new()))?;
//! ```

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod executor;
mod row;

pub use executor::MySqlSession;

// Re-export core types for convenience
pub use entity_storage::{
    ConnectionConfig, EntityRepository, QueryExecutor, RepositoryConnection, StorageError,
    TransactionExecutor,
};
