//! Entity Storage - cache-aside persistence for typed records.
//!
//! Each entity kind is one table with a declared attribute schema and a
//! primary key. Rows are read through a key/value cache and written straight
//! to the relational store, with the cached copy invalidated on every write.
//!
//! # Core Concepts
//!
//! - **Storage form**: every attribute travels as a string (or NULL) between
//!   the store, the cache and the entity; [`AttributeType`] converts between
//!   that form and typed [`AttributeValue`]s.
//! - **Identity**: the ordered primary key values of an entity, which also
//!   derive its cache key.
//! - **Change tracking**: an [`Entity`] remembers which attributes were set
//!   since it was loaded, so updates write only those columns.
//!
//! # Traits
//!
//! - [`QueryExecutor`] / [`TransactionExecutor`]: the relational store
//! - [`KeyStore`]: the cache
//! - [`EntityKind`]: typed records, usually derived

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod codec;
mod entity;
mod error;
mod keystore;
mod mapper;
mod query;
mod repository;
mod row;
mod schema;
mod time;

pub use codec::{AttributeType, AttributeValue, BindKind, FromAttribute, TypeCodec};
pub use entity::{Entity, EntityKind};
pub use error::{BoxError, StorageError};
pub use keystore::{KeyStore, KeyStoreStats, MemoryKeyStore, entity_cache_key};
pub use mapper::AttributeMapper;
pub use query::{
    Delete, Filter, Insert, InsertOutcome, Order, QueryExecutor, Row, Select,
    TransactionExecutor, Update, Value,
};
pub use repository::{
    ConnectionConfig, DEFAULT_CACHE_TTL, EntityRepository, RepositoryConfig,
    RepositoryConnection,
};
pub use row::{CacheableRow, Identity};
pub use schema::{AttributeDef, AttributeSchema, EntityDefinition, EntityDefinitionBuilder};
pub use time::{StorageDatetime, ZERO_EPOCH, ZERO_SQLTIME};

// Re-export derive macro
pub use entity_storage_derive::EntityKind;
