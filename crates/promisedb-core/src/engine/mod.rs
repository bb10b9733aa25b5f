//! Storage engine abstraction
//!
//! The adapter drives a versioned, transactional key-value engine through
//! these traits. Implementations exist for:
//!
//! - **Memory**: in-process engine with IndexedDB semantics (`MemoryEngine`)
//! - **IndexedDB**: browser storage via web-sys (separate crate, WASM only)
//!
//! Requests are issued synchronously and report their outcome later, the
//! same way the browser API does. A request that cannot even be issued (a
//! malformed key, a read-only transaction) fails with `Err` right away;
//! everything else fails through the returned future.

use futures::future::LocalBoxFuture;
use serde_json::Value;

use crate::bridge::Cursor;
use crate::error::{DbError, NativeError};

mod memory;

pub use memory::MemoryEngine;

/// Outcome of an issued request.
pub type Pending<T> = LocalBoxFuture<'static, Result<T, NativeError>>;

/// Schema callback run inside a version change.
pub type UpgradeHook = Box<dyn FnOnce(&dyn UpgradeScope) -> Result<(), NativeError>>;

/// Transaction access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// Entry point of a storage engine.
pub trait StorageEngine {
    type Database: Database;

    /// Open `name` at `version` (the existing version, or 1 for a new
    /// database, when `None`). `upgrade` runs when the database is new or
    /// the version increases.
    ///
    /// Returns `DbError::NotAvailable` without issuing anything when the
    /// host has no engine.
    fn open(
        &self,
        name: &str,
        version: Option<u32>,
        upgrade: UpgradeHook,
    ) -> Result<Pending<Self::Database>, DbError>;

    /// Delete a database and everything in it.
    fn delete_database(&self, name: &str) -> Result<Pending<()>, DbError>;
}

/// An open database connection.
pub trait Database: Clone + 'static {
    type Transaction: Transaction;

    fn name(&self) -> String;

    fn version(&self) -> u32;

    /// Whether both handles are the same connection (not merely the same
    /// database and version).
    fn same_connection(&self, other: &Self) -> bool;

    /// Whether an object store with this name exists.
    fn has_store(&self, name: &str) -> bool;

    /// Start a transaction scoped to a single store.
    fn transaction(&self, store: &str, mode: TransactionMode)
        -> Result<Self::Transaction, NativeError>;

    fn close(&self);
}

/// A transaction over one object store.
pub trait Transaction: 'static {
    /// Insert; fails with `ConstraintError` when the key exists.
    /// Resolves with the record's key.
    fn add(&self, record: &Value) -> Result<Pending<Value>, NativeError>;

    /// Insert or replace. Resolves with the record's key.
    fn put(&self, record: &Value) -> Result<Pending<Value>, NativeError>;

    /// Point lookup. Resolves with `Value::Null` when absent.
    fn get(&self, key: &Value) -> Result<Pending<Value>, NativeError>;

    /// Delete by key; deleting an absent key is not an error.
    fn delete(&self, key: &Value) -> Result<Pending<()>, NativeError>;

    /// Forward scan over every record in key order.
    fn open_cursor(&self) -> Result<Cursor, NativeError>;

    /// Roll back everything done in this transaction.
    fn abort(&self);

    /// Resolves when the transaction commits; fails if it errors or aborts.
    fn done(&self) -> Pending<()>;
}

/// Schema operations available inside a version change.
pub trait UpgradeScope {
    /// Version before this upgrade (0 for a new database).
    fn old_version(&self) -> u32;

    fn has_store(&self, name: &str) -> bool;

    fn create_store(&self, name: &str, key_path: Option<&str>) -> Result<(), NativeError>;

    fn create_index(&self, store: &str, index: &str, key_path: &str) -> Result<(), NativeError>;
}
