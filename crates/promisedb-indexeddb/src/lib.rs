//! IndexedDB storage engine for promisedb (browser WASM)
//!
//! Implements the `promisedb-core` engine traits over web-sys. Every request
//! registers its success/error listeners through the core event bridge, so
//! the adapter's table operations run unchanged against the browser store.
//!
//! # Example
//!
//! ```rust,ignore
//! use promisedb_core::{DbConfig, PromiseDb, TableSchema};
//! use promisedb_indexeddb::IdbEngine;
//! use serde_json::{json, Value};
//!
//! let db = PromiseDb::new(DbConfig::new("PromiseDB"), IdbEngine::new());
//! let logs = db.table::<Value>(TableSchema::from_fields("logs", ["id", "log"]));
//!
//! logs.add(&json!({"id": "1", "log": "test"})).await?;
//! let record = logs.read("1").await?;
//! assert!(record.is_some());
//! ```

pub mod convert;
pub mod engine;
pub mod error;
pub mod idb;
pub mod table;

pub use engine::{IdbConnection, IdbEngine, IdbStoreTransaction, IdbUpgradeScope};
pub use table::IdbTable;
pub use error::NOT_AVAILABLE;
