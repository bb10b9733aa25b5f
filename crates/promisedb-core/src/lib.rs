//! promisedb core
//!
//! An async adapter over versioned, transactional key-value stores whose
//! native API is callback based (IndexedDB and friends). Callers get linear
//! `async` chains for table creation, insert, point read, full scan, upsert
//! and delete, while the adapter manages one shared connection and creates
//! object stores lazily.
//!
//! The crate is WASM-compatible and engine-agnostic:
//!
//! - [`engine`] defines the storage engine traits and ships [`MemoryEngine`]
//! - [`bridge`] turns success/error callbacks into futures
//! - [`PromiseDb`] manages the connection and schema
//! - [`Table`] exposes the five table operations
//!
//! # Features
//!
//! - `subscriber` (default) - `logging::init` helpers over tracing-subscriber
//!
//! # Example
//!
//! ```rust
//! use promisedb_core::{DbConfig, MemoryEngine, PromiseDb, TableSchema};
//! use serde_json::{json, Value};
//!
//! # futures::executor::block_on(async {
//! let db = PromiseDb::new(DbConfig::new("app"), MemoryEngine::new());
//! let logs = db.table::<Value>(TableSchema::from_fields("logs", ["id", "size"]));
//!
//! let key = logs.add(&json!({"id": "1", "size": 110})).await.unwrap();
//! assert_eq!(key.to_value(), json!("1"));
//!
//! let record = logs.read("1").await.unwrap();
//! assert_eq!(record, Some(json!({"id": "1", "size": 110})));
//! # });
//! ```

pub mod bridge;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod key;
pub mod logging;
pub mod registry;
pub mod table;

// Re-export main types at crate root
pub use config::{DbConfig, TableSchema};
pub use db::PromiseDb;
pub use engine::{Database, MemoryEngine, StorageEngine, Transaction, TransactionMode};
pub use error::{DbError, ErrorKind, NativeError, Result};
pub use key::{Key, Keys};
pub use registry::{get_or_create_singleton, Registry};
pub use table::{Operation, Removal, Settlement, Table};
