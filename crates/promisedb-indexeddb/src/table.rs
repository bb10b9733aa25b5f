//! Table handle over raw JS values
//!
//! Same operations and transaction policy as `promisedb_core::Table`, but
//! records and keys are handed to IndexedDB untouched, so anything the
//! structured clone keeps (`Date`, typed arrays, `undefined` properties,
//! `Date` keys) survives the round trip. Used by the JavaScript bindings.

use std::fmt;

use futures::StreamExt;
use js_sys::Array;
use promisedb_core::{Database, Operation, PromiseDb, Result, TableSchema, Transaction};
use tracing::trace;
use wasm_bindgen::JsValue;

use crate::engine::{IdbEngine, IdbStoreTransaction};

/// View of one object store holding arbitrary JS values.
#[derive(Clone)]
pub struct IdbTable {
    db: PromiseDb<IdbEngine>,
    schema: TableSchema,
}

impl fmt::Debug for IdbTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdbTable")
            .field("database", &self.db.config().name)
            .field("schema", &self.schema)
            .finish()
    }
}

impl IdbTable {
    pub fn new(db: PromiseDb<IdbEngine>, schema: TableSchema) -> Self {
        Self { db, schema }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    async fn begin(&self, op: Operation) -> Result<IdbStoreTransaction> {
        let db = self.db.create_table(&self.schema).await?;
        trace!(table = %self.schema.name, ?op, "begin");
        Ok(db.transaction(&self.schema.name, op.mode())?)
    }

    /// Insert a record. Fails with `ConstraintError` if its key exists.
    /// Resolves with the record's key.
    pub async fn add(&self, record: &JsValue) -> Result<JsValue> {
        let tx = self.begin(Operation::Add).await?;
        Ok(tx.add_js(record)?.await?)
    }

    /// The record under `key`, or `undefined` when absent.
    pub async fn read(&self, key: &JsValue) -> Result<JsValue> {
        let tx = self.begin(Operation::Read).await?;
        Ok(tx.get_js(key)?.await?)
    }

    /// Visit every record in key order.
    pub async fn each<F>(&self, mut callback: F) -> Result<()>
    where
        F: FnMut(JsValue),
    {
        let tx = self.begin(Operation::Each).await?;
        let mut cursor = tx.open_cursor_js()?;
        while let Some(record) = cursor.next().await {
            callback(record?);
        }
        Ok(())
    }

    /// Insert or replace a record. Resolves with its key.
    pub async fn update(&self, record: &JsValue) -> Result<JsValue> {
        let tx = self.begin(Operation::Update).await?;
        Ok(tx.put_js(record)?.await?)
    }

    /// Delete one key, or every key of an array atomically.
    ///
    /// A batch resolves with the array once its transaction commits; if any
    /// key is malformed the transaction is aborted and nothing is deleted.
    /// A single delete resolves with `None`.
    pub async fn remove(&self, keys: &JsValue) -> Result<Option<JsValue>> {
        if !Array::is_array(keys) {
            let tx = self.begin(Operation::RemoveOne).await?;
            tx.delete_js(keys)?.await?;
            return Ok(None);
        }

        let tx = self.begin(Operation::RemoveBatch).await?;
        for key in Array::from(keys).iter() {
            // Per-request outcomes surface through the transaction
            if let Err(err) = tx.delete_js(&key) {
                tx.abort();
                return Err(err.into());
            }
        }
        tx.done().await?;
        Ok(Some(keys.clone()))
    }
}
