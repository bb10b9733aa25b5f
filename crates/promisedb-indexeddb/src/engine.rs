//! `StorageEngine` implementation over the browser's IndexedDB

use std::fmt;
use std::rc::Rc;

use futures::FutureExt;
use promisedb_core::bridge::{Cursor, Settle};
use promisedb_core::engine::{
    Database, Pending, StorageEngine, Transaction, TransactionMode, UpgradeHook, UpgradeScope,
};
use promisedb_core::{DbError, NativeError};
use serde_json::Value;
use tracing::trace;
use wasm_bindgen::JsValue;
use web_sys::{
    IdbDatabase, IdbIndexParameters, IdbObjectStore, IdbObjectStoreParameters, IdbTransaction,
    IdbTransactionMode,
};

use crate::convert;
use crate::error::js_error;
use crate::idb;

/// The browser's IndexedDB, reached through the `indexedDB` global.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdbEngine;

impl IdbEngine {
    pub fn new() -> Self {
        Self
    }

    /// Whether the host exposes `indexedDB` at all.
    pub fn is_available(&self) -> bool {
        idb::idb_factory().is_ok()
    }
}

impl StorageEngine for IdbEngine {
    type Database = IdbConnection;

    fn open(
        &self,
        name: &str,
        version: Option<u32>,
        upgrade: UpgradeHook,
    ) -> Result<Pending<IdbConnection>, DbError> {
        let request = idb::open_database(name, version, upgrade)?;
        Ok(request
            .map(|outcome| outcome.map(|db| IdbConnection::new(idb::into_database(db))))
            .boxed_local())
    }

    fn delete_database(&self, name: &str) -> Result<Pending<()>, DbError> {
        let request = idb::delete_database(name)?;
        Ok(request.map(|outcome| outcome.map(|_| ())).boxed_local())
    }
}

/// An open `IDBDatabase`. Closes itself when another connection requests
/// a version change.
#[derive(Clone)]
pub struct IdbConnection {
    db: IdbDatabase,
    _on_version_change: Rc<idb::VersionChangeListener>,
}

impl IdbConnection {
    fn new(db: IdbDatabase) -> Self {
        let listener = idb::VersionChangeListener::attach(&db);
        Self {
            db,
            _on_version_change: Rc::new(listener),
        }
    }

    /// The underlying handle, as handed to JavaScript callers.
    pub fn raw(&self) -> &IdbDatabase {
        &self.db
    }
}

impl fmt::Debug for IdbConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdbConnection")
            .field("name", &self.db.name())
            .field("version", &self.db.version())
            .finish()
    }
}

impl Database for IdbConnection {
    type Transaction = IdbStoreTransaction;

    fn name(&self) -> String {
        self.db.name()
    }

    fn version(&self) -> u32 {
        self.db.version() as u32
    }

    fn same_connection(&self, other: &Self) -> bool {
        js_sys::Object::is(&self.db, &other.db)
    }

    fn has_store(&self, name: &str) -> bool {
        self.db.object_store_names().contains(name)
    }

    fn transaction(
        &self,
        store: &str,
        mode: TransactionMode,
    ) -> Result<IdbStoreTransaction, NativeError> {
        let mode = match mode {
            TransactionMode::ReadOnly => IdbTransactionMode::Readonly,
            TransactionMode::ReadWrite => IdbTransactionMode::Readwrite,
        };
        let tx = self
            .db
            .transaction_with_str_and_mode(store, mode)
            .map_err(js_error)?;
        let store = tx.object_store(store).map_err(js_error)?;
        Ok(IdbStoreTransaction { tx, store })
    }

    fn close(&self) {
        self.db.close();
    }
}

/// A transaction scoped to one object store.
pub struct IdbStoreTransaction {
    tx: IdbTransaction,
    store: IdbObjectStore,
}

/// Requests taking and yielding JS values as they are, with no JSON step.
/// Records keep everything the structured clone keeps (`Date`, typed
/// arrays, `undefined` properties).
impl IdbStoreTransaction {
    pub fn add_js(&self, record: &JsValue) -> Result<Settle<JsValue>, NativeError> {
        let request = self.store.add(record).map_err(js_error)?;
        Ok(idb::settle_request(&request))
    }

    pub fn put_js(&self, record: &JsValue) -> Result<Settle<JsValue>, NativeError> {
        let request = self.store.put(record).map_err(js_error)?;
        Ok(idb::settle_request(&request))
    }

    /// Resolves with `undefined` when the key is absent.
    pub fn get_js(&self, key: &JsValue) -> Result<Settle<JsValue>, NativeError> {
        let request = self.store.get(key).map_err(js_error)?;
        Ok(idb::settle_request(&request))
    }

    pub fn delete_js(&self, key: &JsValue) -> Result<Settle<JsValue>, NativeError> {
        let request = self.store.delete(key).map_err(js_error)?;
        Ok(idb::settle_request(&request))
    }

    pub fn open_cursor_js(&self) -> Result<Cursor<JsValue>, NativeError> {
        let request = self.store.open_cursor().map_err(js_error)?;
        Ok(idb::cursor_with(&request, Ok))
    }
}

/// Convert a settled request's result to JSON.
fn json_of(settle: Settle<JsValue>) -> Pending<Value> {
    settle
        .map(|outcome| {
            let result = outcome?;
            convert::from_js(&result).map_err(NativeError::from)
        })
        .boxed_local()
}

impl Transaction for IdbStoreTransaction {
    fn add(&self, record: &Value) -> Result<Pending<Value>, NativeError> {
        Ok(json_of(self.add_js(&convert::to_js(record)?)?))
    }

    fn put(&self, record: &Value) -> Result<Pending<Value>, NativeError> {
        Ok(json_of(self.put_js(&convert::to_js(record)?)?))
    }

    fn get(&self, key: &Value) -> Result<Pending<Value>, NativeError> {
        Ok(json_of(self.get_js(&convert::to_js(key)?)?))
    }

    fn delete(&self, key: &Value) -> Result<Pending<()>, NativeError> {
        let settle = self.delete_js(&convert::to_js(key)?)?;
        Ok(settle.map(|outcome| outcome.map(|_| ())).boxed_local())
    }

    fn open_cursor(&self) -> Result<Cursor, NativeError> {
        let request = self.store.open_cursor().map_err(js_error)?;
        Ok(idb::cursor_values(&request))
    }

    fn abort(&self) {
        // Throws InvalidStateError once the transaction has finished
        if let Err(thrown) = self.tx.abort() {
            trace!("abort after finish: {}", js_error(thrown));
        }
    }

    fn done(&self) -> Pending<()> {
        idb::settle_transaction(&self.tx).boxed_local()
    }
}

/// Schema access inside a `versionchange` transaction.
pub struct IdbUpgradeScope {
    db: IdbDatabase,
    tx: IdbTransaction,
    old_version: u32,
}

impl IdbUpgradeScope {
    pub(crate) fn new(db: IdbDatabase, tx: IdbTransaction, old_version: u32) -> Self {
        Self {
            db,
            tx,
            old_version,
        }
    }
}

impl UpgradeScope for IdbUpgradeScope {
    fn old_version(&self) -> u32 {
        self.old_version
    }

    fn has_store(&self, name: &str) -> bool {
        self.db.object_store_names().contains(name)
    }

    fn create_store(&self, name: &str, key_path: Option<&str>) -> Result<(), NativeError> {
        let params = IdbObjectStoreParameters::new();
        if let Some(key_path) = key_path {
            js_sys::Reflect::set(&params, &"keyPath".into(), &key_path.into())
                .map_err(js_error)?;
        }
        self.db
            .create_object_store_with_optional_parameters(name, &params)
            .map_err(js_error)?;
        Ok(())
    }

    fn create_index(&self, store: &str, index: &str, key_path: &str) -> Result<(), NativeError> {
        let store = self.tx.object_store(store).map_err(js_error)?;
        if store.index_names().contains(index) {
            return Ok(());
        }
        store
            .create_index_with_str_and_optional_parameters(
                index,
                key_path,
                &IdbIndexParameters::new(),
            )
            .map_err(js_error)?;
        Ok(())
    }
}
