//! Browser bindings using wasm-bindgen and IndexedDB storage
//!
//! Exposes two classes to JavaScript:
//! - `PromiseDB`: the adapter (shared instance or standalone)
//! - `Table`: add/read/each/update/remove over one object store
//!
//! Every method that touches storage returns a `Promise`. Engine failures
//! reject with an `Error` whose `name` is the DOMException name; a missing
//! `indexedDB` global rejects with a plain string.

use js_sys::{Function, Promise};
use promisedb_core::config::DEFAULT_NAME;
use promisedb_core::{get_or_create_singleton, DbConfig, DbError, PromiseDb, TableSchema};
use promisedb_indexeddb::{IdbEngine, IdbTable};
use tracing::warn;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

/// Convert an adapter error into the value a Promise rejects with.
pub fn to_js_error(err: DbError) -> JsValue {
    match err {
        DbError::NotAvailable(message) => JsValue::from_str(&message),
        DbError::Native(native) => {
            let error = js_sys::Error::new(&native.message);
            error.set_name(native.name());
            error.into()
        }
        DbError::Serialization(message) => js_sys::Error::new(&message).into(),
    }
}

fn schema(name: String, fields: Vec<String>) -> TableSchema {
    TableSchema::from_fields(name, fields)
}

/// The adapter, as seen from JavaScript.
#[wasm_bindgen(js_name = PromiseDB)]
pub struct JsPromiseDb {
    db: PromiseDb<IdbEngine>,
}

#[wasm_bindgen(js_class = PromiseDB)]
impl JsPromiseDb {
    /// A standalone adapter that does not share the process-wide instance.
    #[wasm_bindgen(constructor)]
    pub fn new(name: Option<String>, version: Option<u32>) -> JsPromiseDb {
        console_error_panic_hook::set_once();
        let mut config = DbConfig::new(name.unwrap_or_else(|| DEFAULT_NAME.to_string()));
        config.version = version;
        JsPromiseDb {
            db: PromiseDb::new(config, IdbEngine::new()),
        }
    }

    /// The shared adapter. The first call decides the database; later calls
    /// get the same instance whatever they pass.
    #[wasm_bindgen(js_name = getInstance)]
    pub fn get_instance(name: Option<String>, version: Option<u32>) -> JsPromiseDb {
        console_error_panic_hook::set_once();
        let name = name.unwrap_or_else(|| DEFAULT_NAME.to_string());
        JsPromiseDb {
            db: get_or_create_singleton::<IdbEngine>(&name, version),
        }
    }

    #[wasm_bindgen(getter)]
    pub fn name(&self) -> String {
        self.db.config().name.clone()
    }

    /// Ensure the store exists. Resolves with the open `IDBDatabase`.
    ///
    /// `fields[0]` is the primary key path; every other field is indexed.
    #[wasm_bindgen(js_name = createTable)]
    pub fn create_table(&self, name: String, fields: Vec<String>) -> Promise {
        let db = self.db.clone();
        let schema = schema(name, fields);
        future_to_promise(async move {
            let conn = db.create_table(&schema).await.map_err(to_js_error)?;
            Ok(conn.raw().clone().into())
        })
    }

    /// A handle on one table. Nothing is opened until the first operation.
    ///
    /// `fields` may be left out for a store that already exists.
    pub fn table(&self, name: String, fields: Option<Vec<String>>) -> JsTable {
        let schema = schema(name, fields.unwrap_or_default());
        JsTable {
            table: IdbTable::new(self.db.clone(), schema),
        }
    }

    /// Close the connection. The next operation reopens it.
    pub fn close(&self) {
        self.db.close();
    }

    /// Close the connection and delete the database.
    #[wasm_bindgen(js_name = deleteDatabase)]
    pub fn delete_database(&self) -> Promise {
        let db = self.db.clone();
        future_to_promise(async move {
            db.delete_database().await.map_err(to_js_error)?;
            Ok(JsValue::UNDEFINED)
        })
    }
}

/// One object store, as seen from JavaScript. Records and keys go to
/// IndexedDB as they are, so `Date` values and keys survive.
#[wasm_bindgen(js_name = Table)]
pub struct JsTable {
    table: IdbTable,
}

#[wasm_bindgen(js_class = Table)]
impl JsTable {
    #[wasm_bindgen(getter)]
    pub fn name(&self) -> String {
        self.table.name().to_string()
    }

    /// Insert a record. Resolves with its key; rejects with
    /// `ConstraintError` if the key exists.
    pub fn add(&self, record: JsValue) -> Promise {
        let table = self.table.clone();
        future_to_promise(async move { table.add(&record).await.map_err(to_js_error) })
    }

    /// Resolves with the record, or `undefined` when absent.
    pub fn read(&self, key: JsValue) -> Promise {
        let table = self.table.clone();
        future_to_promise(async move { table.read(&key).await.map_err(to_js_error) })
    }

    /// Call `callback(record)` for every record in key order. Resolves once
    /// the scan is done, or rejects with the first exception the callback
    /// threw.
    pub fn each(&self, callback: Function) -> Promise {
        let table = self.table.clone();
        future_to_promise(async move {
            let mut thrown: Option<JsValue> = None;
            table
                .each(|record| {
                    if thrown.is_some() {
                        return;
                    }
                    if let Err(err) = callback.call1(&JsValue::NULL, &record) {
                        warn!("each callback threw: {:?}", err);
                        thrown = Some(err);
                    }
                })
                .await
                .map_err(to_js_error)?;
            match thrown {
                Some(err) => Err(err),
                None => Ok(JsValue::UNDEFINED),
            }
        })
    }

    /// Insert or replace a record. Resolves with its key.
    pub fn update(&self, record: JsValue) -> Promise {
        let table = self.table.clone();
        future_to_promise(async move { table.update(&record).await.map_err(to_js_error) })
    }

    /// Delete one key, or an array of keys atomically. A batch resolves
    /// with the keys once its transaction commits.
    pub fn remove(&self, keys: JsValue) -> Promise {
        let table = self.table.clone();
        future_to_promise(async move {
            let removed = table.remove(&keys).await.map_err(to_js_error)?;
            Ok(removed.unwrap_or(JsValue::UNDEFINED))
        })
    }
}
