//! In-memory storage engine
//!
//! A BTreeMap-backed engine that follows IndexedDB's rules closely enough to
//! test the adapter against: versioned opens with upgrade callbacks, key path
//! extraction, constraint errors on duplicate inserts, read-only transactions,
//! and rollback when a transaction aborts. Not persistent.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use futures::future::{self, FutureExt};
use serde_json::Value;
use tracing::{debug, warn};

use crate::bridge::{self, Cursor};
use crate::engine::{
    Database, Pending, StorageEngine, Transaction, TransactionMode, UpgradeHook, UpgradeScope,
};
use crate::error::{DbError, ErrorKind, NativeError};
use crate::key::Key;

const NOT_AVAILABLE: &str = "storage engine is not available in this environment";
const CONSTRAINT: &str =
    "A mutation operation in the transaction failed because a constraint was not satisfied.";
const KEY_PATH_NO_VALUE: &str = "Evaluating the object store's key path did not yield a value.";
const NO_KEY: &str = "The object store uses out-of-line keys and has no key generator and the key parameter was not provided.";
const READ_ONLY: &str = "The transaction is read-only.";
const INACTIVE: &str = "A request was placed against a transaction which is currently not active, or which is finished.";
const STORE_NOT_FOUND: &str = "One of the specified object stores was not found.";
const CLOSING: &str = "The database connection is closing.";
const ABORTED: &str = "The transaction was aborted, so the request cannot be fulfilled.";
const UPGRADE_ABORTED: &str = "Version change transaction was aborted in upgradeneeded event handler.";
const VERSION_ZERO: &str = "The version provided must not be 0.";
const STORE_EXISTS: &str = "An object store with the specified name already exists.";
const INDEX_EXISTS: &str = "An index with the specified name already exists.";

type Shared<T> = Rc<RefCell<T>>;

#[derive(Debug, Clone, Default)]
struct StoreState {
    key_path: Option<String>,
    /// index name -> key path
    indexes: BTreeMap<String, String>,
    records: BTreeMap<Key, Value>,
}

#[derive(Debug, Clone, Default)]
struct DatabaseState {
    version: u32,
    stores: BTreeMap<String, StoreState>,
}

fn ready<T: 'static>(outcome: Result<T, NativeError>) -> Pending<T> {
    future::ready(outcome).boxed_local()
}

/// In-memory engine. Clones share the same databases.
#[derive(Debug, Clone)]
pub struct MemoryEngine {
    available: bool,
    databases: Shared<HashMap<String, Shared<DatabaseState>>>,
    /// Closed flag of every connection handed out, by database name
    connections: Shared<Vec<(String, Rc<Cell<bool>>)>>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            available: true,
            databases: Rc::new(RefCell::new(HashMap::new())),
            connections: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// An engine standing in for a host that has no storage at all.
    /// Every open fails with `DbError::NotAvailable`.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Current version of a database, if it exists.
    pub fn version(&self, db_name: &str) -> Option<u32> {
        self.database(db_name).map(|db| db.borrow().version)
    }

    /// Object store names of a database, sorted.
    pub fn store_names(&self, db_name: &str) -> Vec<String> {
        self.database(db_name)
            .map(|db| db.borrow().stores.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Index names of an object store, sorted.
    pub fn index_names(&self, db_name: &str, store: &str) -> Vec<String> {
        self.database(db_name)
            .and_then(|db| {
                db.borrow()
                    .stores
                    .get(store)
                    .map(|s| s.indexes.keys().cloned().collect())
            })
            .unwrap_or_default()
    }

    /// Number of records in an object store.
    pub fn record_count(&self, db_name: &str, store: &str) -> usize {
        self.database(db_name)
            .and_then(|db| db.borrow().stores.get(store).map(|s| s.records.len()))
            .unwrap_or(0)
    }

    /// Number of connections to a database that have not been closed.
    pub fn open_connections(&self, db_name: &str) -> usize {
        self.connections
            .borrow()
            .iter()
            .filter(|(name, closed)| name == db_name && !closed.get())
            .count()
    }

    fn database(&self, name: &str) -> Option<Shared<DatabaseState>> {
        self.databases.borrow().get(name).cloned()
    }
}

impl StorageEngine for MemoryEngine {
    type Database = MemoryDatabase;

    fn open(
        &self,
        name: &str,
        version: Option<u32>,
        upgrade: UpgradeHook,
    ) -> Result<Pending<MemoryDatabase>, DbError> {
        if !self.available {
            return Err(DbError::NotAvailable(NOT_AVAILABLE.to_string()));
        }
        if version == Some(0) {
            return Err(NativeError::new(ErrorKind::Type, VERSION_ZERO).into());
        }

        let existing = self.database(name);
        let current = existing.as_ref().map_or(0, |db| db.borrow().version);
        let requested = version.unwrap_or(current.max(1));

        if requested < current {
            return Ok(ready(Err(NativeError::new(
                ErrorKind::Version,
                format!(
                    "The requested version ({}) is less than the existing version ({}).",
                    requested, current
                ),
            ))));
        }

        let state = existing.unwrap_or_default();
        if requested > current {
            let scope = MemoryUpgrade {
                old_version: current,
                state: RefCell::new(state.borrow().clone()),
            };
            if let Err(err) = upgrade(&scope) {
                warn!(database = name, error = %err, "upgrade callback failed, version change aborted");
                return Ok(ready(Err(NativeError::new(ErrorKind::Abort, UPGRADE_ABORTED))));
            }

            let mut upgraded = scope.state.into_inner();
            upgraded.version = requested;
            *state.borrow_mut() = upgraded;
            self.databases
                .borrow_mut()
                .insert(name.to_string(), state.clone());
            debug!(database = name, from = current, to = requested, "database upgraded");
        }

        let closed = Rc::new(Cell::new(false));
        let mut connections = self.connections.borrow_mut();
        connections.retain(|(_, closed)| !closed.get());
        connections.push((name.to_string(), closed.clone()));

        Ok(ready(Ok(MemoryDatabase {
            name: name.to_string(),
            version: requested,
            state,
            closed,
        })))
    }

    fn delete_database(&self, name: &str) -> Result<Pending<()>, DbError> {
        if !self.available {
            return Err(DbError::NotAvailable(NOT_AVAILABLE.to_string()));
        }
        if self.databases.borrow_mut().remove(name).is_some() {
            debug!(database = name, "database deleted");
        }
        Ok(ready(Ok(())))
    }
}

/// Schema editing inside a version change. Works on a copy that replaces
/// the database state only if the callback succeeds.
struct MemoryUpgrade {
    old_version: u32,
    state: RefCell<DatabaseState>,
}

impl UpgradeScope for MemoryUpgrade {
    fn old_version(&self) -> u32 {
        self.old_version
    }

    fn has_store(&self, name: &str) -> bool {
        self.state.borrow().stores.contains_key(name)
    }

    fn create_store(&self, name: &str, key_path: Option<&str>) -> Result<(), NativeError> {
        let mut state = self.state.borrow_mut();
        if state.stores.contains_key(name) {
            return Err(NativeError::new(ErrorKind::Constraint, STORE_EXISTS));
        }
        state.stores.insert(
            name.to_string(),
            StoreState {
                key_path: key_path.map(str::to_string),
                ..StoreState::default()
            },
        );
        debug!(store = name, key_path = ?key_path, "object store created");
        Ok(())
    }

    fn create_index(&self, store: &str, index: &str, key_path: &str) -> Result<(), NativeError> {
        let mut state = self.state.borrow_mut();
        let store = state
            .stores
            .get_mut(store)
            .ok_or_else(|| NativeError::new(ErrorKind::NotFound, STORE_NOT_FOUND))?;
        if store.indexes.contains_key(index) {
            return Err(NativeError::new(ErrorKind::Constraint, INDEX_EXISTS));
        }
        store
            .indexes
            .insert(index.to_string(), key_path.to_string());
        Ok(())
    }
}

/// Connection to an in-memory database.
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    name: String,
    version: u32,
    state: Shared<DatabaseState>,
    closed: Rc<Cell<bool>>,
}

impl Database for MemoryDatabase {
    type Transaction = MemoryTransaction;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn same_connection(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.closed, &other.closed)
    }

    fn has_store(&self, name: &str) -> bool {
        self.state.borrow().stores.contains_key(name)
    }

    fn transaction(
        &self,
        store: &str,
        mode: TransactionMode,
    ) -> Result<MemoryTransaction, NativeError> {
        if self.closed.get() {
            return Err(NativeError::new(ErrorKind::InvalidState, CLOSING));
        }
        if !self.has_store(store) {
            return Err(NativeError::new(ErrorKind::NotFound, STORE_NOT_FOUND));
        }
        Ok(MemoryTransaction {
            state: self.state.clone(),
            store: store.to_string(),
            mode,
            log: Rc::new(RefCell::new(TxLog::default())),
        })
    }

    fn close(&self) {
        self.closed.set(true);
    }
}

#[derive(Debug, Default)]
struct TxLog {
    /// (key, previous value) for every write, in order
    undo: Vec<(Key, Option<Value>)>,
    finished: Option<Result<(), NativeError>>,
}

/// Transaction over one in-memory store.
///
/// Writes apply immediately and are recorded in an undo log; aborting (or a
/// failed request) replays the log backwards.
pub struct MemoryTransaction {
    state: Shared<DatabaseState>,
    store: String,
    mode: TransactionMode,
    log: Shared<TxLog>,
}

impl MemoryTransaction {
    fn ensure_active(&self) -> Result<(), NativeError> {
        if self.log.borrow().finished.is_some() {
            return Err(NativeError::new(ErrorKind::TransactionInactive, INACTIVE));
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<(), NativeError> {
        self.ensure_active()?;
        if self.mode == TransactionMode::ReadOnly {
            return Err(NativeError::new(ErrorKind::ReadOnly, READ_ONLY));
        }
        Ok(())
    }

    fn record_key(&self, record: &Value) -> Result<Key, NativeError> {
        let state = self.state.borrow();
        let key_path = state
            .stores
            .get(&self.store)
            .and_then(|s| s.key_path.clone())
            .ok_or_else(|| NativeError::new(ErrorKind::Data, NO_KEY))?;
        let value = Key::extract(record, &key_path)
            .ok_or_else(|| NativeError::new(ErrorKind::Data, KEY_PATH_NO_VALUE))?;
        Key::from_value(value)
    }

    /// Write `record` at `key`, returning the previous value.
    fn write(&self, key: Key, record: Option<Value>) -> Option<Value> {
        let mut state = self.state.borrow_mut();
        let store = state.stores.entry(self.store.clone()).or_default();
        let previous = match record {
            Some(record) => store.records.insert(key.clone(), record),
            None => store.records.remove(&key),
        };
        self.log.borrow_mut().undo.push((key, previous.clone()));
        previous
    }

    fn rollback(&self, err: NativeError) {
        let undo = {
            let mut log = self.log.borrow_mut();
            log.finished = Some(Err(err));
            std::mem::take(&mut log.undo)
        };
        let mut state = self.state.borrow_mut();
        if let Some(store) = state.stores.get_mut(&self.store) {
            for (key, previous) in undo.into_iter().rev() {
                match previous {
                    Some(value) => store.records.insert(key, value),
                    None => store.records.remove(&key),
                };
            }
        }
    }
}

impl Transaction for MemoryTransaction {
    fn add(&self, record: &Value) -> Result<Pending<Value>, NativeError> {
        self.ensure_writable()?;
        let key = self.record_key(record)?;

        let exists = self
            .state
            .borrow()
            .stores
            .get(&self.store)
            .is_some_and(|s| s.records.contains_key(&key));
        if exists {
            let err = NativeError::new(ErrorKind::Constraint, CONSTRAINT);
            self.rollback(err.clone());
            return Ok(ready(Err(err)));
        }

        let value = key.to_value();
        self.write(key, Some(record.clone()));
        Ok(ready(Ok(value)))
    }

    fn put(&self, record: &Value) -> Result<Pending<Value>, NativeError> {
        self.ensure_writable()?;
        let key = self.record_key(record)?;
        let value = key.to_value();
        self.write(key, Some(record.clone()));
        Ok(ready(Ok(value)))
    }

    fn get(&self, key: &Value) -> Result<Pending<Value>, NativeError> {
        self.ensure_active()?;
        let key = Key::from_value(key)?;
        let found = self
            .state
            .borrow()
            .stores
            .get(&self.store)
            .and_then(|s| s.records.get(&key).cloned())
            .unwrap_or(Value::Null);
        Ok(ready(Ok(found)))
    }

    fn delete(&self, key: &Value) -> Result<Pending<()>, NativeError> {
        self.ensure_writable()?;
        let key = Key::from_value(key)?;
        let exists = self
            .state
            .borrow()
            .stores
            .get(&self.store)
            .is_some_and(|s| s.records.contains_key(&key));
        if exists {
            self.write(key, None);
        }
        Ok(ready(Ok(())))
    }

    fn open_cursor(&self) -> Result<Cursor, NativeError> {
        self.ensure_active()?;
        let records: Vec<Value> = self
            .state
            .borrow()
            .stores
            .get(&self.store)
            .map(|s| s.records.values().cloned().collect())
            .unwrap_or_default();

        let (sink, cursor) = bridge::cursor();
        for record in records {
            sink.push(record);
        }
        sink.finish();
        Ok(cursor)
    }

    fn abort(&self) {
        if self.log.borrow().finished.is_none() {
            self.rollback(NativeError::new(ErrorKind::Abort, ABORTED));
        }
    }

    fn done(&self) -> Pending<()> {
        let mut log = self.log.borrow_mut();
        let outcome = log.finished.get_or_insert(Ok(())).clone();
        log.undo.clear();
        ready(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn logs_schema() -> UpgradeHook {
        Box::new(|scope: &dyn UpgradeScope| {
            if !scope.has_store("logs") {
                scope.create_store("logs", Some("id"))?;
                scope.create_index("logs", "size", "size")?;
            }
            Ok(())
        })
    }

    fn open(engine: &MemoryEngine, version: Option<u32>) -> MemoryDatabase {
        block_on(engine.open("test", version, logs_schema()).unwrap()).unwrap()
    }

    #[test]
    fn test_open_runs_upgrade_once() {
        let engine = MemoryEngine::new();
        let db = open(&engine, None);
        assert_eq!(db.version(), 1);
        assert!(db.has_store("logs"));

        let calls = Rc::new(Cell::new(0));
        let counted = calls.clone();
        let hook: UpgradeHook = Box::new(move |_: &dyn UpgradeScope| {
            counted.set(counted.get() + 1);
            Ok(())
        });
        let again = block_on(engine.open("test", Some(1), hook).unwrap()).unwrap();
        assert_eq!(again.version(), 1);
        assert_eq!(calls.get(), 0);
        assert_eq!(engine.index_names("test", "logs"), vec!["size"]);
    }

    #[test]
    fn test_lower_version_fails() {
        let engine = MemoryEngine::new();
        open(&engine, Some(3));
        let err = block_on(engine.open("test", Some(2), logs_schema()).unwrap()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Version);
    }

    #[test]
    fn test_version_zero_is_rejected() {
        let engine = MemoryEngine::new();
        let err = engine.open("test", Some(0), logs_schema()).err().unwrap();
        assert_eq!(err.kind(), Some(&ErrorKind::Type));
    }

    #[test]
    fn test_failed_upgrade_leaves_nothing() {
        let engine = MemoryEngine::new();
        let hook: UpgradeHook = Box::new(|scope: &dyn UpgradeScope| {
            scope.create_store("logs", Some("id"))?;
            scope.create_index("missing", "size", "size")
        });
        let err = block_on(engine.open("test", None, hook).unwrap()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Abort);
        assert_eq!(engine.version("test"), None);
        assert!(engine.store_names("test").is_empty());
    }

    #[test]
    fn test_unavailable() {
        let engine = MemoryEngine::unavailable();
        let err = engine.open("test", None, logs_schema()).err().unwrap();
        assert!(matches!(err, DbError::NotAvailable(_)));
    }

    #[test]
    fn test_add_duplicate_rolls_back_transaction() {
        let engine = MemoryEngine::new();
        let db = open(&engine, None);

        let tx = db.transaction("logs", TransactionMode::ReadWrite).unwrap();
        block_on(tx.add(&json!({"id": "1"})).unwrap()).unwrap();
        block_on(tx.done()).unwrap();

        let tx = db.transaction("logs", TransactionMode::ReadWrite).unwrap();
        block_on(tx.add(&json!({"id": "2"})).unwrap()).unwrap();
        let err = block_on(tx.add(&json!({"id": "1"})).unwrap()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Constraint);
        assert_eq!(block_on(tx.done()).unwrap_err().kind, ErrorKind::Constraint);

        // "2" was written in the failed transaction and is gone again
        assert_eq!(engine.record_count("test", "logs"), 1);
    }

    #[test]
    fn test_missing_key_path_value() {
        let engine = MemoryEngine::new();
        let db = open(&engine, None);
        let tx = db.transaction("logs", TransactionMode::ReadWrite).unwrap();
        let err = tx.add(&json!({"size": 1})).err().unwrap();
        assert_eq!(err.kind, ErrorKind::Data);
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let engine = MemoryEngine::new();
        let db = open(&engine, None);
        let tx = db.transaction("logs", TransactionMode::ReadOnly).unwrap();
        assert_eq!(tx.put(&json!({"id": 1})).err().unwrap().kind, ErrorKind::ReadOnly);
        assert_eq!(tx.delete(&json!(1)).err().unwrap().kind, ErrorKind::ReadOnly);
    }

    #[test]
    fn test_abort_restores_previous_values() {
        let engine = MemoryEngine::new();
        let db = open(&engine, None);

        let tx = db.transaction("logs", TransactionMode::ReadWrite).unwrap();
        let _ = tx.put(&json!({"id": 1, "v": "a"})).unwrap();
        block_on(tx.done()).unwrap();

        let tx = db.transaction("logs", TransactionMode::ReadWrite).unwrap();
        let _ = tx.put(&json!({"id": 1, "v": "b"})).unwrap();
        let _ = tx.delete(&json!(1)).unwrap();
        tx.abort();
        assert_eq!(block_on(tx.done()).unwrap_err().kind, ErrorKind::Abort);
        assert_eq!(
            tx.get(&json!(1)).err().unwrap().kind,
            ErrorKind::TransactionInactive
        );

        let tx = db.transaction("logs", TransactionMode::ReadOnly).unwrap();
        let value = block_on(tx.get(&json!(1)).unwrap()).unwrap();
        assert_eq!(value, json!({"id": 1, "v": "a"}));
    }

    #[test]
    fn test_cursor_in_key_order() {
        let engine = MemoryEngine::new();
        let db = open(&engine, None);
        let tx = db.transaction("logs", TransactionMode::ReadWrite).unwrap();
        for id in [json!("b"), json!(2), json!("a"), json!(1)] {
            let _ = tx.put(&json!({ "id": id })).unwrap();
        }

        let ids: Vec<Value> = block_on(
            tx.open_cursor()
                .unwrap()
                .map(|r| r.unwrap()["id"].clone())
                .collect::<Vec<_>>(),
        );
        assert_eq!(ids, vec![json!(1), json!(2), json!("a"), json!("b")]);
    }

    #[test]
    fn test_connection_identity() {
        let engine = MemoryEngine::new();
        let first = open(&engine, None);
        let second = open(&engine, None);
        assert!(first.same_connection(&first.clone()));
        assert!(!first.same_connection(&second));
        assert_eq!(engine.open_connections("test"), 2);

        first.close();
        assert_eq!(engine.open_connections("test"), 1);
        assert_eq!(engine.open_connections("other"), 0);
    }

    #[test]
    fn test_closed_connection() {
        let engine = MemoryEngine::new();
        let db = open(&engine, None);
        db.close();
        let err = db
            .transaction("logs", TransactionMode::ReadOnly)
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::InvalidState);
    }

    #[test]
    fn test_missing_store() {
        let engine = MemoryEngine::new();
        let db = open(&engine, None);
        let err = db
            .transaction("other", TransactionMode::ReadOnly)
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
