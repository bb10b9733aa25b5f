//! The adapter: lazy connection and schema management

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::debug;

use crate::config::{DbConfig, TableSchema};
use crate::engine::{Database, StorageEngine, UpgradeHook, UpgradeScope};
use crate::error::{ErrorKind, Result};
use crate::logging::prefix;
use crate::table::Table;

/// Async adapter over one database of a storage engine.
///
/// The connection is opened on first use and memoized. Clones share the
/// connection, so a `PromiseDb` can be handed to as many tables as needed.
pub struct PromiseDb<E: StorageEngine> {
    inner: Rc<Inner<E>>,
}

struct Inner<E: StorageEngine> {
    config: DbConfig,
    engine: E,
    connection: RefCell<Option<E::Database>>,
    /// Highest version any connection of this adapter has had
    seen_version: Cell<u32>,
}

impl<E: StorageEngine> Clone for PromiseDb<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: StorageEngine> PromiseDb<E> {
    pub fn new(config: DbConfig, engine: E) -> Self {
        Self {
            inner: Rc::new(Inner {
                config,
                engine,
                connection: RefCell::new(None),
                seen_version: Cell::new(0),
            }),
        }
    }

    pub fn config(&self) -> &DbConfig {
        &self.inner.config
    }

    pub fn engine(&self) -> &E {
        &self.inner.engine
    }

    /// Whether both handles are the same adapter instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether a connection is currently cached.
    pub fn is_open(&self) -> bool {
        self.inner.connection.borrow().is_some()
    }

    /// A handle for the table described by `schema`, holding records of type `T`.
    pub fn table<T>(&self, schema: TableSchema) -> Table<E, T> {
        Table::new(self.clone(), schema)
    }

    /// Ensure the database is open and `schema`'s store exists, returning
    /// the open connection.
    ///
    /// Safe to call repeatedly: the store and its indexes are only created
    /// when missing. If the open database lacks the store, the connection is
    /// reopened one version higher so the upgrade can create it. The
    /// configured version is a minimum: the adapter never reopens below a
    /// version it has already bumped to.
    pub async fn create_table(&self, schema: &TableSchema) -> Result<E::Database> {
        let cached = self.inner.connection.borrow().clone();
        let mut db = match cached {
            Some(db) => db,
            None => {
                let seen = self.inner.seen_version.get();
                let version = self.inner.config.version.map(|v| v.max(seen));
                self.open(version, schema).await?
            }
        };

        while !db.has_store(&schema.name) {
            let next = db.version() + 1;
            debug!(
                "{} store '{}' missing from {} v{}, reopening at v{}",
                prefix::DB,
                schema.name,
                db.name(),
                db.version(),
                next
            );
            self.forget(&db);
            db = self.open(Some(next), schema).await?;
        }

        Ok(db)
    }

    /// Close the cached connection. The next operation reopens it.
    pub fn close(&self) {
        if let Some(db) = self.inner.connection.borrow_mut().take() {
            debug!("{} closing {} v{}", prefix::DB, db.name(), db.version());
            db.close();
        }
    }

    /// Close the connection and delete the whole database.
    pub async fn delete_database(&self) -> Result<()> {
        self.close();
        let request = self.inner.engine.delete_database(&self.inner.config.name)?;
        request.await?;
        debug!("{} deleted {}", prefix::DB, self.inner.config.name);
        Ok(())
    }

    async fn open(&self, version: Option<u32>, schema: &TableSchema) -> Result<E::Database> {
        let name = &self.inner.config.name;
        let request = self
            .inner
            .engine
            .open(name, version, upgrade_hook(schema.clone()))?;
        let db = match request.await {
            Ok(db) => db,
            // Stored database is already newer, e.g. bumped in an earlier session
            Err(err) if err.kind == ErrorKind::Version && version.is_some() => {
                debug!("{} {}: {}, opening at latest", prefix::DB, name, err.message);
                let request = self
                    .inner
                    .engine
                    .open(name, None, upgrade_hook(schema.clone()))?;
                request.await?
            }
            Err(err) => return Err(err.into()),
        };
        let seen = &self.inner.seen_version;
        seen.set(seen.get().max(db.version()));

        let mut slot = self.inner.connection.borrow_mut();
        if let Some(existing) = slot.as_ref() {
            // Another caller opened while this one was waiting
            if existing.version() >= db.version() {
                db.close();
                return Ok(existing.clone());
            }
            existing.close();
        }

        debug!("{} opened {} v{}", prefix::DB, db.name(), db.version());
        *slot = Some(db.clone());
        Ok(db)
    }

    /// Drop `db` from the cache (if it is the cached connection) and close it.
    fn forget(&self, db: &E::Database) {
        let mut slot = self.inner.connection.borrow_mut();
        if slot.as_ref().is_some_and(|cached| cached.same_connection(db)) {
            *slot = None;
        }
        db.close();
    }
}

/// Upgrade callback creating `schema`'s store and indexes when absent.
fn upgrade_hook(schema: TableSchema) -> UpgradeHook {
    Box::new(move |scope: &dyn UpgradeScope| {
        if scope.has_store(&schema.name) {
            return Ok(());
        }
        debug!(
            "{} creating store '{}' (upgrade from v{})",
            prefix::DB,
            schema.name,
            scope.old_version()
        );
        scope.create_store(&schema.name, schema.primary_key.as_deref())?;
        for field in &schema.indexes {
            scope.create_index(&schema.name, field, field)?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MemoryEngine, Pending};
    use crate::error::DbError;
    use futures::FutureExt;
    use pretty_assertions::assert_eq;

    fn logs() -> TableSchema {
        TableSchema::from_fields("logs", ["id", "log", "size"])
    }

    #[tokio::test]
    async fn test_create_table_is_idempotent() {
        let engine = MemoryEngine::new();
        let db = PromiseDb::new(DbConfig::new("app"), engine.clone());

        db.create_table(&logs()).await.unwrap();
        db.create_table(&logs()).await.unwrap();

        assert_eq!(engine.store_names("app"), vec!["logs"]);
        assert_eq!(engine.index_names("app", "logs"), vec!["log", "size"]);
        assert_eq!(engine.version("app"), Some(1));
    }

    #[tokio::test]
    async fn test_connection_is_memoized() {
        let db = PromiseDb::new(DbConfig::new("app"), MemoryEngine::new());
        assert!(!db.is_open());

        let first = db.create_table(&logs()).await.unwrap();
        let second = db.create_table(&logs()).await.unwrap();
        assert!(db.is_open());
        assert_eq!(first.version(), second.version());
    }

    #[tokio::test]
    async fn test_second_table_bumps_version() {
        let engine = MemoryEngine::new();
        let db = PromiseDb::new(DbConfig::new("app"), engine.clone());

        db.create_table(&logs()).await.unwrap();
        let conn = db
            .create_table(&TableSchema::new("users", "email"))
            .await
            .unwrap();

        assert_eq!(conn.version(), 2);
        assert_eq!(engine.store_names("app"), vec!["logs", "users"]);
    }

    #[tokio::test]
    async fn test_explicit_version() {
        let engine = MemoryEngine::new();
        let db = PromiseDb::new(DbConfig::new("app").with_version(5), engine.clone());
        db.create_table(&logs()).await.unwrap();
        assert_eq!(engine.version("app"), Some(5));
    }

    #[tokio::test]
    async fn test_configured_version_is_a_floor() {
        let engine = MemoryEngine::new();
        let db = PromiseDb::new(DbConfig::new("app").with_version(1), engine.clone());
        db.create_table(&logs()).await.unwrap();
        db.create_table(&TableSchema::new("users", "email"))
            .await
            .unwrap();
        assert_eq!(engine.version("app"), Some(2));

        db.close();
        let conn = db.create_table(&logs()).await.unwrap();
        assert_eq!(conn.version(), 2);

        // A later session still configured at v1
        let fresh = PromiseDb::new(DbConfig::new("app").with_version(1), engine.clone());
        let conn = fresh.create_table(&logs()).await.unwrap();
        assert_eq!(conn.version(), 2);
        assert!(conn.has_store("users"));
        assert_eq!(engine.version("app"), Some(2));
    }

    #[tokio::test]
    async fn test_configured_version_above_stored_upgrades() {
        let engine = MemoryEngine::new();
        PromiseDb::new(DbConfig::new("app"), engine.clone())
            .create_table(&logs())
            .await
            .unwrap();

        let db = PromiseDb::new(DbConfig::new("app").with_version(4), engine.clone());
        let conn = db.create_table(&logs()).await.unwrap();
        assert_eq!(conn.version(), 4);
        assert_eq!(engine.store_names("app"), vec!["logs"]);
    }

    /// Memory engine whose opens complete on a later poll, like the browser's.
    #[derive(Clone)]
    struct Deferred(MemoryEngine);

    impl StorageEngine for Deferred {
        type Database = <MemoryEngine as StorageEngine>::Database;

        fn open(
            &self,
            name: &str,
            version: Option<u32>,
            upgrade: UpgradeHook,
        ) -> std::result::Result<Pending<Self::Database>, DbError> {
            let request = self.0.open(name, version, upgrade)?;
            Ok(async move {
                tokio::task::yield_now().await;
                request.await
            }
            .boxed_local())
        }

        fn delete_database(&self, name: &str) -> std::result::Result<Pending<()>, DbError> {
            self.0.delete_database(name)
        }
    }

    #[tokio::test]
    async fn test_interleaved_opens_share_one_connection() {
        let engine = MemoryEngine::new();
        let db = PromiseDb::new(DbConfig::new("app"), Deferred(engine.clone()));

        let users = TableSchema::new("users", "email");
        let logs = logs();
        let (first, second) = futures::join!(db.create_table(&logs), db.create_table(&users));
        first.unwrap();
        let second = second.unwrap();

        assert!(second.has_store("logs"));
        assert!(second.has_store("users"));
        assert_eq!(engine.open_connections("app"), 1);
    }

    #[tokio::test]
    async fn test_interleaved_bumps_share_one_connection() {
        let engine = MemoryEngine::new();
        let db = PromiseDb::new(DbConfig::new("app"), Deferred(engine.clone()));
        db.create_table(&logs()).await.unwrap();

        let users = TableSchema::new("users", "email");
        let tags = TableSchema::new("tags", "name");
        let (first, second) = futures::join!(db.create_table(&users), db.create_table(&tags));
        first.unwrap();
        second.unwrap();

        assert_eq!(engine.store_names("app"), vec!["logs", "tags", "users"]);
        assert_eq!(engine.open_connections("app"), 1);

        let cached = db.create_table(&logs()).await.unwrap();
        assert!(cached.has_store("tags"));
        assert!(cached.has_store("users"));
        assert_eq!(engine.open_connections("app"), 1);
    }

    #[tokio::test]
    async fn test_no_engine_fails_fast() {
        let db = PromiseDb::new(DbConfig::new("app"), MemoryEngine::unavailable());
        let err = db.create_table(&logs()).await.unwrap_err();
        assert!(matches!(err, DbError::NotAvailable(_)));
        assert!(!db.is_open());
    }

    #[tokio::test]
    async fn test_close_and_delete() {
        let engine = MemoryEngine::new();
        let db = PromiseDb::new(DbConfig::new("app"), engine.clone());
        db.create_table(&logs()).await.unwrap();

        db.close();
        assert!(!db.is_open());
        db.create_table(&logs()).await.unwrap();

        db.delete_database().await.unwrap();
        assert!(!db.is_open());
        assert_eq!(engine.version("app"), None);
    }
}
