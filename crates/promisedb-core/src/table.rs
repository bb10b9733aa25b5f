//! Table handles and the per-operation bridge
//!
//! Every operation ensures the connection and schema, opens a transaction
//! in the mode its [`Operation`] prescribes, issues its request(s), and
//! resolves from either the request outcome or the transaction outcome.

use std::fmt;
use std::marker::PhantomData;

use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::trace;

use crate::config::TableSchema;
use crate::db::PromiseDb;
use crate::engine::{Database, Pending, StorageEngine, Transaction, TransactionMode};
use crate::error::{NativeError, Result};
use crate::key::{Key, Keys};

type TransactionOf<E> = <<E as StorageEngine>::Database as Database>::Transaction;

/// The operations a table supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Read,
    Each,
    Update,
    RemoveOne,
    RemoveBatch,
}

/// Which event an operation's result is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// The single request's success/error
    Request,
    /// Cursor exhaustion
    Cursor,
    /// Transaction complete/error/abort
    Transaction,
}

impl Operation {
    pub fn mode(self) -> TransactionMode {
        match self {
            Operation::Read | Operation::Each => TransactionMode::ReadOnly,
            Operation::Add | Operation::Update | Operation::RemoveOne | Operation::RemoveBatch => {
                TransactionMode::ReadWrite
            }
        }
    }

    /// A batch delete must not resolve before every delete is durable, so it
    /// waits for the transaction; single requests resolve on their own event.
    pub fn settlement(self) -> Settlement {
        match self {
            Operation::Each => Settlement::Cursor,
            Operation::RemoveBatch => Settlement::Transaction,
            Operation::Add | Operation::Read | Operation::Update | Operation::RemoveOne => {
                Settlement::Request
            }
        }
    }
}

/// Result of [`Table::remove`].
#[derive(Debug, Clone, PartialEq)]
pub enum Removal {
    /// A single key was deleted (or was already absent)
    Single,
    /// Every key of the batch was deleted; carries the keys as passed in
    Batch(Vec<Value>),
}

/// View of one table holding records of type `T`.
pub struct Table<E: StorageEngine, T> {
    db: PromiseDb<E>,
    schema: TableSchema,
    _record: PhantomData<fn() -> T>,
}

impl<E: StorageEngine, T> Clone for Table<E, T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            schema: self.schema.clone(),
            _record: PhantomData,
        }
    }
}

impl<E: StorageEngine, T> fmt::Debug for Table<E, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("database", &self.db.config().name)
            .field("schema", &self.schema)
            .finish()
    }
}

impl<E: StorageEngine, T> Table<E, T> {
    pub(crate) fn new(db: PromiseDb<E>, schema: TableSchema) -> Self {
        Self {
            db,
            schema,
            _record: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    async fn begin(&self, op: Operation) -> Result<TransactionOf<E>> {
        let db = self.db.create_table(&self.schema).await?;
        trace!(table = %self.schema.name, ?op, "begin");
        Ok(db.transaction(&self.schema.name, op.mode())?)
    }

    /// Issue one request and wait for its success or error event.
    async fn request<R, F>(&self, op: Operation, issue: F) -> Result<R>
    where
        F: FnOnce(&TransactionOf<E>) -> std::result::Result<Pending<R>, NativeError>,
    {
        debug_assert_eq!(op.settlement(), Settlement::Request);
        let tx = self.begin(op).await?;
        let pending = issue(&tx)?;
        Ok(pending.await?)
    }
}

impl<E, T> Table<E, T>
where
    E: StorageEngine,
    T: Serialize + DeserializeOwned,
{
    /// Insert a record. Fails with `ConstraintError` if its key exists.
    /// Returns the record's primary key.
    pub async fn add(&self, record: &T) -> Result<Key> {
        let value = serde_json::to_value(record)?;
        let key = self.request(Operation::Add, |tx| tx.add(&value)).await?;
        Ok(Key::from_value(&key)?)
    }

    /// Look up a record by primary key. `None` if absent.
    pub async fn read(&self, key: impl Into<Value>) -> Result<Option<T>> {
        let key = key.into();
        let found = self.request(Operation::Read, |tx| tx.get(&key)).await?;
        if found.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(found)?))
    }

    /// Visit every record in key order.
    pub async fn each<F>(&self, mut callback: F) -> Result<()>
    where
        F: FnMut(T),
    {
        let tx = self.begin(Operation::Each).await?;
        let mut cursor = tx.open_cursor()?;
        while let Some(record) = cursor.next().await {
            callback(serde_json::from_value(record?)?);
        }
        Ok(())
    }

    /// Insert or replace a record. Returns its primary key.
    pub async fn update(&self, record: &T) -> Result<Key> {
        let value = serde_json::to_value(record)?;
        let key = self.request(Operation::Update, |tx| tx.put(&value)).await?;
        Ok(Key::from_value(&key)?)
    }

    /// Delete one key, or a batch of keys atomically.
    ///
    /// A batch resolves only once its transaction commits. If any key is
    /// malformed the transaction is aborted and nothing is deleted.
    pub async fn remove(&self, keys: impl Into<Keys>) -> Result<Removal> {
        match keys.into() {
            Keys::Single(key) => {
                self.request(Operation::RemoveOne, |tx| tx.delete(&key))
                    .await?;
                Ok(Removal::Single)
            }
            Keys::Batch(keys) => {
                let tx = self.begin(Operation::RemoveBatch).await?;
                for key in &keys {
                    // Per-request outcomes surface through the transaction
                    if let Err(err) = tx.delete(key) {
                        tx.abort();
                        return Err(err.into());
                    }
                }
                tx.done().await?;
                Ok(Removal::Batch(keys))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_table() {
        use Operation::*;
        let expected = [
            (Add, TransactionMode::ReadWrite, Settlement::Request),
            (Read, TransactionMode::ReadOnly, Settlement::Request),
            (Each, TransactionMode::ReadOnly, Settlement::Cursor),
            (Update, TransactionMode::ReadWrite, Settlement::Request),
            (RemoveOne, TransactionMode::ReadWrite, Settlement::Request),
            (RemoveBatch, TransactionMode::ReadWrite, Settlement::Transaction),
        ];
        for (op, mode, settlement) in expected {
            assert_eq!(op.mode(), mode, "{:?}", op);
            assert_eq!(op.settlement(), settlement, "{:?}", op);
        }
    }
}
