//! Low-level IndexedDB helpers using web-sys
//!
//! Wraps the callback-based IndexedDB API into futures from the core event
//! bridge. Each helper registers its listeners and hands back a future that
//! owns them: the listeners are cleared when that future is dropped.

use promisedb_core::bridge::{self, Cursor, Settle};
use promisedb_core::engine::UpgradeHook;
use promisedb_core::logging::prefix;
use promisedb_core::{DbError, NativeError};
use tracing::{debug, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    Event, IdbCursorWithValue, IdbDatabase, IdbFactory, IdbOpenDbRequest, IdbRequest,
    IdbTransaction, IdbVersionChangeEvent,
};

use crate::convert;
use crate::engine::IdbUpgradeScope;
use crate::error::{js_error, request_error, transaction_error, NOT_AVAILABLE};

type Listener = Closure<dyn FnMut(Event)>;

/// Get the global IndexedDB factory.
pub fn idb_factory() -> Result<IdbFactory, DbError> {
    let global = js_sys::global();

    let idb: JsValue = js_sys::Reflect::get(&global, &"indexedDB".into())
        .map_err(|_| DbError::NotAvailable(NOT_AVAILABLE.into()))?;

    if idb.is_undefined() || idb.is_null() {
        return Err(DbError::NotAvailable(NOT_AVAILABLE.into()));
    }

    idb.dyn_into::<IdbFactory>()
        .map_err(|_| DbError::NotAvailable(NOT_AVAILABLE.into()))
}

/// Success/error listeners of one request.
struct RequestListeners {
    request: IdbRequest,
    _on_success: Listener,
    _on_error: Listener,
}

impl Drop for RequestListeners {
    fn drop(&mut self) {
        self.request.set_onsuccess(None);
        self.request.set_onerror(None);
    }
}

impl RequestListeners {
    fn attach(request: &IdbRequest, on_success: Listener, on_error: Listener) -> Self {
        request.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
        request.set_onerror(Some(on_error.as_ref().unchecked_ref()));
        Self {
            request: request.clone(),
            _on_success: on_success,
            _on_error: on_error,
        }
    }
}

/// Resolve with the request's result, or fail with its error.
pub fn settle_request(request: &IdbRequest) -> Settle<JsValue> {
    let (settler, settle) = bridge::pending();

    let on_success = {
        let settler = settler.clone();
        let request = request.clone();
        Closure::wrap(Box::new(move |_event: Event| {
            settler.settle(request.result().map_err(js_error));
        }) as Box<dyn FnMut(Event)>)
    };

    let on_error = {
        let request = request.clone();
        Closure::wrap(Box::new(move |_event: Event| {
            settler.fail(request_error(&request));
        }) as Box<dyn FnMut(Event)>)
    };

    settle.guarded(RequestListeners::attach(request, on_success, on_error))
}

/// Complete/error/abort listeners of one transaction.
struct TransactionListeners {
    tx: IdbTransaction,
    _on_complete: Listener,
    _on_error: Listener,
    _on_abort: Listener,
}

impl Drop for TransactionListeners {
    fn drop(&mut self) {
        self.tx.set_oncomplete(None);
        self.tx.set_onerror(None);
        self.tx.set_onabort(None);
    }
}

/// Resolve when the transaction commits, fail when it errors or aborts.
pub fn settle_transaction(tx: &IdbTransaction) -> Settle<()> {
    let (settler, settle) = bridge::pending();

    let on_complete = {
        let settler = settler.clone();
        Closure::wrap(Box::new(move |_event: Event| {
            settler.succeed(());
        }) as Box<dyn FnMut(Event)>)
    };

    // Request errors bubble here before the transaction records its error
    let on_error = {
        let settler = settler.clone();
        let tx = tx.clone();
        Closure::wrap(Box::new(move |event: Event| {
            let err = event
                .target()
                .and_then(|target| target.dyn_into::<IdbRequest>().ok())
                .map(|request| request_error(&request))
                .unwrap_or_else(|| transaction_error(&tx));
            settler.fail(err);
        }) as Box<dyn FnMut(Event)>)
    };

    let on_abort = {
        let tx = tx.clone();
        Closure::wrap(Box::new(move |_event: Event| {
            settler.fail(transaction_error(&tx));
        }) as Box<dyn FnMut(Event)>)
    };

    tx.set_oncomplete(Some(on_complete.as_ref().unchecked_ref()));
    tx.set_onerror(Some(on_error.as_ref().unchecked_ref()));
    tx.set_onabort(Some(on_abort.as_ref().unchecked_ref()));

    settle.guarded(TransactionListeners {
        tx: tx.clone(),
        _on_complete: on_complete,
        _on_error: on_error,
        _on_abort: on_abort,
    })
}

/// Stream the records of an `openCursor` request as JSON.
pub fn cursor_values(request: &IdbRequest) -> Cursor {
    cursor_with(request, |value| {
        convert::from_js(&value).map_err(NativeError::from)
    })
}

/// Stream the records of an `openCursor` request, decoding each with
/// `decode`.
///
/// The cursor is advanced from inside the success listener so the
/// transaction stays active however slowly the stream is consumed.
pub fn cursor_with<T, F>(request: &IdbRequest, decode: F) -> Cursor<T>
where
    T: 'static,
    F: Fn(JsValue) -> Result<T, NativeError> + 'static,
{
    let (sink, cursor) = bridge::cursor();

    let on_success = {
        let sink = sink.clone();
        let request = request.clone();
        Closure::wrap(Box::new(move |_event: Event| {
            let result = match request.result() {
                Ok(result) => result,
                Err(thrown) => return sink.fail(js_error(thrown)),
            };
            if result.is_null() || result.is_undefined() {
                return sink.finish();
            }
            let cursor: IdbCursorWithValue = result.unchecked_into();
            let record = match cursor.value() {
                Ok(value) => decode(value),
                Err(thrown) => return sink.fail(js_error(thrown)),
            };
            match record {
                Ok(record) => sink.push(record),
                Err(err) => return sink.fail(err),
            }
            if let Err(thrown) = cursor.continue_() {
                sink.fail(js_error(thrown));
            }
        }) as Box<dyn FnMut(Event)>)
    };

    let on_error = {
        let request = request.clone();
        Closure::wrap(Box::new(move |_event: Event| {
            sink.fail(request_error(&request));
        }) as Box<dyn FnMut(Event)>)
    };

    cursor.guarded(RequestListeners::attach(request, on_success, on_error))
}

/// Upgrade/blocked listeners of an open request.
struct OpenListeners {
    request: IdbOpenDbRequest,
    _on_upgrade: Closure<dyn FnMut(IdbVersionChangeEvent)>,
    _on_blocked: Listener,
}

impl Drop for OpenListeners {
    fn drop(&mut self) {
        self.request.set_onupgradeneeded(None);
        self.request.set_onblocked(None);
    }
}

/// Open `name`, running `upgrade` inside the version change if one happens.
///
/// A failing upgrade aborts the version change, so the open request fails
/// with `AbortError` and the database keeps its previous schema.
pub fn open_database(
    name: &str,
    version: Option<u32>,
    upgrade: UpgradeHook,
) -> Result<Settle<JsValue>, DbError> {
    let factory = idb_factory()?;

    let request = match version {
        Some(version) => factory.open_with_u32(name, version),
        None => factory.open(name),
    }
    .map_err(js_error)?;

    let mut upgrade = Some(upgrade);
    let on_upgrade = Closure::wrap(Box::new(move |event: IdbVersionChangeEvent| {
        let Some(upgrade) = upgrade.take() else {
            return;
        };
        let Some(request) = event
            .target()
            .and_then(|target| target.dyn_into::<IdbOpenDbRequest>().ok())
        else {
            return;
        };
        let (Ok(db), Some(tx)) = (request.result(), request.transaction()) else {
            return;
        };

        let old_version = event.old_version() as u32;
        let scope = IdbUpgradeScope::new(into_database(db), tx.clone(), old_version);
        if let Err(err) = upgrade(&scope) {
            warn!("{} upgrade failed, aborting version change: {}", prefix::DB, err);
            let _ = tx.abort();
        }
    }) as Box<dyn FnMut(IdbVersionChangeEvent)>);

    let on_blocked = {
        let name = name.to_string();
        Closure::wrap(Box::new(move |_event: Event| {
            warn!("{} open of {} blocked by another connection", prefix::DB, name);
        }) as Box<dyn FnMut(Event)>)
    };

    request.set_onupgradeneeded(Some(on_upgrade.as_ref().unchecked_ref()));
    request.set_onblocked(Some(on_blocked.as_ref().unchecked_ref()));

    debug!("{} opening {} (version {:?})", prefix::DB, name, version);
    Ok(settle_request(&request).guarded(OpenListeners {
        request,
        _on_upgrade: on_upgrade,
        _on_blocked: on_blocked,
    }))
}

/// Closes a connection as soon as another connection asks for a version
/// change, so the other open is not blocked. Cleared on drop.
pub(crate) struct VersionChangeListener {
    db: IdbDatabase,
    _on_version_change: Listener,
}

impl VersionChangeListener {
    pub(crate) fn attach(db: &IdbDatabase) -> Self {
        let on_version_change = {
            let db = db.clone();
            Closure::wrap(Box::new(move |_event: Event| {
                debug!(
                    "{} {} v{} closing for a version change",
                    prefix::DB,
                    db.name(),
                    db.version()
                );
                db.close();
            }) as Box<dyn FnMut(Event)>)
        };
        db.set_onversionchange(Some(on_version_change.as_ref().unchecked_ref()));
        Self {
            db: db.clone(),
            _on_version_change: on_version_change,
        }
    }
}

impl Drop for VersionChangeListener {
    fn drop(&mut self) {
        self.db.set_onversionchange(None);
    }
}

/// Delete an IndexedDB database by name.
pub fn delete_database(name: &str) -> Result<Settle<JsValue>, DbError> {
    let factory = idb_factory()?;
    let request = factory.delete_database(name).map_err(js_error)?;
    Ok(settle_request(&request))
}

/// Cast an open request's result.
pub fn into_database(value: JsValue) -> IdbDatabase {
    value.unchecked_into()
}
