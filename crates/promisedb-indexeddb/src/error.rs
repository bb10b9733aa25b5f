//! Mapping browser exceptions onto engine errors

use promisedb_core::{ErrorKind, NativeError};
use thiserror::Error;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{DomException, IdbRequest, IdbTransaction};

/// Rejection text when the host has no `indexedDB` global.
pub const NOT_AVAILABLE: &str = "IndexedDB is not available in this environment";

/// Failure converting records between JSON and JS values
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JS conversion error: {0}")]
    JsValue(String),
}

impl From<ConvertError> for NativeError {
    fn from(err: ConvertError) -> Self {
        NativeError::new(ErrorKind::DataClone, err.to_string())
    }
}

pub fn dom_error(err: &DomException) -> NativeError {
    NativeError::new(ErrorKind::from_name(&err.name()), err.message())
}

/// Convert a value thrown by a browser call.
pub fn js_error(value: JsValue) -> NativeError {
    if let Some(dom) = value.dyn_ref::<DomException>() {
        return dom_error(dom);
    }
    if let Some(err) = value.dyn_ref::<js_sys::Error>() {
        return NativeError::new(
            ErrorKind::from_name(&String::from(err.name())),
            String::from(err.message()),
        );
    }
    let message = value
        .as_string()
        .or_else(|| js_sys::JSON::stringify(&value).ok().and_then(|s| s.as_string()))
        .unwrap_or_else(|| format!("{:?}", value));
    NativeError::new(ErrorKind::Unknown, message)
}

/// The error carried by a failed request.
pub fn request_error(request: &IdbRequest) -> NativeError {
    match request.error() {
        Ok(Some(dom)) => dom_error(&dom),
        Ok(None) => NativeError::new(ErrorKind::Unknown, "request failed without an error"),
        Err(thrown) => js_error(thrown),
    }
}

/// The error carried by a failed or aborted transaction.
pub fn transaction_error(tx: &IdbTransaction) -> NativeError {
    match tx.error() {
        Some(dom) => dom_error(&dom),
        None => NativeError::new(ErrorKind::Abort, "transaction was aborted"),
    }
}
