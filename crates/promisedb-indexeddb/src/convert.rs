//! JSON <-> JS value conversion
//!
//! Records cross the boundary as JSON text, the same shape callers pass in.
//! `undefined` and `null` both come back as `Value::Null`.

use serde_json::Value;
use wasm_bindgen::JsValue;

use crate::error::ConvertError;

pub fn to_js(value: &Value) -> Result<JsValue, ConvertError> {
    let text = serde_json::to_string(value)?;
    js_sys::JSON::parse(&text).map_err(|e| ConvertError::JsValue(format!("{:?}", e)))
}

pub fn from_js(value: &JsValue) -> Result<Value, ConvertError> {
    if value.is_undefined() || value.is_null() {
        return Ok(Value::Null);
    }
    let text = js_sys::JSON::stringify(value)
        .map_err(|e| ConvertError::JsValue(format!("{:?}", e)))?;
    match text.as_string() {
        Some(text) => Ok(serde_json::from_str(&text)?),
        // Functions and symbols stringify to undefined
        None => Ok(Value::Null),
    }
}
