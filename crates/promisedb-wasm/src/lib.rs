//! promisedb WASM bridge
//!
//! Exposes the adapter to JavaScript through wasm-bindgen. The `PromiseDB`
//! class wraps a `PromiseDb<IdbEngine>`; its tables hand records across the
//! boundary as plain objects and answer with `Promise`s.
//!
//! ```js
//! import init, { PromiseDB } from "promisedb-wasm";
//!
//! await init();
//! const db = PromiseDB.getInstance("PromiseDB");
//! const logs = db.table("testTable", ["id", "log", "size", "expires"]);
//! await logs.add({ id: "1", log: "test", size: 110, expires: 111 });
//! const record = await logs.read("1");
//! ```

pub mod browser;

pub use browser::{to_js_error, JsPromiseDb, JsTable};
