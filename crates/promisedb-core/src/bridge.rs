//! Event-to-future bridge
//!
//! Storage engines report outcomes through success/error callbacks. A
//! [`Settler`] is handed to those callbacks and the matching [`Settle`]
//! future resolves with whichever outcome fires first. Cursor scans fire
//! success repeatedly, so they use a [`CursorSink`]/[`Cursor`] pair instead.
//!
//! Both futures can carry guards (event listener registrations) that are
//! dropped with the future, so listeners live exactly as long as someone is
//! waiting on them.

use std::any::Any;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::channel::{mpsc, oneshot};
use futures::{FutureExt, Stream, StreamExt};
use serde_json::Value;

use crate::error::{ErrorKind, NativeError};

type Outcome<T> = std::result::Result<T, NativeError>;

/// Create a connected settler/future pair.
pub fn pending<T>() -> (Settler<T>, Settle<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Settler {
            tx: Rc::new(RefCell::new(Some(tx))),
        },
        Settle {
            rx,
            guards: Vec::new(),
        },
    )
}

/// Completing half, cloned into each event callback. First outcome wins.
pub struct Settler<T> {
    tx: Rc<RefCell<Option<oneshot::Sender<Outcome<T>>>>>,
}

impl<T> Clone for Settler<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> Settler<T> {
    /// Deliver a success. Returns `false` if already settled.
    pub fn succeed(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Deliver a failure. Returns `false` if already settled.
    pub fn fail(&self, err: NativeError) -> bool {
        self.settle(Err(err))
    }

    pub fn settle(&self, outcome: Outcome<T>) -> bool {
        match self.tx.borrow_mut().take() {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.tx.borrow().is_none()
    }
}

/// Future side of [`pending`].
pub struct Settle<T> {
    rx: oneshot::Receiver<Outcome<T>>,
    guards: Vec<Box<dyn Any>>,
}

impl<T> Settle<T> {
    /// Keep `guard` alive until this future is dropped.
    pub fn guarded(mut self, guard: impl Any) -> Self {
        self.guards.push(Box::new(guard));
        self
    }
}

impl<T> Future for Settle<T> {
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.rx.poll_unpin(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(NativeError::new(
                    ErrorKind::Abort,
                    "request was dropped before it settled",
                ))
            })
        })
    }
}

/// Create a connected sink/cursor pair for a scan.
pub fn cursor<T>() -> (CursorSink<T>, Cursor<T>) {
    let (tx, rx) = mpsc::unbounded();
    (
        CursorSink { tx },
        Cursor {
            rx,
            guards: Vec::new(),
        },
    )
}

/// Producing half of a scan, fed from the engine's cursor events.
pub struct CursorSink<T = Value> {
    tx: mpsc::UnboundedSender<Outcome<T>>,
}

impl<T> Clone for CursorSink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> CursorSink<T> {
    /// Emit one record.
    pub fn push(&self, record: T) {
        let _ = self.tx.unbounded_send(Ok(record));
    }

    /// Emit an error and end the scan.
    pub fn fail(&self, err: NativeError) {
        let _ = self.tx.unbounded_send(Err(err));
        self.tx.close_channel();
    }

    /// End the scan.
    pub fn finish(&self) {
        self.tx.close_channel();
    }

    pub fn is_finished(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Stream of records in cursor order. Ends when the cursor is exhausted.
pub struct Cursor<T = Value> {
    rx: mpsc::UnboundedReceiver<Outcome<T>>,
    guards: Vec<Box<dyn Any>>,
}

impl<T> Cursor<T> {
    /// Keep `guard` alive until this cursor is dropped.
    pub fn guarded(mut self, guard: impl Any) -> Self {
        self.guards.push(Box::new(guard));
        self
    }
}

impl<T> Stream for Cursor<T> {
    type Item = Outcome<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use serde_json::json;

    #[test]
    fn test_first_outcome_wins() {
        let (settler, settle) = pending::<u32>();
        let on_success = settler.clone();
        let on_error = settler;

        assert!(on_success.succeed(7));
        assert!(!on_error.fail(NativeError::new(ErrorKind::Unknown, "late")));
        assert!(on_error.is_settled());

        assert_eq!(block_on(settle), Ok(7));
    }

    #[test]
    fn test_failure_is_verbatim() {
        let (settler, settle) = pending::<()>();
        let err = NativeError::new(ErrorKind::Constraint, "duplicate");
        settler.fail(err.clone());
        assert_eq!(block_on(settle), Err(err));
    }

    #[test]
    fn test_dropped_settler_aborts() {
        let (settler, settle) = pending::<()>();
        drop(settler);
        let err = block_on(settle).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Abort);
    }

    #[test]
    fn test_guard_lives_with_future() {
        let marker = Rc::new(());
        let (settler, settle) = pending::<()>();
        let settle = settle.guarded(marker.clone());
        assert_eq!(Rc::strong_count(&marker), 2);

        settler.succeed(());
        block_on(settle).unwrap();
        assert_eq!(Rc::strong_count(&marker), 1);
    }

    #[test]
    fn test_cursor_stream() {
        let (sink, cursor) = cursor::<Value>();
        sink.push(json!({"id": 1}));
        sink.push(json!({"id": 2}));
        sink.finish();
        sink.push(json!({"id": 3}));
        assert!(sink.is_finished());

        let records: Vec<_> = block_on(cursor.collect::<Vec<_>>());
        assert_eq!(records, vec![Ok(json!({"id": 1})), Ok(json!({"id": 2}))]);
    }

    #[test]
    fn test_cursor_error_ends_stream() {
        let (sink, cursor) = cursor::<Value>();
        sink.push(json!(1));
        sink.fail(NativeError::new(ErrorKind::Data, "bad"));
        sink.push(json!(2));

        let records: Vec<_> = block_on(cursor.collect::<Vec<_>>());
        assert_eq!(records.len(), 2);
        assert!(records[1].is_err());
    }
}
