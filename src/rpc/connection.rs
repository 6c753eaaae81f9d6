//! JSON-RPC connection over a framed transport.
//!
//! A `Connection` owns both halves of one transport. A single background task
//! reads frames for the connection's whole lifetime and routes them: responses
//! go to the caller waiting on the matching correlation ID, inbound calls and
//! notifications go to the [`Handler`]. Outbound writes from any number of
//! tasks are serialized behind an async mutex so frames never interleave.
//!
//! When the stream ends, hits a framing error, or the owning shutdown token is
//! cancelled, every call still waiting is failed with
//! [`RpcError::ConnectionClosed`] and later calls fail the same way.

use crate::rpc::error::{FramingError, RpcError};
use crate::rpc::handler::{Handler, NullHandler};
use crate::rpc::message_parser::{encode_message, parse_message_from_slice};
use crate::rpc::pending::PendingCalls;
use crate::rpc::transport::{MessageReader, MessageWriter};
use crate::rpc::types::{Id, Message, Notification, Request, Response, JSONRPC_VERSION};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The pending map holds no invariants spanning a panic, so a poisoned lock
/// is still safe to use.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn to_params<P: Serialize>(params: P) -> Result<Option<Value>, RpcError> {
    match serde_json::to_value(params)? {
        Value::Null => Ok(None),
        value => Ok(Some(value)),
    }
}

/// Cheap to clone; all clones share the same transport and pending map.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    writer: tokio::sync::Mutex<Box<dyn MessageWriter>>,
    pending: Mutex<PendingCalls>,
    next_id: AtomicI64,
    /// Cancelled to ask the read loop to stop.
    shutdown: CancellationToken,
    /// Cancelled by the read loop once teardown has finished.
    closed: CancellationToken,
}

impl Inner {
    async fn send(&self, message: &Message) -> Result<(), RpcError> {
        let body = encode_message(message)?;
        let mut writer = self.writer.lock().await;
        writer.write(&body).await?;
        Ok(())
    }

    fn deliver(&self, response: Response) {
        let id = response.id;
        let result = response.outcome.map_err(RpcError::from);
        if !lock_ignore_poison(&self.pending).complete(&id, result) {
            debug!(%id, "dropping response with no pending call");
        }
    }

    fn teardown(&self) {
        let failed = lock_ignore_poison(&self.pending).close_all();
        self.closed.cancel();
        debug!(failed, "connection closed");
    }
}

/// Retires a call's slot however the call ends: response, error,
/// cancellation, timeout, or the future being dropped. Removing an already
/// fulfilled slot is a no-op.
struct SlotGuard<'a> {
    inner: &'a Inner,
    id: Id,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        lock_ignore_poison(&self.inner.pending).remove(&self.id);
    }
}

impl Connection {
    /// Open a connection that rejects inbound calls and numbers its own calls from 0.
    pub fn new<R, W>(reader: R, writer: W, shutdown: &CancellationToken) -> Self
    where
        R: MessageReader + 'static,
        W: MessageWriter + 'static,
    {
        Self::with_handler(reader, writer, Arc::new(NullHandler), 0, shutdown)
    }

    /// Open a connection and spawn its read loop. Must be called from within a
    /// tokio runtime. Outbound correlation IDs start at `first_id` and only
    /// ever increase, so an ID is never reused on this connection.
    pub fn with_handler<R, W>(
        reader: R,
        writer: W,
        handler: Arc<dyn Handler>,
        first_id: i64,
        shutdown: &CancellationToken,
    ) -> Self
    where
        R: MessageReader + 'static,
        W: MessageWriter + 'static,
    {
        let reader: Box<dyn MessageReader> = Box::new(reader);
        let writer: Box<dyn MessageWriter> = Box::new(writer);
        let inner = Arc::new(Inner {
            writer: tokio::sync::Mutex::new(writer),
            pending: Mutex::new(PendingCalls::new()),
            next_id: AtomicI64::new(first_id),
            shutdown: shutdown.child_token(),
            closed: CancellationToken::new(),
        });
        tokio::spawn(read_loop(inner.clone(), reader, handler));
        Connection { inner }
    }

    /// Send a call and wait for its response.
    ///
    /// Cancelling `cancel` returns [`RpcError::Cancelled`] right away. A write
    /// that has already started still runs to completion on its own task so
    /// the stream never carries half a frame; any response that shows up
    /// later for this ID is dropped.
    pub async fn call<P: Serialize>(
        &self,
        cancel: &CancellationToken,
        method: &str,
        params: P,
    ) -> Result<Value, RpcError> {
        if cancel.is_cancelled() {
            return Err(RpcError::Cancelled);
        }
        let params = to_params(params)?;
        let id = Id::Number(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut rx = lock_ignore_poison(&self.inner.pending).register(id.clone())?;
        let _slot = SlotGuard {
            inner: &self.inner,
            id: id.clone(),
        };
        debug!(%id, method, "sending call");

        let request = Message::Call(Request::new(id, method, params));
        let inner = self.inner.clone();
        let mut write = tokio::spawn(async move { inner.send(&request).await });

        // The slot can be fulfilled before the write finishes: by teardown
        // while the pipe is full, or by a peer that answers early.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RpcError::Cancelled),
            result = &mut rx => return result.unwrap_or(Err(RpcError::ConnectionClosed)),
            written = &mut write => written.unwrap_or(Err(RpcError::ConnectionClosed))?,
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RpcError::Cancelled),
            result = rx => result.unwrap_or(Err(RpcError::ConnectionClosed)),
        }
    }

    /// Like [`call`](Self::call), failing with [`RpcError::Timeout`] if no
    /// response arrives within `timeout`.
    pub async fn call_with_timeout<P: Serialize>(
        &self,
        cancel: &CancellationToken,
        method: &str,
        params: P,
        timeout: Option<Duration>,
    ) -> Result<Value, RpcError> {
        match timeout {
            Some(dur) => tokio::time::timeout(dur, self.call(cancel, method, params))
                .await
                .unwrap_or(Err(RpcError::Timeout(dur))),
            None => self.call(cancel, method, params).await,
        }
    }

    /// Send a notification. Nothing is awaited beyond the write itself.
    ///
    /// A notification racing teardown may still be written and return `Ok`.
    /// One whose write is still blocked when teardown finishes returns
    /// [`RpcError::ConnectionClosed`].
    pub async fn notify<P: Serialize>(
        &self,
        cancel: &CancellationToken,
        method: &str,
        params: P,
    ) -> Result<(), RpcError> {
        if self.is_closed() {
            return Err(RpcError::ConnectionClosed);
        }
        if cancel.is_cancelled() {
            return Err(RpcError::Cancelled);
        }
        let message = Message::Notification(Notification::new(method, to_params(params)?));
        let inner = self.inner.clone();
        let write = tokio::spawn(async move { inner.send(&message).await });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RpcError::Cancelled),
            _ = self.inner.closed.cancelled() => Err(RpcError::ConnectionClosed),
            written = write => written.unwrap_or(Err(RpcError::ConnectionClosed)),
        }
    }

    /// Ask the read loop to stop. Pending calls fail with `ConnectionClosed`.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
    }

    /// Resolves once teardown has completed.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    pub fn pending_count(&self) -> usize {
        lock_ignore_poison(&self.inner.pending).len()
    }
}

async fn read_loop(
    inner: Arc<Inner>,
    mut reader: Box<dyn MessageReader>,
    handler: Arc<dyn Handler>,
) {
    loop {
        let frame = tokio::select! {
            _ = inner.shutdown.cancelled() => {
                debug!("connection shut down");
                break;
            }
            frame = reader.read() => frame,
        };

        let bytes = match frame {
            Ok(bytes) => bytes,
            Err(FramingError::Closed) => {
                debug!("peer closed the stream");
                break;
            }
            Err(err) => {
                warn!(error = %err, "framing error, closing connection");
                break;
            }
        };

        match parse_message_from_slice(&bytes) {
            Ok(Message::Response(response)) => inner.deliver(response),
            Ok(Message::Call(request)) => {
                let inner = inner.clone();
                let handler = handler.clone();
                tokio::spawn(async move { answer_call(&inner, handler.as_ref(), request).await });
            }
            Ok(Message::Notification(notification)) => {
                handler
                    .handle_notification(&notification.method, notification.params)
                    .await
            }
            Err(err) => warn!(error = %err, "dropping undecodable message"),
        }
    }

    inner.teardown();
}

async fn answer_call(inner: &Inner, handler: &dyn Handler, request: Request) {
    debug!(id = %request.id, method = %request.method, "handling inbound call");
    let outcome = handler.handle_call(&request.method, request.params).await;
    let response = Response {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id: request.id,
        outcome,
    };
    if let Err(err) = inner.send(&Message::Response(response)).await {
        warn!(error = %err, "failed to send response");
    }
}
