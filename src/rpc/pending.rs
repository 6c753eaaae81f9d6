use crate::rpc::error::RpcError;
use crate::rpc::types::Id;
use std::collections::HashMap;
use tokio::sync::oneshot;

pub(crate) type CallResult = Result<serde_json::Value, RpcError>;

/// Tracks outbound calls waiting for a response.
///
/// Each slot is a oneshot sender keyed by correlation ID and is fulfilled at
/// most once: by the matching response, or by `close_all` at teardown.
pub(crate) struct PendingCalls {
    calls: HashMap<Id, oneshot::Sender<CallResult>>,
    closed: bool,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self {
            calls: HashMap::new(),
            closed: false,
        }
    }

    /// Register a slot for `id`. Fails once the connection has been torn down,
    /// so nothing can slip in after `close_all` drained the map.
    pub fn register(&mut self, id: Id) -> Result<oneshot::Receiver<CallResult>, RpcError> {
        if self.closed {
            return Err(RpcError::ConnectionClosed);
        }
        let (tx, rx) = oneshot::channel();
        self.calls.insert(id, tx);
        Ok(rx)
    }

    /// Fulfil and remove the slot for `id`. Returns false if no caller is waiting.
    pub fn complete(&mut self, id: &Id, result: CallResult) -> bool {
        match self.calls.remove(id) {
            Some(tx) => {
                // Receiver may already be gone if the caller was cancelled.
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Retire a slot without delivering anything.
    pub fn remove(&mut self, id: &Id) -> bool {
        self.calls.remove(id).is_some()
    }

    /// Fail every outstanding slot with `ConnectionClosed` and refuse new ones.
    pub fn close_all(&mut self) -> usize {
        self.closed = true;
        let drained = self.calls.len();
        for (_, tx) in self.calls.drain() {
            let _ = tx.send(Err(RpcError::ConnectionClosed));
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_and_complete() {
        let mut pending = PendingCalls::new();
        let rx = pending.register(Id::Number(1)).unwrap();
        assert_eq!(pending.len(), 1);

        assert!(pending.complete(&Id::Number(1), Ok(json!("pong"))));
        assert_eq!(pending.len(), 0);

        let received = rx.blocking_recv().unwrap().unwrap();
        assert_eq!(received, json!("pong"));
    }

    #[test]
    fn test_complete_unknown_id() {
        let mut pending = PendingCalls::new();
        let _rx = pending.register(Id::Number(1)).unwrap();
        assert!(!pending.complete(&Id::Number(2), Ok(json!(null))));
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut pending = PendingCalls::new();
        let _rx = pending.register(Id::from("a")).unwrap();
        assert!(pending.remove(&Id::from("a")));
        assert!(!pending.remove(&Id::from("a")));
        assert!(!pending.complete(&Id::from("a"), Ok(json!(1))));
    }

    #[test]
    fn test_close_all_fails_slots_and_refuses_new_ones() {
        let mut pending = PendingCalls::new();
        let rx1 = pending.register(Id::Number(1)).unwrap();
        let rx2 = pending.register(Id::Number(2)).unwrap();

        assert_eq!(pending.close_all(), 2);
        assert_eq!(pending.len(), 0);
        assert!(matches!(
            rx1.blocking_recv().unwrap(),
            Err(RpcError::ConnectionClosed)
        ));
        assert!(matches!(
            rx2.blocking_recv().unwrap(),
            Err(RpcError::ConnectionClosed)
        ));
        assert!(matches!(
            pending.register(Id::Number(3)),
            Err(RpcError::ConnectionClosed)
        ));
    }
}
