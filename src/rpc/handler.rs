use crate::rpc::types::ErrorObject;
use async_trait::async_trait;
use serde_json::Value;

/// Services calls and notifications arriving from the peer.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle_call(&self, method: &str, params: Option<Value>) -> Result<Value, ErrorObject>;

    async fn handle_notification(&self, _method: &str, _params: Option<Value>) {}
}

/// Rejects every inbound call with `METHOD_NOT_FOUND`.
pub struct NullHandler;

#[async_trait]
impl Handler for NullHandler {
    async fn handle_call(&self, method: &str, _params: Option<Value>) -> Result<Value, ErrorObject> {
        Err(ErrorObject::method_not_found(method))
    }
}

/// Answers `echo` with its first positional parameter.
pub struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn handle_call(&self, method: &str, params: Option<Value>) -> Result<Value, ErrorObject> {
        if method != "echo" {
            return Err(ErrorObject::method_not_found(method));
        }
        Ok(match params {
            Some(Value::Array(mut items)) if !items.is_empty() => items.swap_remove(0),
            Some(Value::Array(_)) | None => Value::Null,
            Some(other) => other,
        })
    }
}
