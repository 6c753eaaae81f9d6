use crate::rpc::error::RpcError;
use crate::rpc::types::{ErrorObject, Id, Message, Notification, Request, Response, JSONRPC_VERSION};
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
struct ResponseWire<'a> {
    jsonrpc: &'a str,
    id: &'a Id,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ErrorObject>,
}

/// Serialize a message into its JSON-RPC 2.0 envelope (payload only, no framing).
pub fn encode_message(message: &Message) -> Result<Vec<u8>, RpcError> {
    let bytes = match message {
        Message::Call(request) => serde_json::to_vec(request)?,
        Message::Notification(notification) => serde_json::to_vec(notification)?,
        Message::Response(response) => {
            let (result, error) = match &response.outcome {
                Ok(result) => (Some(result), None),
                Err(error) => (None, Some(error)),
            };
            serde_json::to_vec(&ResponseWire {
                jsonrpc: &response.jsonrpc,
                id: &response.id,
                result,
                error,
            })?
        }
    };
    Ok(bytes)
}

fn decode_error(err: serde_json::Error) -> RpcError {
    RpcError::Decode(err.to_string())
}

/// Classify a message carrying `method`: a call when it also has an `id`,
/// a notification otherwise.
pub fn parse_call_or_notification(json: &Value) -> Result<Option<Message>, RpcError> {
    if json.get("method").is_none() {
        return Ok(None);
    }
    if json.get("id").is_some() {
        let request: Request = serde_json::from_value(json.clone()).map_err(decode_error)?;
        return Ok(Some(Message::Call(request)));
    }
    let notification: Notification = serde_json::from_value(json.clone()).map_err(decode_error)?;
    Ok(Some(Message::Notification(notification)))
}

/// Parse an `id`-without-`method` message. Exactly one of `result` / `error`
/// must be present; `"result": null` counts as present.
pub fn parse_response(json: &Value) -> Result<Option<Message>, RpcError> {
    let Some(id) = json.get("id") else {
        return Ok(None);
    };
    let id: Id = serde_json::from_value(id.clone()).map_err(decode_error)?;

    let outcome = match (json.get("result"), json.get("error")) {
        (Some(result), None) => Ok(result.clone()),
        (None, Some(error)) => {
            Err(serde_json::from_value::<ErrorObject>(error.clone()).map_err(decode_error)?)
        }
        (Some(_), Some(_)) => {
            return Err(RpcError::Decode(format!(
                "response {} carries both result and error",
                id
            )))
        }
        (None, None) => {
            return Err(RpcError::Decode(format!(
                "response {} carries neither result nor error",
                id
            )))
        }
    };

    Ok(Some(Message::Response(Response {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id,
        outcome,
    })))
}

/// Parse a full JSON payload (bytes) into a `Message` (Call/Notification/Response).
pub fn parse_message_from_slice(s: &[u8]) -> Result<Message, RpcError> {
    let json: Value = serde_json::from_slice(s)
        .map_err(|e| RpcError::Decode(format!("malformed JSON: {}", e)))?;
    if !json.is_object() {
        return Err(RpcError::Decode("message is not a JSON object".to_string()));
    }
    match json.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => {}
        Some(other) => {
            return Err(RpcError::Decode(format!(
                "unsupported jsonrpc version {:?}",
                other
            )))
        }
        None => return Err(RpcError::Decode("missing jsonrpc version tag".to_string())),
    }

    if let Some(message) = parse_call_or_notification(&json)? {
        return Ok(message);
    }
    if let Some(message) = parse_response(&json)? {
        return Ok(message);
    }
    Err(RpcError::Decode(
        "message has neither method nor id".to_string(),
    ))
}
