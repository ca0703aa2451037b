//! JSON-RPC 2.0 envelopes exchanged with the worker.
//!
//! Only the envelope shapes live here. Serialization is serde_json's and
//! framing is plain HTTP, handled by the client and server crates.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::errors::{RemoteCallError, RemoteException};

pub const JSONRPC_VERSION: &str = "2.0";

/// Error code used by workers for exceptions raised by handler code.
pub const SERVER_ERROR: i64 = -32000;

/// Error code for calls to a method the worker does not know.
pub const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    /// Builds an error object carrying a structured exception in `data`.
    pub fn from_exception(exception: &RemoteException) -> Self {
        Self {
            code: SERVER_ERROR,
            message: exception.to_string(),
            data: serde_json::to_value(exception).ok(),
        }
    }

    /// Recovers the worker exception, falling back to the bare message when
    /// `data` is absent or not an exception record.
    pub fn into_exception(self) -> RemoteException {
        self.data
            .and_then(|data| serde_json::from_value::<RemoteException>(data).ok())
            .unwrap_or_else(|| RemoteException::new("RpcError", self.message))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

/// `"result": null` is a present result, not a missing one.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl RpcResponse {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<u64>, error: RpcErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Converts the envelope into the call outcome.
    ///
    /// A response carrying neither `result` nor `error` is malformed.
    pub fn into_result(self) -> Result<Value, RemoteCallError> {
        if let Some(error) = self.error {
            return Err(RemoteCallError::Remote(error.into_exception()));
        }
        self.result
            .ok_or_else(|| RemoteCallError::Malformed("response has neither result nor error".into()))
    }
}
