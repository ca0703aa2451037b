//! Remote-call client for the worker's JSON-RPC server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pyserve_shared::{Endpoint, RemoteCallError, RpcRequest, RpcResponse};
use serde_json::Value;

/// A connected remote-call channel to one worker.
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Invoke `method` with positional `args` and wait for its result.
    async fn request(&self, method: &str, args: Vec<Value>) -> Result<Value, RemoteCallError>;
}

/// Creates clients for an endpoint.
///
/// Connecting may or may not touch the network; readiness is only known
/// once a request succeeds.
#[async_trait]
pub trait RpcConnector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn RpcClient>, RemoteCallError>;
}

/// Connector for JSON-RPC 2.0 over HTTP POST.
#[derive(Debug, Clone, Default)]
pub struct JsonRpcConnector {
    request_timeout: Option<Duration>,
}

impl JsonRpcConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every request made by clients from this connector.
    ///
    /// Unbounded by default: scripts may legitimately run for a long time.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl RpcConnector for JsonRpcConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn RpcClient>, RemoteCallError> {
        let mut builder = reqwest::Client::builder().no_proxy();
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| RemoteCallError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Box::new(JsonRpcClient {
            http,
            url: endpoint.to_url(),
            next_id: AtomicU64::new(1),
        }))
    }
}

/// JSON-RPC 2.0 client posting to `http://<host>:<port>/`.
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

#[async_trait]
impl RpcClient for JsonRpcClient {
    async fn request(&self, method: &str, args: Vec<Value>) -> Result<Value, RemoteCallError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(id, method, args);
        tracing::trace!(id, method, url = %self.url, "Sending remote call");

        let resp = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RemoteCallError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| RemoteCallError::Transport(e.to_string()))?;

        // Workers answer errors with a JSON-RPC body even on 5xx
        let response: RpcResponse = match serde_json::from_slice(&body) {
            Ok(response) => response,
            Err(_) if !status.is_success() => {
                return Err(RemoteCallError::Transport(format!(
                    "worker returned HTTP {}",
                    status
                )));
            }
            Err(e) => {
                return Err(RemoteCallError::Malformed(format!(
                    "invalid JSON-RPC response: {}",
                    e
                )));
            }
        };

        if let Some(resp_id) = response.id
            && resp_id != id
        {
            return Err(RemoteCallError::Malformed(format!(
                "response id {} does not match request id {}",
                resp_id, id
            )));
        }

        response.into_result()
    }
}
