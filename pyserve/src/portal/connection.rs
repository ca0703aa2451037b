//! Connection establishment.
//!
//! Polls the worker's liveness method until it answers `true`, the worker
//! dies, or the time budget runs out.

use std::time::Duration;

use pyserve_shared::constants::{methods, timing};
use pyserve_shared::{Endpoint, ServiceError, ServiceResult};
use serde_json::Value;
use tokio::time::Instant;

use super::client::{RpcClient, RpcConnector};
use crate::controller::WorkerProcess;

/// Timing of the readiness loop.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl ConnectOptions {
    pub fn with_timeout_ms(timeout_ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
            ..Self::default()
        }
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(timing::DEFAULT_CONNECT_TIMEOUT_MS),
            poll_interval: Duration::from_millis(timing::POLL_INTERVAL_MS),
        }
    }
}

/// Connect to `endpoint` and wait until the worker reports itself ready.
///
/// When `process` is given, the loop gives up with `WorkerNotRunning` as
/// soon as the process is seen to have exited. Otherwise it ends with
/// `ConnectTimeout` once `options.timeout` has elapsed; the last sleep is
/// clamped so the failure lands within one poll interval of the deadline.
pub async fn establish(
    connector: &dyn RpcConnector,
    endpoint: &Endpoint,
    options: &ConnectOptions,
    process: Option<&WorkerProcess>,
) -> ServiceResult<Box<dyn RpcClient>> {
    let start = Instant::now();
    let deadline = start + options.timeout;
    let mut attempts: u32 = 0;

    tracing::debug!(
        endpoint = %endpoint,
        timeout_ms = options.timeout.as_millis() as u64,
        "Waiting for worker to become ready"
    );

    loop {
        check_alive(process)?;
        attempts += 1;

        // An attempt may use the rest of the budget, but always gets at
        // least one poll interval so a zero timeout still tries once.
        let attempt_budget = deadline
            .saturating_duration_since(Instant::now())
            .max(options.poll_interval);

        match tokio::time::timeout(attempt_budget, probe(connector, endpoint)).await {
            Ok(Ok(client)) => {
                tracing::info!(
                    endpoint = %endpoint,
                    attempts,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Worker is ready"
                );
                return Ok(client);
            }
            Ok(Err(reason)) => {
                tracing::trace!(attempt = attempts, "Worker not ready: {}", reason);
            }
            Err(_) => {
                tracing::trace!(attempt = attempts, "Liveness probe timed out");
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        tokio::time::sleep(remaining.min(options.poll_interval)).await;
    }

    check_alive(process)?;

    tracing::warn!(
        endpoint = %endpoint,
        attempts,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Worker did not become ready in time"
    );
    Err(ServiceError::ConnectTimeout {
        port: endpoint.port,
        timeout_ms: options.timeout.as_millis() as u64,
    })
}

fn check_alive(process: Option<&WorkerProcess>) -> ServiceResult<()> {
    match process {
        Some(process) if !process.is_running() => {
            let status = process.exit_code();
            tracing::warn!(pid = process.pid(), status = ?status, "Worker exited before becoming ready");
            Err(ServiceError::WorkerNotRunning { status })
        }
        _ => Ok(()),
    }
}

/// One connect + liveness round trip.
async fn probe(connector: &dyn RpcConnector, endpoint: &Endpoint) -> Result<Box<dyn RpcClient>, String> {
    let client = connector.connect(endpoint).await.map_err(|e| e.to_string())?;
    let answer = client
        .request(
            methods::IS_ACTIVE,
            vec![Value::from(methods::LIVENESS_PLACEHOLDER)],
        )
        .await
        .map_err(|e| e.to_string())?;

    if answer == Value::Bool(true) {
        Ok(client)
    } else {
        Err(format!("liveness method returned {}", answer))
    }
}
