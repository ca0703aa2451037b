//! Host-side portal for calling into the worker over JSON-RPC.

pub mod client;
pub mod connection;

pub use client::{JsonRpcClient, JsonRpcConnector, RpcClient, RpcConnector};
pub use connection::{ConnectOptions, establish};
