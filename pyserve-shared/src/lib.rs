//! pyserve shared code - host and worker side
//!
//! This crate contains the error taxonomy, the remote-call wire types and
//! the constants used by both the host-side supervisor (pyserve) and the
//! worker implementations used in tests.

pub mod constants;
pub mod errors;
pub mod protocol;
pub mod transport;

pub use errors::{RemoteCallError, RemoteException, ServiceError, ServiceResult, TraceFrame};
pub use protocol::{RpcErrorObject, RpcRequest, RpcResponse};
pub use transport::Endpoint;
