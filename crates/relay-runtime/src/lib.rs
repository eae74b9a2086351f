//! Concurrent NDJSON RPC session engine for relay.
//!
//! Hosts the session orchestrator (ingestor, bounded work queue, worker pool,
//! response writer), the cancellation registry, the closed operation registry,
//! and the capability payload advertised through `hello`.

pub mod rpc_capabilities_runtime;
pub mod rpc_session_runtime;

pub use rpc_capabilities_runtime::*;
pub use rpc_session_runtime::*;
