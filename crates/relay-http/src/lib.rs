//! Proxied call execution for relay RPC sessions.
//!
//! Defines the call request/outcome model, the [`CallExecutor`] seam the RPC
//! engine dispatches `call` operations through, and the reqwest-backed
//! [`HttpCallExecutor`] with retry/backoff, whole-call timeouts, and prompt
//! cooperative cancellation.

pub mod http_executor;
pub mod retry;
pub mod types;

pub use http_executor::*;
pub use types::*;
