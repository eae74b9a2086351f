//! Runtime configuration for relay call execution.
//!
//! Loads the JSON runtime profile (base URL, default headers, auth, retry and
//! body limits), indexes OpenAPI operations by `operationId`, and memoizes both
//! behind [`RuntimeCache`] so a long-lived RPC session can drop them on demand
//! and observe edits made outside the session.

pub mod openapi_index;
pub mod runtime_cache;
pub mod runtime_profile;

pub use openapi_index::*;
pub use runtime_cache::*;
pub use runtime_profile::*;
