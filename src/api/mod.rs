//! API module
//!
//! Middleware for the HTTP layer that calls into the ledger core. Routes
//! and request marshaling live with the embedding service.

pub mod middleware;

pub use middleware::{bearer_auth_middleware, logging_middleware, mask_headers_for_logging};
