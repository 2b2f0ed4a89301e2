//! Middleware for the conference coordinator HTTP API.
//!
//! # Components
//!
//! - `caller` - Resolves the calling user from the `X-User-Id` header
//! - `http_metrics` - HTTP request metrics for every response

pub mod caller;
pub mod http_metrics;

pub use caller::{caller_from_headers, require_caller, CALLER_HEADER};
pub use http_metrics::http_metrics_middleware;
