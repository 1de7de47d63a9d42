//! HTTP middleware shared by every route
//!
//! The auth gate and silent refresh live in [`crate::auth`]; this module
//! holds the cross-cutting layers.
//!
//! Author: hephaex@gmail.com

pub mod metrics;
pub mod security_headers;

pub use metrics::metrics_middleware;
pub use security_headers::security_headers_middleware;
