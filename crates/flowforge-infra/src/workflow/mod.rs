//! Workflow adapters with network access.
//!
//! - `http` -- shared `reqwest` client construction and response decoding
//! - `http_connector` -- the `http` connector backend
//! - `webhook` -- outgoing/incoming webhook executor, HMAC-SHA256 signatures
//! - `registry` -- the standard executor registry used by the CLI

pub mod http;
pub mod http_connector;
pub mod registry;
pub mod webhook;

#[cfg(test)]
pub(crate) mod test_support;

pub use http_connector::HttpBackend;
pub use registry::standard_registry;
pub use webhook::{WebhookError, WebhookExecutor};
