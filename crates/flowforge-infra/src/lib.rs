//! Infrastructure layer for flowforge.
//!
//! Contains the adapters that need real I/O and therefore stay out of
//! `flowforge-core`: the `reqwest` HTTP connector backend, the webhook
//! executor with HMAC-SHA256 signing, the TOML configuration loader and the
//! assembly of the standard executor registry.

pub mod config;
pub mod workflow;
