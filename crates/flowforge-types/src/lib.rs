//! Shared domain types for flowforge.
//!
//! This crate contains the data model shared by the engine, the simulation
//! walker, the validator and the adapters: workflow definitions, execution
//! and simulation records, validation issues, engine events and configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod simulation;
pub mod validation;
pub mod workflow;

/// String-keyed JSON object used for step configs, inputs, outputs and the
/// variable context.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;
