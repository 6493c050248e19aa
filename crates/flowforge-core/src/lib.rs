//! Workflow execution engine for flowforge.
//!
//! This crate holds the engine itself and the "ports" its adapters implement:
//! the execution store trait, the step executor trait and the connector
//! backend trait. It depends only on `flowforge-types` -- never on
//! `flowforge-infra` or any network/crypto crate.

pub mod event;
pub mod repository;
pub mod simulation;
pub mod workflow;
