//! Execution store port and its in-memory implementation.
//!
//! The engine is generic over [`execution::ExecutionStore`]; a durable
//! backend only has to implement that trait.

pub mod execution;
pub mod memory;

pub use execution::ExecutionStore;
pub use memory::InMemoryExecutionStore;
