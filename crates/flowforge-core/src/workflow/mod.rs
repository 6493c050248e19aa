//! Workflow definitions, the dependency graph, step executors and the
//! execution engine.

pub mod definition;
pub mod engine;
pub mod executors;
pub mod expression;
pub mod graph;
pub mod retry;
pub mod step_runner;
pub mod validator;
pub mod variables;

pub use engine::{EngineError, ExecutionEngine};
pub use graph::{GraphError, WorkflowGraph};
pub use step_runner::{ExecutorRegistry, StepContext, StepError, StepExecutor};
pub use validator::WorkflowValidator;
