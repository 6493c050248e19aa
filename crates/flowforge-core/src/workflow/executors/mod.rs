//! Built-in step executors.
//!
//! Webhook steps and the HTTP connector backend need network and crypto
//! crates, so they are registered by `flowforge-infra` on top of
//! [`core_registry`].

pub mod condition;
pub mod connector;
pub mod delay;
pub mod fields;
pub mod transform;

use flowforge_types::workflow::StepKind;

pub use condition::ConditionExecutor;
pub use connector::{ConnectorBackend, ConnectorExecutor, ConnectorRegistry, StubBackend};
pub use delay::DelayExecutor;
pub use transform::TransformExecutor;

use super::step_runner::{ExecutorRegistry, MarkerExecutor};

/// Registry with every executor that needs no network access: start/end
/// markers, condition, transform, delay and connector (over `connectors`).
pub fn core_registry(connectors: ConnectorRegistry) -> ExecutorRegistry {
    ExecutorRegistry::new()
        .with(StepKind::Start.as_str(), MarkerExecutor)
        .with(StepKind::End.as_str(), MarkerExecutor)
        .with(StepKind::Condition.as_str(), ConditionExecutor)
        .with(StepKind::Transform.as_str(), TransformExecutor)
        .with(StepKind::Delay.as_str(), DelayExecutor)
        .with(StepKind::Connector.as_str(), ConnectorExecutor::new(connectors))
}
