//! Preview runs of workflows: the depth-first simulation walker and the
//! mock data it feeds into steps.

pub mod mock_data;
pub mod walker;

pub use mock_data::MockDataProvider;
pub use walker::{SimulationEngine, SimulationError};
