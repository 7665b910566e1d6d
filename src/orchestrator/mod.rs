pub mod report;
pub mod runner;
pub mod state;

pub use report::{RunReport, StepRecord};
pub use runner::Orchestrator;
pub use state::{RunState, StepOutcome};
