pub mod icons;
pub mod listing;
pub mod progress;

pub use listing::{print_dry_run, print_plan};
pub use progress::PipelineUI;
