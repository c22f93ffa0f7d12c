mod orchestrator;
mod report;

pub use orchestrator::{Pipeline, PipelineSettings};
pub use report::CycleReport;
