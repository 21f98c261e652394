//! The four-stage migration pipeline: analyze → design → scaffold → migrate.

mod agents;
mod run;

pub use agents::{AgentOutput, PipelineAgents, ScaffoldReport, SchemaCollection, SchemaDesign};
pub use run::{PipelineRunner, RunOptions, RunReport};
