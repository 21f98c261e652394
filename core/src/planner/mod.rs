//! Discovery report → ordered, prioritized, cost-estimated task list.

mod category;
mod discovery;
mod plan;

pub use category::{classify, Classification, DocCategory};
pub use discovery::{DiscoveredDoc, DiscoveryReport, DocEntry};
pub use plan::{Plan, TaskPlanner};
