//! Workflow orchestration engine.
//!
//! Definitions are validated and registered once, then executed by an
//! [`orchestrator::Orchestrator`] per execution. The
//! [`tracker::ExecutionTracker`] owns the process-wide set of executions.

pub mod budget;
pub mod checkpoint;
pub mod definition;
pub mod expression;
pub mod graph;
pub mod handler;
pub mod handlers;
pub mod node_executor;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod routing;
pub mod template;
pub mod tracker;

#[cfg(test)]
pub(crate) mod test_support;
