//! Engine logic for Waypoint.
//!
//! Holds the workflow orchestration engine (definition registry, node
//! executor, orchestrator, execution tracker) and the traits for its
//! external collaborators: checkpoint storage, the AI model gateway and the
//! memory/context provider. Infrastructure crates implement those traits.

pub mod event;
pub mod gateway;
pub mod memory;
pub mod repository;
pub mod workflow;
