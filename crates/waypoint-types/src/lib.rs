//! Shared domain types for Waypoint.
//!
//! This crate contains the data model used across the engine: workflow
//! definitions, execution state, node results, lifecycle events, engine
//! configuration and the model gateway contract types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod gateway;
pub mod workflow;
