//! Infrastructure layer for Waypoint.
//!
//! Implements the storage traits defined in `waypoint-core`: the SQLite
//! checkpoint store (WAL mode, split read/write pools) plus the engine config
//! loader and data directory resolution.

pub mod config;
pub mod sqlite;
