//! Observability setup for Waypoint: the tracing subscriber with optional
//! OpenTelemetry span export.

pub mod tracing_setup;
