//! Memory/context provider seam.

pub mod provider;
