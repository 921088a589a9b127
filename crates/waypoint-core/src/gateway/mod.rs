//! AI model gateway seam: trait, dynamic wrapper, an offline echo gateway
//! and call pricing.

pub mod box_gateway;
pub mod echo;
pub mod pricing;
pub mod provider;
