//! Integration lifecycle

pub mod ports;
mod registry;

pub use registry::IntegrationRegistry;
