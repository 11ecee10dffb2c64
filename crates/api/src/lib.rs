//! # OrgSync App
//!
//! Process layer: wires the hexagonal architecture into a running service.
//!
//! This crate contains:
//! - Application context (dependency injection)
//! - Tracing setup
//! - Main entry point (`orgsync` binary)
//!
//! ## Architecture
//! - Depends on `common`, `domain`, `core`, and `infra`
//! - Owns process lifecycle: startup, background jobs, graceful shutdown

pub mod context;
pub mod utils;

pub use context::AppContext;
