//! Outbound HTTP used by the provider adapters.

pub mod client;

pub use client::{HttpClient, HttpClientBuilder};
