//! HTTP client for the upstream telemetry service.
//!
//! [`UpstreamClient`] authenticates once per job invocation and implements
//! [`rota_core::feed::TransitFeed`] over the trip-grid, non-conformity and
//! position-history endpoints.

mod auth;
mod client;
mod config;
mod wire;

pub mod error;

pub use auth::authenticate;
pub use client::UpstreamClient;
pub use config::UpstreamConfig;
pub use error::{Error, Result};
