//! Core types and trait definitions for the trip-history pipeline.
//!
//! This crate is deliberately free of HTTP and database dependencies. It holds
//! the domain records, the [`store::TripStore`] and [`feed::TransitFeed`]
//! abstractions, and the pure rules (merge, reconciliation planning,
//! classification) that the jobs apply.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod error;
pub mod feed;
pub mod policy;
pub mod reconcile;
pub mod route;
pub mod store;
pub mod time;
pub mod trip;
pub mod violation;

pub use error::{Error, Result};
