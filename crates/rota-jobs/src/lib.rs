//! The batch jobs of the trip-history pipeline.
//!
//! Every job is generic over a [`TripStore`](rota_core::store::TripStore) and,
//! where it talks to the upstream service, a
//! [`TransitFeed`](rota_core::feed::TransitFeed). Jobs never abort on a
//! per-day or per-record failure: they return a report of typed outcomes and
//! only propagate errors that leave nothing sensible to do.

mod classify;
mod ingest;
mod merge;
mod reconcile;
mod retry;
mod view;

pub mod error;
pub mod report;

pub use classify::classify_violations;
pub use error::{Error, Result};
pub use ingest::ingest_violations;
pub use merge::merge_history;
pub use reconcile::reconcile;
pub use view::rebuild_enriched_view;
