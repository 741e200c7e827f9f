//! Error type for `rota-jobs`.

use thiserror::Error;

/// A failure that stops a job outright.
#[derive(Debug, Error)]
pub enum Error {
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("upstream error: {0}")]
  Feed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Error::Store(Box::new(e))
  }

  pub fn feed(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Error::Feed(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
