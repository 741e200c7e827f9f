//! Error types for `rota-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown time zone: {0:?}")]
  UnknownTimezone(String),

  #[error("invalid policy: {0}")]
  InvalidPolicy(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
