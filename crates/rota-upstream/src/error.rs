//! Error type for `rota-upstream`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("HTTP error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("{endpoint} returned {status}")]
  Status {
    endpoint: &'static str,
    status:   reqwest::StatusCode,
  },

  #[error("could not decode {endpoint} response: {source}")]
  Decode {
    endpoint: &'static str,
    #[source]
    source:   serde_json::Error,
  },

  /// The login endpoint refused the credentials or returned no token.
  #[error("authentication failed: {0}")]
  Authentication(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
