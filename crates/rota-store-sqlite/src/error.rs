//! Error type for `rota-store-sqlite`.

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// The session closed and the store has no file to reopen it from.
  #[error("session closed and cannot be reopened: {0}")]
  SessionLost(String),
}

impl Error {
  /// SQLite's equivalent of a lock-wait timeout: the busy handler gave up.
  pub fn is_lock_contention(&self) -> bool {
    match self {
      Error::Database(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _))) => {
        matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
      }
      _ => false,
    }
  }
}

impl rota_core::store::StoreError for Error {
  fn is_lock_contention(&self) -> bool { Error::is_lock_contention(self) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
