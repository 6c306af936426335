//! Error type for `pathway-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A domain failure raised while applying a lifecycle or harness function.
  #[error("core error: {0}")]
  Core(#[from] pathway_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  /// Raised inside a connection call, before it crosses the thread boundary.
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A column held a value outside the domain of its Rust type.
  #[error("invalid stored value: {0}")]
  Decode(String),
}

impl From<Error> for pathway_core::Error {
  fn from(err: Error) -> Self {
    match err {
      Error::Core(inner) => inner,
      other => pathway_core::Error::store(other),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
