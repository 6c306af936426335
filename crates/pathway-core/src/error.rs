//! Error types for `pathway-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::rule::RuleStatus;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
  /// A rule, version, condition, action or fact set failed shape checks and
  /// was rejected before storage.
  #[error("validation failed: {}", .0.join("; "))]
  Validation(Vec<String>),

  #[error("rule {rule_id} has no version {version}")]
  VersionNotFound { rule_id: Uuid, version: u32 },

  #[error("rule not found: {0}")]
  RuleNotFound(Uuid),

  #[error("test profile not found: {0}")]
  ProfileNotFound(Uuid),

  #[error("rule {0} is archived")]
  RuleArchived(Uuid),

  #[error("rule cannot move from {from} to {to}")]
  InvalidTransition { from: RuleStatus, to: RuleStatus },

  /// The evaluation underneath a test run failed; no result was recorded.
  #[error("test execution failed: {0}")]
  TestExecution(#[source] BoxError),

  #[error("invalid scoring configuration: {0}")]
  Configuration(String),

  #[error("store error: {0}")]
  Store(#[source] BoxError),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Box a backend error into [`Error::Store`].
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }

  pub fn test_execution<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::TestExecution(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
