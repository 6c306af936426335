//! The `RuleStore` trait.
//!
//! The trait is implemented by storage backends (e.g. `pathway-store-sqlite`).
//! The [`Engine`](crate::engine::Engine) and the CLI depend on this
//! abstraction, not on any concrete backend.

use std::future::Future;

use uuid::Uuid;

use crate::{
  audit::{AuditEntry, RuleExecution, RuleMetrics},
  harness::{NewTestProfile, TestProfile, TestResult},
  lifecycle::StatusChange,
  rule::{NewRule, Rule, RuleBody, RuleStatus, RuleVersion},
};

/// Outcome of [`RuleStore::publish_version`].
#[derive(Debug, Clone)]
pub struct Publication {
  pub rule:     Rule,
  /// Version that was live before this publish, read in the same step.
  pub previous: Option<u32>,
}

/// Abstraction over a rule store backend.
///
/// Rule mutations go through the free functions in
/// [`lifecycle`](crate::lifecycle); a backend loads the rule, applies the
/// function and persists the outcome as one atomic step per rule. Versions,
/// test results and audit entries are append-only.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait RuleStore: Send + Sync {
  /// Backend errors must carry domain failures (`VersionNotFound`,
  /// `InvalidTransition`, ...) back out unchanged through this conversion.
  type Error: std::error::Error + Send + Sync + 'static + Into<crate::Error>;

  // ── Rules ─────────────────────────────────────────────────────────────

  /// Validate and persist a new draft rule holding version 1.
  fn create_rule(
    &self,
    input: NewRule,
    user: String,
  ) -> impl Future<Output = Result<Rule, Self::Error>> + Send + '_;

  /// Retrieve a rule with its full version history. `None` if not found.
  fn get_rule(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Rule>, Self::Error>> + Send + '_;

  /// List rules, optionally filtered by domain and status, oldest first.
  fn list_rules(
    &self,
    domain_id: Option<String>,
    status: Option<RuleStatus>,
  ) -> impl Future<Output = Result<Vec<Rule>, Self::Error>> + Send + '_;

  /// Active rules of `domain_id`, highest current priority first.
  fn load_active_rules(
    &self,
    domain_id: String,
  ) -> impl Future<Output = Result<Vec<Rule>, Self::Error>> + Send + '_;

  /// Append a version numbered `len(versions) + 1`.
  fn create_version(
    &self,
    rule_id: Uuid,
    body: RuleBody,
    user: String,
  ) -> impl Future<Output = Result<RuleVersion, Self::Error>> + Send + '_;

  /// Publish (or roll back to) `version` and return the updated rule along
  /// with the version it replaced.
  fn publish_version(
    &self,
    rule_id: Uuid,
    version: u32,
    user: String,
  ) -> impl Future<Output = Result<Publication, Self::Error>> + Send + '_;

  fn set_status(
    &self,
    rule_id: Uuid,
    change: StatusChange,
  ) -> impl Future<Output = Result<Rule, Self::Error>> + Send + '_;

  // ── Metrics sink ──────────────────────────────────────────────────────

  fn record_executions(
    &self,
    executions: Vec<RuleExecution>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// `None` if the rule has never been evaluated.
  fn get_metrics(
    &self,
    rule_id: Uuid,
  ) -> impl Future<Output = Result<Option<RuleMetrics>, Self::Error>> + Send + '_;

  // ── Audit ─────────────────────────────────────────────────────────────

  fn append_audit(
    &self,
    entry: AuditEntry,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// The most recent `limit` entries, newest first.
  fn list_audit(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<AuditEntry>, Self::Error>> + Send + '_;

  // ── Test profiles ─────────────────────────────────────────────────────

  fn add_test_profile(
    &self,
    input: NewTestProfile,
  ) -> impl Future<Output = Result<TestProfile, Self::Error>> + Send + '_;

  /// Retrieve a profile with its result history, oldest result first.
  fn get_test_profile(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<TestProfile>, Self::Error>> + Send + '_;

  fn list_test_profiles(
    &self,
    domain_id: Option<String>,
  ) -> impl Future<Output = Result<Vec<TestProfile>, Self::Error>> + Send + '_;

  /// Append `result` to its profile's history, bump the usage counters and
  /// return the updated profile.
  fn append_test_result(
    &self,
    result: TestResult,
  ) -> impl Future<Output = Result<TestProfile, Self::Error>> + Send + '_;
}
