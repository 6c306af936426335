//! [`Engine`] — the service layer tying a [`RuleStore`] to the pure
//! evaluation pipeline.
//!
//! Every operation is one store call plus, where relevant, a metrics write
//! and an audit entry. Those two sinks are best-effort: a failure is logged
//! and swallowed.

use std::{sync::Arc, time::Instant};

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
  Error, Result,
  audit::{AuditEntry, AuditEvent, RuleExecution, RuleMetrics},
  fact::FactSet,
  harness::{self, NewTestProfile, TestProfile, TestResult},
  lifecycle::StatusChange,
  matcher::{RuleOutcome, match_rules},
  rule::{NewRule, Rule, RuleBody, RuleStatus, RuleVersion, RuleView},
  scoring::{Recommendation, RuleContribution, ScoringConfig, score},
  store::{Publication, RuleStore},
};

/// What a caller gets back from [`Engine::evaluate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
  /// Fired rules with their traces, highest priority first.
  pub matched:         Vec<RuleOutcome>,
  pub evaluated_count: usize,
  pub recommendation:  Recommendation,
  pub confidence:      f64,
  pub breakdown:       Vec<RuleContribution>,
  /// Non-fatal problems found while evaluating (bad operators, unpublished
  /// active rules).
  pub warnings:        Vec<String>,
}

fn store_err<E: Into<Error>>(err: E) -> Error { err.into() }

pub struct Engine<S> {
  store:  Arc<S>,
  config: ScoringConfig,
}

impl<S> Clone for Engine<S> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), config: self.config }
  }
}

impl<S: RuleStore> Engine<S> {
  /// Fails with [`Error::Configuration`] if `config` is out of range.
  pub fn new(store: Arc<S>, config: ScoringConfig) -> Result<Self> {
    config.validate()?;
    Ok(Self { store, config })
  }

  pub fn store(&self) -> &S { &self.store }

  async fn audit(
    &self,
    event: AuditEvent,
    subject_id: Option<Uuid>,
    actor: Option<&str>,
    payload: serde_json::Value,
  ) {
    let entry = AuditEntry::new(event, subject_id, actor, payload);
    if let Err(err) = self.store.append_audit(entry).await {
      tracing::warn!(%event, error = %err, "failed to append audit entry");
    }
  }

  // ─── Rules ─────────────────────────────────────────────────────────────────

  pub async fn create_rule(&self, input: NewRule, user: &str) -> Result<Rule> {
    let rule = self.store.create_rule(input, user.to_owned()).await.map_err(store_err)?;
    self
      .audit(
        AuditEvent::RuleCreated,
        Some(rule.id),
        Some(user),
        json!({ "domainId": rule.domain_id, "title": rule.title }),
      )
      .await;
    Ok(rule)
  }

  pub async fn create_version(
    &self,
    rule_id: Uuid,
    body: RuleBody,
    user: &str,
  ) -> Result<RuleVersion> {
    let version = self
      .store
      .create_version(rule_id, body, user.to_owned())
      .await
      .map_err(store_err)?;
    self
      .audit(
        AuditEvent::RuleVersionCreated,
        Some(rule_id),
        Some(user),
        json!({ "version": version.version }),
      )
      .await;
    Ok(version)
  }

  pub async fn publish_version(&self, rule_id: Uuid, version: u32, user: &str) -> Result<Rule> {
    let published = self
      .store
      .publish_version(rule_id, version, user.to_owned())
      .await
      .map_err(store_err)?;
    self
      .audit(AuditEvent::RulePublished, Some(rule_id), Some(user), json!({ "version": version }))
      .await;
    Ok(published.rule)
  }

  /// Same store operation as [`publish_version`](Self::publish_version);
  /// differs only in the audit trail.
  pub async fn rollback_to_version(
    &self,
    rule_id: Uuid,
    version: u32,
    user: &str,
  ) -> Result<Rule> {
    let Publication { rule, previous } = self
      .store
      .publish_version(rule_id, version, user.to_owned())
      .await
      .map_err(store_err)?;
    self
      .audit(
        AuditEvent::RuleRolledBack,
        Some(rule_id),
        Some(user),
        json!({ "from": previous, "to": version }),
      )
      .await;
    Ok(rule)
  }

  async fn change_status(&self, rule_id: Uuid, change: StatusChange, user: &str) -> Result<Rule> {
    let rule = self.store.set_status(rule_id, change).await.map_err(store_err)?;
    self
      .audit(
        AuditEvent::RuleStatusChanged,
        Some(rule_id),
        Some(user),
        json!({ "status": change.target().as_ref() }),
      )
      .await;
    Ok(rule)
  }

  pub async fn archive_rule(&self, rule_id: Uuid, user: &str) -> Result<Rule> {
    self.change_status(rule_id, StatusChange::Archive, user).await
  }

  pub async fn deactivate_rule(&self, rule_id: Uuid, user: &str) -> Result<Rule> {
    self.change_status(rule_id, StatusChange::Deactivate, user).await
  }

  pub async fn reactivate_rule(&self, rule_id: Uuid, user: &str) -> Result<Rule> {
    self.change_status(rule_id, StatusChange::Reactivate, user).await
  }

  pub async fn rule_view(&self, rule_id: Uuid) -> Result<RuleView> {
    self
      .store
      .get_rule(rule_id)
      .await
      .map_err(store_err)?
      .map(|rule| rule.view())
      .ok_or(Error::RuleNotFound(rule_id))
  }

  pub async fn list_rules(
    &self,
    domain_id: Option<&str>,
    status: Option<RuleStatus>,
  ) -> Result<Vec<RuleView>> {
    let rules = self
      .store
      .list_rules(domain_id.map(str::to_owned), status)
      .await
      .map_err(store_err)?;
    Ok(rules.iter().map(Rule::view).collect())
  }

  pub async fn rule_metrics(&self, rule_id: Uuid) -> Result<Option<RuleMetrics>> {
    self.store.get_metrics(rule_id).await.map_err(store_err)
  }

  // ─── Evaluation ────────────────────────────────────────────────────────────

  /// Evaluate `facts` against the active rules of `domain_id`.
  ///
  /// Condition problems never fail the call; they surface in `warnings`.
  pub async fn evaluate(&self, domain_id: &str, facts: &FactSet) -> Result<EvaluationResult> {
    let rules = self
      .store
      .load_active_rules(domain_id.to_owned())
      .await
      .map_err(store_err)?;

    let started = Instant::now();
    let report = match_rules(&rules, facts);
    let scored = score(&report, &self.config)?;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    tracing::debug!(
      domain_id,
      evaluated = report.evaluated_count(),
      matched = report.matched_count(),
      confidence = scored.confidence,
      "evaluated facts"
    );

    if !report.outcomes.is_empty() {
      let per_rule = elapsed_ms / report.outcomes.len() as f64;
      let at = chrono::Utc::now();
      let executions = report
        .outcomes
        .iter()
        .map(|o| RuleExecution { rule_id: o.rule_id, matched: o.fired, elapsed_ms: per_rule, at })
        .collect();
      if let Err(err) = self.store.record_executions(executions).await {
        tracing::warn!(domain_id, error = %err, "failed to record rule metrics");
      }
    }

    let fired: Vec<&str> = report.matched().map(|o| o.rule_name.as_str()).collect();
    self
      .audit(
        AuditEvent::InferenceExecuted,
        None,
        None,
        json!({
          "domainId": domain_id,
          "evaluated": report.evaluated_count(),
          "matched": fired,
          "confidence": scored.confidence,
        }),
      )
      .await;

    let evaluated_count = report.evaluated_count();
    Ok(EvaluationResult {
      matched: report.outcomes.into_iter().filter(|o| o.fired).collect(),
      evaluated_count,
      recommendation: scored.recommendation,
      confidence: scored.confidence,
      breakdown: scored.breakdown,
      warnings: report.warnings,
    })
  }

  // ─── Test profiles ─────────────────────────────────────────────────────────

  pub async fn add_test_profile(&self, input: NewTestProfile) -> Result<TestProfile> {
    self.store.add_test_profile(input).await.map_err(store_err)
  }

  pub async fn list_test_profiles(&self, domain_id: Option<&str>) -> Result<Vec<TestProfile>> {
    self
      .store
      .list_test_profiles(domain_id.map(str::to_owned))
      .await
      .map_err(store_err)
  }

  /// Run a stored profile against its domain's active rules and append the
  /// result. Nothing is appended if the run fails.
  pub async fn run_test(&self, profile_id: Uuid, user: &str) -> Result<TestResult> {
    let profile = self
      .store
      .get_test_profile(profile_id)
      .await
      .map_err(store_err)?
      .ok_or(Error::ProfileNotFound(profile_id))?;

    let rules = self
      .store
      .load_active_rules(profile.domain_id.clone())
      .await
      .map_err(Error::test_execution)?;

    let result = harness::run_test(&profile, &rules, &self.config, user)?;
    self
      .store
      .append_test_result(result.clone())
      .await
      .map_err(store_err)?;

    if result.regression.as_ref().is_some_and(|r| r.is_regression()) {
      tracing::warn!(%profile_id, profile = %profile.name, "test profile regressed");
    }
    self
      .audit(
        AuditEvent::TestRun,
        Some(profile_id),
        Some(user),
        json!({
          "resultId": result.id,
          "accuracy": result.accuracy,
          "passed": result.passed,
        }),
      )
      .await;
    Ok(result)
  }

  pub async fn audit_log(&self, limit: usize) -> Result<Vec<AuditEntry>> {
    self.store.list_audit(limit).await.map_err(store_err)
  }
}
