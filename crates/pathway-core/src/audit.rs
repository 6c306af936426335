//! Audit trail and per-rule execution metrics.
//!
//! Both are observational: the engine writes them after the fact and a
//! failure to write never fails the operation that produced them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

// ─── Audit ───────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display,
  EnumString, AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum AuditEvent {
  RuleCreated,
  RuleVersionCreated,
  RulePublished,
  RuleRolledBack,
  RuleStatusChanged,
  InferenceExecuted,
  TestRun,
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
  pub id:          Uuid,
  pub event:       AuditEvent,
  /// The rule or profile the event is about, if any.
  pub subject_id:  Option<Uuid>,
  pub actor:       Option<String>,
  pub payload:     serde_json::Value,
  pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
  pub fn new(
    event: AuditEvent,
    subject_id: Option<Uuid>,
    actor: Option<&str>,
    payload: serde_json::Value,
  ) -> Self {
    Self {
      id: Uuid::new_v4(),
      event,
      subject_id,
      actor: actor.map(str::to_owned),
      payload,
      recorded_at: Utc::now(),
    }
  }
}

// ─── Metrics ─────────────────────────────────────────────────────────────────

/// A single evaluation of one rule, as reported to the metrics sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleExecution {
  pub rule_id:    Uuid,
  pub matched:    bool,
  pub elapsed_ms: f64,
  pub at:         DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMetrics {
  pub total_executions:       u64,
  pub successful_matches:     u64,
  /// Running mean in milliseconds.
  pub average_execution_time: f64,
  pub last_executed:          Option<DateTime<Utc>>,
}

impl RuleMetrics {
  /// Fold one execution into the counters.
  pub fn record(&mut self, execution: &RuleExecution) {
    self.total_executions += 1;
    if execution.matched {
      self.successful_matches += 1;
    }
    let n = self.total_executions as f64;
    self.average_execution_time += (execution.elapsed_ms - self.average_execution_time) / n;
    self.last_executed = Some(match self.last_executed {
      Some(prev) if prev > execution.at => prev,
      _ => execution.at,
    });
  }
}

#[cfg(test)]
mod tests {
  use chrono::Duration;

  use super::*;

  #[test]
  fn event_names_are_camel_case() {
    assert_eq!(AuditEvent::RuleRolledBack.as_ref(), "ruleRolledBack");
    assert_eq!("testRun".parse::<AuditEvent>().unwrap(), AuditEvent::TestRun);
    assert_eq!(
      serde_json::to_value(AuditEvent::InferenceExecuted).unwrap(),
      serde_json::json!("inferenceExecuted")
    );
  }

  #[test]
  fn metrics_keep_a_running_average() {
    let rule_id = Uuid::new_v4();
    let start = Utc::now();
    let mut metrics = RuleMetrics::default();

    for (i, (matched, ms)) in [(true, 2.0), (false, 4.0), (true, 6.0)].into_iter().enumerate() {
      metrics.record(&RuleExecution {
        rule_id,
        matched,
        elapsed_ms: ms,
        at: start + Duration::seconds(i as i64),
      });
    }

    assert_eq!(metrics.total_executions, 3);
    assert_eq!(metrics.successful_matches, 2);
    assert!((metrics.average_execution_time - 4.0).abs() < 1e-9);
    assert_eq!(metrics.last_executed, Some(start + Duration::seconds(2)));
  }
}
