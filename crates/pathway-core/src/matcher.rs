//! Rule matching — decide which active rules fire for a fact set.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  evaluate::{ConditionTrace, evaluate},
  fact::FactSet,
  rule::{Action, MatchMode, Rule, RuleStatus},
};

/// Per-rule explanation: every condition outcome plus the rule's own text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleTrace {
  pub conditions:  Vec<ConditionTrace>,
  pub explanation: String,
}

/// The result of evaluating one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleOutcome {
  pub rule_id:    Uuid,
  pub rule_name:  String,
  /// The published version that was evaluated.
  pub version:    u32,
  pub priority:   u8,
  pub match_mode: MatchMode,
  pub fired:      bool,
  pub actions:    Vec<Action>,
  pub trace:      RuleTrace,
}

/// Every rule evaluated for one fact set, highest priority first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchReport {
  pub outcomes: Vec<RuleOutcome>,
  pub warnings: Vec<String>,
}

impl MatchReport {
  pub fn matched(&self) -> impl Iterator<Item = &RuleOutcome> {
    self.outcomes.iter().filter(|o| o.fired)
  }

  pub fn matched_count(&self) -> usize { self.matched().count() }

  pub fn evaluated_count(&self) -> usize { self.outcomes.len() }
}

/// Combine condition outcomes under `mode`. With no conditions, `all` is
/// vacuously true and `any` vacuously false.
pub fn combine(mode: MatchMode, outcomes: &[ConditionTrace]) -> bool {
  match mode {
    MatchMode::All => outcomes.iter().all(|c| c.passed),
    MatchMode::Any => outcomes.iter().any(|c| c.passed),
  }
}

/// Evaluate every active rule in `rules` against `facts`.
///
/// Rules that are not active, or active without a published version, are
/// skipped (the latter with a warning). All conditions of a rule are
/// evaluated so the trace is complete. Ordering is by current priority,
/// descending; ties keep their input order.
pub fn match_rules(rules: &[Rule], facts: &FactSet) -> MatchReport {
  let mut report = MatchReport::default();

  for rule in rules.iter().filter(|r| r.status == RuleStatus::Active) {
    let Some(current) = rule.current() else {
      report
        .warnings
        .push(format!("rule {} ({}) is active but has no published version", rule.id, rule.title));
      continue;
    };

    let conditions: Vec<ConditionTrace> =
      current.conditions.iter().map(|c| evaluate(c, facts)).collect();
    let fired = combine(current.match_mode, &conditions);

    for warning in conditions.iter().filter_map(|c| c.warning.as_deref()) {
      report.warnings.push(format!("rule {}: {warning}", current.title));
    }

    tracing::trace!(rule_id = %rule.id, fired, "evaluated rule");

    report.outcomes.push(RuleOutcome {
      rule_id:    rule.id,
      rule_name:  current.title.to_owned(),
      version:    current.version,
      priority:   current.priority,
      match_mode: current.match_mode,
      fired,
      actions:    current.actions.to_vec(),
      trace:      RuleTrace {
        conditions,
        explanation: current.explanation.to_owned(),
      },
    });
  }

  report.outcomes.sort_by(|a, b| b.priority.cmp(&a.priority));
  report
}

#[cfg(test)]
pub(crate) mod tests {
  use chrono::Utc;

  use super::*;
  use crate::{
    lifecycle::{archive, new_rule, publish_version},
    rule::{ActionKind, Condition, NewRule, Operator, RuleBody},
  };

  /// Build and publish a rule; shared with the scoring and harness tests.
  pub(crate) fn active_rule(
    title: &str,
    priority: u8,
    match_mode: MatchMode,
    conditions: Vec<Condition>,
    actions: Vec<Action>,
  ) -> Rule {
    let input = NewRule {
      domain_id: "web-dev".into(),
      title:     title.into(),
      body:      RuleBody {
        match_mode,
        conditions,
        actions,
        priority,
        explanation: format!("{title} explanation"),
      },
    };
    let mut rule = new_rule(input, "tester", Utc::now()).unwrap();
    publish_version(&mut rule, 1, "tester", Utc::now()).unwrap();
    rule
  }

  pub(crate) fn beginner_rule() -> Rule {
    active_rule(
      "R1",
      5,
      MatchMode::All,
      vec![Condition::new("experience", Operator::Equals, "beginner")],
      vec![Action::new(ActionKind::RecommendSkill, "HTML")],
    )
  }

  #[test]
  fn fires_on_matching_facts() {
    let rules = vec![beginner_rule()];
    let report = match_rules(&rules, &FactSet::new().with("experience", "beginner"));

    assert_eq!(report.evaluated_count(), 1);
    let matched: Vec<_> = report.matched().map(|o| o.rule_name.as_str()).collect();
    assert_eq!(matched, ["R1"]);

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.trace.conditions.len(), 1);
    assert!(outcome.trace.conditions[0].passed);
    assert_eq!(outcome.trace.explanation, "R1 explanation");
  }

  #[test]
  fn does_not_fire_on_other_facts() {
    let rules = vec![beginner_rule()];
    let report = match_rules(&rules, &FactSet::new().with("experience", "advanced"));
    assert_eq!(report.evaluated_count(), 1);
    assert_eq!(report.matched_count(), 0);
  }

  #[test]
  fn empty_conditions_are_vacuous() {
    let always = active_rule("always", 3, MatchMode::All, vec![], vec![]);
    let never = active_rule("never", 3, MatchMode::Any, vec![], vec![]);
    let report = match_rules(&[always, never], &FactSet::new());

    let fired: Vec<_> = report.matched().map(|o| o.rule_name.as_str()).collect();
    assert_eq!(fired, ["always"]);
    assert_eq!(report.evaluated_count(), 2);
  }

  #[test]
  fn any_mode_needs_one_condition() {
    let rule = active_rule(
      "frontend",
      4,
      MatchMode::Any,
      vec![
        Condition::new("goal", Operator::Equals, "frontend"),
        Condition::new("interests", Operator::Contains, "design"),
      ],
      vec![],
    );
    let report = match_rules(
      &[rule],
      &FactSet::new().with("goal", "backend").with("interests", "ui design"),
    );
    assert_eq!(report.matched_count(), 1);
    let conditions = &report.outcomes[0].trace.conditions;
    assert!(!conditions[0].passed);
    assert!(conditions[1].passed);
  }

  #[test]
  fn skips_inactive_and_orders_by_priority() {
    let low = active_rule("low", 2, MatchMode::All, vec![], vec![]);
    let high = active_rule("high", 9, MatchMode::All, vec![], vec![]);
    let mut gone = active_rule("gone", 10, MatchMode::All, vec![], vec![]);
    archive(&mut gone, Utc::now()).unwrap();

    let report = match_rules(&[low, gone, high], &FactSet::new());
    let names: Vec<_> = report.outcomes.iter().map(|o| o.rule_name.as_str()).collect();
    assert_eq!(names, ["high", "low"]);
  }

  #[test]
  fn active_rule_without_published_version_warns() {
    let mut rule = beginner_rule();
    rule.published_version = None;
    let report = match_rules(&[rule], &FactSet::new());
    assert_eq!(report.evaluated_count(), 0);
    assert_eq!(report.warnings.len(), 1);
  }

  #[test]
  fn condition_warnings_surface_in_report() {
    let mut rule = beginner_rule();
    rule.versions[0].conditions[0].operator = Operator::Unknown("like".into());
    let report = match_rules(&[rule], &FactSet::new().with("experience", "beginner"));
    assert_eq!(report.matched_count(), 0);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("like"));
  }

  #[test]
  fn evaluation_is_idempotent() {
    let rules = vec![
      beginner_rule(),
      active_rule("any", 3, MatchMode::Any, vec![], vec![]),
    ];
    let facts = FactSet::new().with("experience", "beginner");
    assert_eq!(match_rules(&rules, &facts), match_rules(&rules, &facts));
  }
}
