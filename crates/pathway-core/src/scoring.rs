//! Action aggregation and confidence scoring.
//!
//! Confidence blends two signals:
//!
//! ```text
//! totalPositive = Σ fired   min(priority * priorityFactorCap, maxPerRule) * Σ positive weights
//! maxPossible   = Σ evaluated priority * priorityFactorCap
//! coverage      = matched / evaluated            (0 when nothing was evaluated)
//! confidence    = clamp01(totalPositive / maxPossible * (1 - coverageWeight)
//!                         + coverage * coverageWeight)
//! ```
//!
//! With nothing evaluated `maxPossible` is zero and confidence is `0`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  matcher::MatchReport,
  rule::{ActionKind, ActionValue},
};

// ─── Configuration ───────────────────────────────────────────────────────────

/// Tunables for [`score`]. Injected by the caller; never hardcoded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
  /// Share of confidence driven by rule coverage, in `[0, 1]`.
  pub coverage_weight:     f64,
  /// Multiplier turning a 1–10 priority into a contribution ceiling.
  pub priority_factor_cap: f64,
  /// Upper bound on a single rule's priority factor.
  pub max_per_rule:        f64,
}

impl Default for ScoringConfig {
  fn default() -> Self {
    Self {
      coverage_weight:     0.3,
      priority_factor_cap: 0.1,
      max_per_rule:        1.0,
    }
  }
}

impl ScoringConfig {
  pub fn validate(&self) -> Result<()> {
    if !(0.0..=1.0).contains(&self.coverage_weight) {
      return Err(Error::Configuration(format!(
        "coverage_weight must be within [0, 1], got {}",
        self.coverage_weight
      )));
    }
    if !self.priority_factor_cap.is_finite() || self.priority_factor_cap <= 0.0 {
      return Err(Error::Configuration(format!(
        "priority_factor_cap must be positive, got {}",
        self.priority_factor_cap
      )));
    }
    if !self.max_per_rule.is_finite() || self.max_per_rule <= 0.0 {
      return Err(Error::Configuration(format!(
        "max_per_rule must be positive, got {}",
        self.max_per_rule
      )));
    }
    Ok(())
  }
}

// ─── Output types ────────────────────────────────────────────────────────────

/// One deduplicated recommendation and the rules that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedItem {
  pub value:  ActionValue,
  /// Σ `action.weight * rule.priority` over every contributing action.
  pub weight: f64,
  pub rules:  Vec<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
  pub skills:           Vec<RecommendedItem>,
  pub resources:        Vec<RecommendedItem>,
  pub projects:         Vec<RecommendedItem>,
  pub warnings:         Vec<String>,
  /// Raw score accumulated from `addScore` actions.
  pub score_adjustment: f64,
}

impl Recommendation {
  pub fn contains_skill(&self, name: &str) -> bool {
    self
      .skills
      .iter()
      .any(|item| matches!(&item.value, ActionValue::Text(s) if s == name))
  }
}

/// How one evaluated rule fed into the confidence score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleContribution {
  pub rule_id:      Uuid,
  pub rule_name:    String,
  pub priority:     u8,
  pub matched:      bool,
  /// Σ weight of the rule's positive actions.
  pub weight:       f64,
  /// `priority * priorityFactorCap`; this rule's share of `maxPossible`.
  pub ceiling:      f64,
  /// This rule's share of `totalPositive`; zero when it did not fire.
  pub contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scored {
  pub recommendation: Recommendation,
  pub confidence:     f64,
  pub breakdown:      Vec<RuleContribution>,
}

// ─── Scoring ─────────────────────────────────────────────────────────────────

fn clamp01(value: f64) -> f64 {
  if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

fn push_item(list: &mut Vec<RecommendedItem>, value: &ActionValue, weight: f64, rule_id: Uuid) {
  let key = value.dedup_key();
  match list.iter_mut().find(|item| item.value.dedup_key() == key) {
    Some(item) => {
      item.weight += weight;
      if !item.rules.contains(&rule_id) {
        item.rules.push(rule_id);
      }
    }
    None => list.push(RecommendedItem {
      value: value.clone(),
      weight,
      rules: vec![rule_id],
    }),
  }
}

/// Fold the fired rules of `report` into a recommendation and compute the
/// confidence score.
pub fn score(report: &MatchReport, config: &ScoringConfig) -> Result<Scored> {
  config.validate()?;

  let mut recommendation = Recommendation::default();
  let mut breakdown = Vec::with_capacity(report.outcomes.len());
  let mut total_positive = 0.0;
  let mut max_possible = 0.0;

  for outcome in &report.outcomes {
    let priority = f64::from(outcome.priority);
    let ceiling = priority * config.priority_factor_cap;
    let weight: f64 = outcome
      .actions
      .iter()
      .filter(|a| a.is_positive())
      .map(|a| a.weight)
      .sum();

    let contribution = if outcome.fired {
      ceiling.min(config.max_per_rule) * weight
    } else {
      0.0
    };
    max_possible += ceiling;
    total_positive += contribution;

    if outcome.fired {
      for action in &outcome.actions {
        let weighted = action.weight * priority;
        match action.kind {
          ActionKind::RecommendSkill => {
            push_item(&mut recommendation.skills, &action.value, weighted, outcome.rule_id)
          }
          ActionKind::RecommendResource => {
            push_item(&mut recommendation.resources, &action.value, weighted, outcome.rule_id)
          }
          ActionKind::RecommendProject => {
            push_item(&mut recommendation.projects, &action.value, weighted, outcome.rule_id)
          }
          ActionKind::AddScore => {
            recommendation.score_adjustment +=
              action.value.as_number().unwrap_or_default() * action.weight;
          }
          ActionKind::AddWarning => {
            let text = match &action.value {
              ActionValue::Text(s) => s.clone(),
              other => other.dedup_key(),
            };
            if !recommendation.warnings.contains(&text) {
              recommendation.warnings.push(text);
            }
          }
        }
      }
    }

    breakdown.push(RuleContribution {
      rule_id: outcome.rule_id,
      rule_name: outcome.rule_name.clone(),
      priority: outcome.priority,
      matched: outcome.fired,
      weight,
      ceiling,
      contribution,
    });
  }

  for list in [
    &mut recommendation.skills,
    &mut recommendation.resources,
    &mut recommendation.projects,
  ] {
    list.sort_by(|a, b| b.weight.total_cmp(&a.weight));
  }

  let evaluated = report.evaluated_count();
  let coverage = if evaluated > 0 {
    report.matched_count() as f64 / evaluated as f64
  } else {
    0.0
  };

  let confidence = if max_possible > 0.0 {
    clamp01(
      (total_positive / max_possible) * (1.0 - config.coverage_weight)
        + coverage * config.coverage_weight,
    )
  } else {
    0.0
  };

  Ok(Scored { recommendation, confidence, breakdown })
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  use super::*;
  use crate::{
    fact::FactSet,
    matcher::{
      RuleOutcome, RuleTrace, match_rules,
      tests::{active_rule, beginner_rule},
    },
    rule::{Action, Condition, MatchMode, Operator},
  };

  fn approx(a: f64, b: f64) -> bool { (a - b).abs() < 1e-9 }

  #[test]
  fn beginner_scenario_recommends_html() {
    let rules = vec![beginner_rule()];
    let report = match_rules(&rules, &FactSet::new().with("experience", "beginner"));
    let scored = score(&report, &ScoringConfig::default()).unwrap();

    assert!(scored.recommendation.contains_skill("HTML"));
    assert!(scored.confidence > 0.0);
    assert!(approx(scored.confidence, 1.0));
    assert_eq!(scored.breakdown.len(), 1);
    assert!(scored.breakdown[0].matched);
  }

  #[test]
  fn nothing_matched_scores_zero() {
    let rules = vec![beginner_rule()];
    let report = match_rules(&rules, &FactSet::new().with("experience", "advanced"));
    let scored = score(&report, &ScoringConfig::default()).unwrap();

    assert_eq!(scored.confidence, 0.0);
    assert!(scored.recommendation.skills.is_empty());
    assert!(!scored.breakdown[0].matched);
    assert_eq!(scored.breakdown[0].contribution, 0.0);
  }

  #[test]
  fn no_rules_scores_zero() {
    let scored = score(&MatchReport::default(), &ScoringConfig::default()).unwrap();
    assert_eq!(scored.confidence, 0.0);
    assert!(scored.breakdown.is_empty());
  }

  #[test]
  fn blends_strength_and_coverage() {
    let fired = active_rule(
      "fired",
      5,
      MatchMode::All,
      vec![],
      vec![Action::new(ActionKind::RecommendSkill, "CSS")],
    );
    let missed = active_rule(
      "missed",
      3,
      MatchMode::Any,
      vec![],
      vec![Action::new(ActionKind::RecommendSkill, "SQL")],
    );
    let report = match_rules(&[fired, missed], &FactSet::new());
    let scored = score(&report, &ScoringConfig::default()).unwrap();

    // strength 0.5 / 0.8, coverage 1 / 2
    assert!(approx(scored.confidence, 0.625 * 0.7 + 0.5 * 0.3));
    assert!(approx(scored.breakdown[1].ceiling, 0.3));
  }

  #[test]
  fn per_rule_cap_limits_contribution() {
    let rule = active_rule(
      "capped",
      5,
      MatchMode::All,
      vec![],
      vec![Action::new(ActionKind::RecommendSkill, "CSS").weighted(2.0)],
    );
    let report = match_rules(&[rule], &FactSet::new());
    let config = ScoringConfig { max_per_rule: 0.2, ..ScoringConfig::default() };
    let scored = score(&report, &config).unwrap();

    assert!(approx(scored.breakdown[0].contribution, 0.4));
    assert!(approx(scored.breakdown[0].weight, 2.0));
  }

  #[test]
  fn aggregates_and_deduplicates_actions() {
    let a = active_rule(
      "a",
      5,
      MatchMode::All,
      vec![],
      vec![
        Action::new(ActionKind::RecommendSkill, "HTML"),
        Action::new(ActionKind::AddWarning, "steep curve"),
        Action::new(ActionKind::AddScore, 2.5).weighted(2.0),
      ],
    );
    let b = active_rule(
      "b",
      3,
      MatchMode::All,
      vec![Condition::new("goal", Operator::NotEquals, "backend")],
      vec![
        Action::new(ActionKind::RecommendSkill, "HTML").weighted(2.0),
        Action::new(ActionKind::RecommendSkill, "Figma").weighted(3.0),
        Action::new(ActionKind::RecommendProject, "Portfolio site"),
        Action::new(ActionKind::AddWarning, "steep curve"),
      ],
    );
    let (a_id, b_id) = (a.id, b.id);
    let report = match_rules(&[a, b], &FactSet::new());
    let rec = score(&report, &ScoringConfig::default()).unwrap().recommendation;

    assert_eq!(rec.skills.len(), 2);
    assert_eq!(rec.skills[0].value, ActionValue::from("HTML"));
    assert!(approx(rec.skills[0].weight, 5.0 + 6.0));
    assert_eq!(rec.skills[0].rules, vec![a_id, b_id]);
    assert!(approx(rec.skills[1].weight, 9.0));
    assert_eq!(rec.projects.len(), 1);
    assert_eq!(rec.warnings, vec!["steep curve".to_owned()]);
    assert!(approx(rec.score_adjustment, 5.0));
  }

  #[test]
  fn warnings_do_not_count_as_positive_weight() {
    let rule = active_rule(
      "warn-only",
      4,
      MatchMode::All,
      vec![],
      vec![Action::new(ActionKind::AddWarning, "needs prerequisites")],
    );
    let report = match_rules(&[rule], &FactSet::new());
    let scored = score(&report, &ScoringConfig::default()).unwrap();

    assert_eq!(scored.breakdown[0].weight, 0.0);
    // strength 0, coverage 1
    assert!(approx(scored.confidence, 0.3));
  }

  #[test]
  fn rejects_invalid_configuration() {
    let report = MatchReport::default();
    for config in [
      ScoringConfig { coverage_weight: 1.5, ..ScoringConfig::default() },
      ScoringConfig { priority_factor_cap: 0.0, ..ScoringConfig::default() },
      ScoringConfig { max_per_rule: f64::NAN, ..ScoringConfig::default() },
    ] {
      assert!(matches!(score(&report, &config), Err(Error::Configuration(_))));
    }
  }

  fn outcome(priority: u8, fired: bool, weights: Vec<f64>) -> RuleOutcome {
    RuleOutcome {
      rule_id: Uuid::new_v4(),
      rule_name: format!("p{priority}"),
      version: 1,
      priority,
      match_mode: MatchMode::All,
      fired,
      actions: weights
        .into_iter()
        .map(|w| Action::new(ActionKind::RecommendSkill, "x").weighted(w))
        .collect(),
      trace: RuleTrace { conditions: vec![], explanation: String::new() },
    }
  }

  proptest! {
    #[test]
    fn confidence_stays_in_unit_interval(
      rules in prop::collection::vec(
        (1u8..=10, any::<bool>(), prop::collection::vec(0.0f64..50.0, 0..4)),
        0..12,
      ),
      coverage_weight in 0.0f64..=1.0,
      priority_factor_cap in 0.001f64..5.0,
      max_per_rule in 0.001f64..5.0,
    ) {
      let report = MatchReport {
        outcomes: rules
          .into_iter()
          .map(|(priority, fired, weights)| outcome(priority, fired, weights))
          .collect(),
        warnings: vec![],
      };
      let config = ScoringConfig { coverage_weight, priority_factor_cap, max_per_rule };
      let scored = score(&report, &config).unwrap();

      prop_assert!((0.0..=1.0).contains(&scored.confidence));
      if report.outcomes.is_empty() {
        prop_assert_eq!(scored.confidence, 0.0);
      }
    }
  }
}
