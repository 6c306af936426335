//! Test harness — regression-test rule sets against curated profiles.
//!
//! A profile pins a fact set and the rules expected to fire for it. Running a
//! profile goes through the same matcher and scorer as live evaluation and
//! produces an immutable [`TestResult`]; results are only ever appended.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  fact::FactSet,
  matcher::match_rules,
  rule::Rule,
  scoring::{ScoringConfig, score},
};

/// Contributions closer than this are considered equal.
const CONTRIBUTION_TOLERANCE: f64 = 1e-6;

// ─── Profiles ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedRule {
  pub rule_name:             String,
  pub should_fire:           bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub expected_contribution: Option<f64>,
}

impl ExpectedRule {
  pub fn fires(rule_name: impl Into<String>) -> Self {
    Self { rule_name: rule_name.into(), should_fire: true, expected_contribution: None }
  }

  pub fn silent(rule_name: impl Into<String>) -> Self {
    Self { rule_name: rule_name.into(), should_fire: false, expected_contribution: None }
  }
}

/// Input to profile creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTestProfile {
  pub domain_id:      String,
  pub name:           String,
  #[serde(default)]
  pub description:    String,
  pub facts:          FactSet,
  #[serde(default)]
  pub expected_rules: Vec<ExpectedRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUsage {
  pub run_count:   u64,
  pub last_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestProfile {
  pub id:             Uuid,
  pub domain_id:      String,
  pub name:           String,
  pub description:    String,
  pub facts:          FactSet,
  pub expected_rules: Vec<ExpectedRule>,
  /// Oldest first. Append-only.
  pub test_results:   Vec<TestResult>,
  pub usage:          ProfileUsage,
  pub created_at:     DateTime<Utc>,
}

/// Validate `input` and build a profile with an empty result history.
pub fn new_profile(input: NewTestProfile, now: DateTime<Utc>) -> Result<TestProfile> {
  let mut issues = Vec::new();
  if input.domain_id.trim().is_empty() {
    issues.push("domainId must not be empty".to_owned());
  }
  if input.name.trim().is_empty() {
    issues.push("name must not be empty".to_owned());
  }
  for (i, expected) in input.expected_rules.iter().enumerate() {
    if expected.rule_name.trim().is_empty() {
      issues.push(format!("expectedRules[{i}].ruleName must not be empty"));
    }
  }
  if !issues.is_empty() {
    return Err(Error::Validation(issues));
  }

  Ok(TestProfile {
    id:             Uuid::new_v4(),
    domain_id:      input.domain_id,
    name:           input.name,
    description:    input.description,
    facts:          input.facts,
    expected_rules: input.expected_rules,
    test_results:   Vec::new(),
    usage:          ProfileUsage::default(),
    created_at:     now,
  })
}

// ─── Results ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionMismatch {
  pub rule_name: String,
  pub expected:  f64,
  pub actual:    f64,
}

/// Change relative to the previous run of the same profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Regression {
  pub previous_result_id: Option<Uuid>,
  /// Expected rules missed now that were not missed before.
  pub newly_missed:       Vec<String>,
  /// Unexpected firings now that did not happen before.
  pub newly_unexpected:   Vec<String>,
  pub accuracy_delta:     f64,
}

impl Regression {
  pub fn is_regression(&self) -> bool {
    !self.newly_missed.is_empty()
      || !self.newly_unexpected.is_empty()
      || self.accuracy_delta < 0.0
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
  pub id:                      Uuid,
  pub profile_id:              Uuid,
  pub run_at:                  DateTime<Utc>,
  pub run_by:                  String,
  pub fired_rules:             Vec<String>,
  pub matched_expected:        Vec<String>,
  pub missed_expected:         Vec<String>,
  pub unexpected:              Vec<String>,
  /// Percentage in `[0, 100]`.
  pub accuracy:                f64,
  pub confidence:              f64,
  /// Matcher + scorer only; persistence is excluded.
  pub execution_time_ms:       f64,
  pub contribution_mismatches: Vec<ContributionMismatch>,
  pub passed:                  bool,
  pub regression:              Option<Regression>,
}

/// Classification of fired rules against expectations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
  pub matched_expected: Vec<String>,
  pub missed_expected:  Vec<String>,
  pub unexpected:       Vec<String>,
  pub accuracy:         f64,
}

/// Compare the names of fired rules against a profile's expectations.
///
/// `accuracy` divides by *every* declared expectation, including those with
/// `should_fire = false`, and is `0` when nothing is declared.
pub fn diff(expected: &[ExpectedRule], fired: &[String]) -> Diff {
  let should_fire: Vec<&str> = expected
    .iter()
    .filter(|e| e.should_fire)
    .map(|e| e.rule_name.as_str())
    .collect();

  let (matched_expected, missed_expected): (Vec<String>, Vec<String>) = should_fire
    .iter()
    .map(|name| (*name).to_owned())
    .partition(|name| fired.contains(name));

  let unexpected = fired
    .iter()
    .filter(|name| !should_fire.contains(&name.as_str()))
    .cloned()
    .collect();

  let accuracy = if expected.is_empty() {
    0.0
  } else {
    matched_expected.len() as f64 / expected.len() as f64 * 100.0
  };

  Diff { matched_expected, missed_expected, unexpected, accuracy }
}

/// Describe how `current` moved relative to `previous`.
pub fn compare(previous: &TestResult, current: &TestResult) -> Regression {
  Regression {
    previous_result_id: Some(previous.id),
    newly_missed:       current
      .missed_expected
      .iter()
      .filter(|name| !previous.missed_expected.contains(name))
      .cloned()
      .collect(),
    newly_unexpected:   current
      .unexpected
      .iter()
      .filter(|name| !previous.unexpected.contains(name))
      .cloned()
      .collect(),
    accuracy_delta:     current.accuracy - previous.accuracy,
  }
}

// ─── Running ─────────────────────────────────────────────────────────────────

/// Run `profile` against `rules` (the active rules of its domain).
///
/// Nothing is recorded here; pass the result to [`record_result`] or a
/// store. A failure of the underlying evaluation is wrapped in
/// [`Error::TestExecution`].
pub fn run_test(
  profile: &TestProfile,
  rules: &[Rule],
  config: &ScoringConfig,
  user: &str,
) -> Result<TestResult> {
  let started = Instant::now();
  let report = match_rules(rules, &profile.facts);
  let scored = score(&report, config).map_err(Error::test_execution)?;
  let execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;

  let fired_rules: Vec<String> = report.matched().map(|o| o.rule_name.clone()).collect();
  let Diff { matched_expected, missed_expected, unexpected, accuracy } =
    diff(&profile.expected_rules, &fired_rules);

  let contribution_mismatches: Vec<ContributionMismatch> = profile
    .expected_rules
    .iter()
    .filter(|e| e.should_fire)
    .filter_map(|e| {
      let expected = e.expected_contribution?;
      let actual = scored
        .breakdown
        .iter()
        .find(|c| c.matched && c.rule_name == e.rule_name)?
        .contribution;
      ((expected - actual).abs() > CONTRIBUTION_TOLERANCE).then(|| ContributionMismatch {
        rule_name: e.rule_name.clone(),
        expected,
        actual,
      })
    })
    .collect();

  let passed =
    missed_expected.is_empty() && unexpected.is_empty() && contribution_mismatches.is_empty();

  let mut result = TestResult {
    id: Uuid::new_v4(),
    profile_id: profile.id,
    run_at: Utc::now(),
    run_by: user.to_owned(),
    fired_rules,
    matched_expected,
    missed_expected,
    unexpected,
    accuracy,
    confidence: scored.confidence,
    execution_time_ms,
    contribution_mismatches,
    passed,
    regression: None,
  };
  result.regression = profile.test_results.last().map(|prev| compare(prev, &result));

  tracing::debug!(
    profile_id = %profile.id,
    accuracy = result.accuracy,
    passed = result.passed,
    "ran test profile"
  );
  Ok(result)
}

/// Append `result` to the profile's history and bump its usage counters.
pub fn record_result(profile: &mut TestProfile, result: TestResult) {
  profile.usage.run_count += 1;
  profile.usage.last_run_at = Some(result.run_at);
  profile.test_results.push(result);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    matcher::tests::{active_rule, beginner_rule},
    rule::{Action, ActionKind, MatchMode},
  };

  fn profile(expected: Vec<ExpectedRule>) -> TestProfile {
    new_profile(
      NewTestProfile {
        domain_id:      "web-dev".into(),
        name:           "beginner".into(),
        description:    String::new(),
        facts:          FactSet::new().with("experience", "beginner"),
        expected_rules: expected,
      },
      Utc::now(),
    )
    .unwrap()
  }

  fn always(name: &str) -> Rule {
    active_rule(
      name,
      2,
      MatchMode::All,
      vec![],
      vec![Action::new(ActionKind::RecommendResource, "MDN")],
    )
  }

  #[test]
  fn extra_firing_is_unexpected_but_accuracy_holds() {
    let profile = profile(vec![ExpectedRule::fires("R1")]);
    let rules = vec![beginner_rule(), always("R2")];

    let result = run_test(&profile, &rules, &ScoringConfig::default(), "qa").unwrap();

    assert_eq!(result.matched_expected, ["R1"]);
    assert_eq!(result.unexpected, ["R2"]);
    assert!(result.missed_expected.is_empty());
    assert_eq!(result.accuracy, 100.0);
    assert!(!result.passed);
    assert!(result.regression.is_none());
  }

  #[test]
  fn missed_and_silent_expectations() {
    let profile = profile(vec![
      ExpectedRule::fires("R1"),
      ExpectedRule::fires("R3"),
      ExpectedRule::silent("R2"),
    ]);
    let rules = vec![beginner_rule(), always("R2")];

    let result = run_test(&profile, &rules, &ScoringConfig::default(), "qa").unwrap();

    assert_eq!(result.matched_expected, ["R1"]);
    assert_eq!(result.missed_expected, ["R3"]);
    assert_eq!(result.unexpected, ["R2"]);
    assert!((result.accuracy - 100.0 / 3.0).abs() < 1e-9);
  }

  #[test]
  fn no_expectations_means_zero_accuracy() {
    let profile = profile(vec![]);
    let result =
      run_test(&profile, &[beginner_rule()], &ScoringConfig::default(), "qa").unwrap();
    assert_eq!(result.accuracy, 0.0);
    assert_eq!(result.unexpected, ["R1"]);
  }

  #[test]
  fn contribution_expectations_are_checked() {
    let mut expected = ExpectedRule::fires("R1");
    expected.expected_contribution = Some(0.5);
    let profile_ok = profile(vec![expected.clone()]);
    let result =
      run_test(&profile_ok, &[beginner_rule()], &ScoringConfig::default(), "qa").unwrap();
    assert!(result.contribution_mismatches.is_empty());
    assert!(result.passed);

    expected.expected_contribution = Some(0.9);
    let profile_off = profile(vec![expected]);
    let result =
      run_test(&profile_off, &[beginner_rule()], &ScoringConfig::default(), "qa").unwrap();
    assert_eq!(result.contribution_mismatches.len(), 1);
    assert!((result.contribution_mismatches[0].actual - 0.5).abs() < 1e-9);
    assert!(!result.passed);
  }

  #[test]
  fn bad_configuration_is_a_test_execution_error() {
    let profile = profile(vec![ExpectedRule::fires("R1")]);
    let config = ScoringConfig { coverage_weight: -1.0, ..ScoringConfig::default() };
    let err = run_test(&profile, &[beginner_rule()], &config, "qa").unwrap_err();
    assert!(matches!(err, Error::TestExecution(_)));
    assert!(profile.test_results.is_empty());
  }

  #[test]
  fn recording_appends_and_detects_regressions() {
    let mut profile = profile(vec![ExpectedRule::fires("R1")]);
    let config = ScoringConfig::default();

    let first = run_test(&profile, &[beginner_rule()], &config, "qa").unwrap();
    let first_id = first.id;
    record_result(&mut profile, first);

    let second = run_test(&profile, &[always("R2")], &config, "qa").unwrap();
    let regression = second.regression.clone().unwrap();
    assert_eq!(regression.previous_result_id, Some(first_id));
    assert_eq!(regression.newly_missed, ["R1"]);
    assert_eq!(regression.newly_unexpected, ["R2"]);
    assert_eq!(regression.accuracy_delta, -100.0);
    assert!(regression.is_regression());
    record_result(&mut profile, second);

    assert_eq!(profile.usage.run_count, 2);
    assert_eq!(profile.test_results.len(), 2);
    assert_eq!(profile.test_results[0].id, first_id);
    assert_eq!(profile.usage.last_run_at, Some(profile.test_results[1].run_at));
  }

  #[test]
  fn new_profile_validates_names() {
    let err = new_profile(
      NewTestProfile {
        domain_id:      String::new(),
        name:           "p".into(),
        description:    String::new(),
        facts:          FactSet::new(),
        expected_rules: vec![ExpectedRule::fires(" ")],
      },
      Utc::now(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Validation(ref issues) if issues.len() == 2));
  }

  #[test]
  fn profile_input_with_null_fact_leaves_key_missing() {
    let input: NewTestProfile = serde_json::from_value(serde_json::json!({
      "domainId": "web-dev",
      "name": "beginner",
      "facts": { "experience": "beginner", "mentor": null },
      "expectedRules": [{ "ruleName": "R1", "shouldFire": true }],
    }))
    .unwrap();
    assert_eq!(input.facts.len(), 1);
    assert!(input.facts.get("mentor").is_none());

    let profile = new_profile(input, Utc::now()).unwrap();
    let result = run_test(&profile, &[beginner_rule()], &ScoringConfig::default(), "qa").unwrap();
    assert_eq!(result.matched_expected, ["R1"]);
  }
}
