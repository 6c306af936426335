//! Rule types — conditions, actions and the versioned rule record.
//!
//! A rule persists only its version history and the number of the published
//! version. The live configuration ("current" fields) is derived on read via
//! [`Rule::current`] and is never stored separately.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{Error, Result, fact::Value};

/// Inclusive bounds for [`RuleBody::priority`].
pub const PRIORITY_RANGE: std::ops::RangeInclusive<u8> = 1..=10;

// ─── Enumerations ────────────────────────────────────────────────────────────

/// How a rule combines its condition outcomes.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display,
  EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MatchMode {
  /// Every condition must hold. Vacuously true with no conditions.
  #[default]
  All,
  /// At least one condition must hold. Vacuously false with no conditions.
  Any,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display,
  EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RuleStatus {
  Draft,
  Active,
  Inactive,
  Archived,
}

/// Comparison applied by a [`Condition`].
///
/// Operator names outside the supported set parse into [`Operator::Unknown`]
/// so that stored rules always load; validation rejects them and the
/// evaluator treats them as a failed condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
  Equals,
  NotEquals,
  In,
  NotIn,
  GreaterThan,
  LessThan,
  Contains,
  Unknown(String),
}

impl Operator {
  pub fn as_str(&self) -> &str {
    match self {
      Self::Equals => "equals",
      Self::NotEquals => "not_equals",
      Self::In => "in",
      Self::NotIn => "not_in",
      Self::GreaterThan => "greater_than",
      Self::LessThan => "less_than",
      Self::Contains => "contains",
      Self::Unknown(raw) => raw,
    }
  }
}

impl FromStr for Operator {
  type Err = std::convert::Infallible;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(match s {
      "equals" => Self::Equals,
      "not_equals" => Self::NotEquals,
      "in" => Self::In,
      "not_in" => Self::NotIn,
      "greater_than" => Self::GreaterThan,
      "less_than" => Self::LessThan,
      "contains" => Self::Contains,
      other => Self::Unknown(other.to_owned()),
    })
  }
}

impl fmt::Display for Operator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl Serialize for Operator {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(self.as_str())
  }
}

impl<'de> Deserialize<'de> for Operator {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    let Ok(op) = raw.parse::<Operator>();
    Ok(op)
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display,
  EnumString, AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ActionKind {
  RecommendSkill,
  RecommendResource,
  RecommendProject,
  AddScore,
  AddWarning,
}

// ─── Condition ───────────────────────────────────────────────────────────────

/// A single test of one fact against an expected value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
  pub fact_key: String,
  pub operator: Operator,
  pub value:    Value,
}

impl Condition {
  pub fn new(fact_key: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
    Self { fact_key: fact_key.into(), operator, value: value.into() }
  }

  fn validate(&self, path: &str, issues: &mut Vec<String>) {
    if self.fact_key.trim().is_empty() {
      issues.push(format!("{path}.factKey must not be empty"));
    }

    let shape_ok = match &self.operator {
      Operator::Unknown(raw) => {
        issues.push(format!("{path}.operator {raw:?} is not supported"));
        return;
      }
      Operator::Equals | Operator::NotEquals => true,
      Operator::In | Operator::NotIn => self.value.as_array().is_some(),
      Operator::GreaterThan | Operator::LessThan => self
        .value
        .as_scalar()
        .and_then(|s| s.as_number())
        .is_some(),
      Operator::Contains => self.value.as_scalar().is_some(),
    };

    if !shape_ok {
      let expected = match self.operator {
        Operator::In | Operator::NotIn => "an array",
        Operator::GreaterThan | Operator::LessThan => "a number",
        _ => "a scalar",
      };
      issues.push(format!(
        "{path}.value must be {expected} for operator {}",
        self.operator
      ));
    }
  }
}

// ─── Action ──────────────────────────────────────────────────────────────────

/// Payload of an [`Action`]: a name, a number (for `addScore`) or a
/// structured object (e.g. a resource with a title and URL).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionValue {
  Number(f64),
  Text(String),
  Payload(serde_json::Map<String, serde_json::Value>),
}

impl ActionValue {
  /// Key used to deduplicate recommendations.
  pub fn dedup_key(&self) -> String {
    match self {
      Self::Number(n) => n.to_string(),
      Self::Text(s) => s.clone(),
      Self::Payload(map) => serde_json::Value::Object(map.clone()).to_string(),
    }
  }

  pub fn as_number(&self) -> Option<f64> {
    match self {
      Self::Number(n) => Some(*n),
      _ => None,
    }
  }
}

impl From<&str> for ActionValue {
  fn from(s: &str) -> Self { Self::Text(s.to_owned()) }
}

impl From<f64> for ActionValue {
  fn from(n: f64) -> Self { Self::Number(n) }
}

fn default_weight() -> f64 { 1.0 }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
  #[serde(rename = "type")]
  pub kind:   ActionKind,
  pub value:  ActionValue,
  #[serde(default = "default_weight")]
  pub weight: f64,
}

impl Action {
  pub fn new(kind: ActionKind, value: impl Into<ActionValue>) -> Self {
    Self { kind, value: value.into(), weight: default_weight() }
  }

  pub fn weighted(mut self, weight: f64) -> Self {
    self.weight = weight;
    self
  }

  /// Every action except `addWarning` counts towards a rule's contribution.
  pub fn is_positive(&self) -> bool { self.kind != ActionKind::AddWarning }

  fn validate(&self, path: &str, issues: &mut Vec<String>) {
    if !self.weight.is_finite() || self.weight < 0.0 {
      issues.push(format!("{path}.weight must be a finite, non-negative number"));
    }

    match (self.kind, &self.value) {
      (ActionKind::AddScore, ActionValue::Number(n)) if n.is_finite() => {}
      (ActionKind::AddScore, _) => {
        issues.push(format!("{path}.value must be a finite number for addScore"));
      }
      (ActionKind::AddWarning, ActionValue::Text(s)) if !s.trim().is_empty() => {}
      (ActionKind::AddWarning, _) => {
        issues.push(format!("{path}.value must be non-empty text for addWarning"));
      }
      (_, ActionValue::Text(s)) if !s.trim().is_empty() => {}
      (_, ActionValue::Payload(_)) => {}
      (kind, _) => issues.push(format!(
        "{path}.value must be non-empty text or an object for {kind}"
      )),
    }
  }
}

// ─── Rule body ───────────────────────────────────────────────────────────────

fn default_priority() -> u8 { 5 }

/// The versioned part of a rule: everything a new version may change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleBody {
  #[serde(default)]
  pub match_mode:  MatchMode,
  #[serde(default)]
  pub conditions:  Vec<Condition>,
  #[serde(default)]
  pub actions:     Vec<Action>,
  #[serde(default = "default_priority")]
  pub priority:    u8,
  #[serde(default)]
  pub explanation: String,
}

impl RuleBody {
  /// Reject malformed shapes before anything is stored.
  pub fn validate(&self) -> Result<()> {
    let mut issues = Vec::new();
    self.collect_issues(&mut issues);
    if issues.is_empty() { Ok(()) } else { Err(Error::Validation(issues)) }
  }

  fn collect_issues(&self, issues: &mut Vec<String>) {
    if !PRIORITY_RANGE.contains(&self.priority) {
      issues.push(format!(
        "priority must be between {} and {}, got {}",
        PRIORITY_RANGE.start(),
        PRIORITY_RANGE.end(),
        self.priority
      ));
    }
    for (i, condition) in self.conditions.iter().enumerate() {
      condition.validate(&format!("conditions[{i}]"), issues);
    }
    for (i, action) in self.actions.iter().enumerate() {
      action.validate(&format!("actions[{i}]"), issues);
    }
  }
}

// ─── NewRule ─────────────────────────────────────────────────────────────────

/// Input to rule creation. The body becomes version 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRule {
  pub domain_id: String,
  pub title:     String,
  #[serde(flatten)]
  pub body:      RuleBody,
}

impl NewRule {
  pub fn validate(&self) -> Result<()> {
    let mut issues = Vec::new();
    if self.domain_id.trim().is_empty() {
      issues.push("domainId must not be empty".to_owned());
    }
    if self.title.trim().is_empty() {
      issues.push("title must not be empty".to_owned());
    }
    self.body.collect_issues(&mut issues);
    if issues.is_empty() { Ok(()) } else { Err(Error::Validation(issues)) }
  }
}

// ─── Versions ────────────────────────────────────────────────────────────────

/// One immutable entry in a rule's history. Only the publish flag and
/// timestamp are ever written after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleVersion {
  pub version:      u32,
  pub match_mode:   MatchMode,
  pub conditions:   Vec<Condition>,
  pub actions:      Vec<Action>,
  pub priority:     u8,
  pub explanation:  String,
  pub is_published: bool,
  pub published_at: Option<DateTime<Utc>>,
  pub created_by:   String,
  pub created_at:   DateTime<Utc>,
}

impl RuleVersion {
  pub fn body(&self) -> RuleBody {
    RuleBody {
      match_mode:  self.match_mode,
      conditions:  self.conditions.clone(),
      actions:     self.actions.clone(),
      priority:    self.priority,
      explanation: self.explanation.clone(),
    }
  }
}

// ─── Rule ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
  pub id:                Uuid,
  pub domain_id:         String,
  pub title:             String,
  pub status:            RuleStatus,
  pub published_version: Option<u32>,
  pub last_published_at: Option<DateTime<Utc>>,
  pub last_published_by: Option<String>,
  pub versions:          Vec<RuleVersion>,
  pub created_by:        String,
  pub created_at:        DateTime<Utc>,
  pub updated_at:        DateTime<Utc>,
}

/// The live configuration of a rule, borrowed from its published version.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot<'a> {
  pub title:       &'a str,
  pub version:     u32,
  pub match_mode:  MatchMode,
  pub priority:    u8,
  pub conditions:  &'a [Condition],
  pub actions:     &'a [Action],
  pub explanation: &'a str,
}

impl Rule {
  pub fn version(&self, number: u32) -> Option<&RuleVersion> {
    self.versions.iter().find(|v| v.version == number)
  }

  pub fn latest_version(&self) -> u32 {
    self.versions.iter().map(|v| v.version).max().unwrap_or(0)
  }

  /// Derive the current snapshot from the published version. `None` until
  /// the rule is first published.
  pub fn current(&self) -> Option<Snapshot<'_>> {
    let published = self.version(self.published_version?)?;
    Some(Snapshot {
      title:       &self.title,
      version:     published.version,
      match_mode:  published.match_mode,
      priority:    published.priority,
      conditions:  &published.conditions,
      actions:     &published.actions,
      explanation: &published.explanation,
    })
  }

  pub fn view(&self) -> RuleView {
    RuleView {
      id:                self.id,
      domain_id:         self.domain_id.clone(),
      title:             self.title.clone(),
      status:            self.status,
      published_version: self.published_version,
      latest_version:    self.latest_version(),
      current:           self
        .published_version
        .and_then(|v| self.version(v))
        .map(RuleVersion::body),
      last_published_at: self.last_published_at,
      last_published_by: self.last_published_by.clone(),
      updated_at:        self.updated_at,
    }
  }
}

// ─── Read model ──────────────────────────────────────────────────────────────

/// Flattened admin view of a rule — never stored, always derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleView {
  pub id:                Uuid,
  pub domain_id:         String,
  pub title:             String,
  pub status:            RuleStatus,
  pub published_version: Option<u32>,
  pub latest_version:    u32,
  pub current:           Option<RuleBody>,
  pub last_published_at: Option<DateTime<Utc>>,
  pub last_published_by: Option<String>,
  pub updated_at:        DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn body(conditions: Vec<Condition>, actions: Vec<Action>) -> RuleBody {
    RuleBody {
      match_mode: MatchMode::All,
      conditions,
      actions,
      priority: 5,
      explanation: String::new(),
    }
  }

  #[test]
  fn operator_roundtrips_known_and_unknown_names() {
    let op: Operator = serde_json::from_value(json!("not_in")).unwrap();
    assert_eq!(op, Operator::NotIn);

    let op: Operator = serde_json::from_value(json!("matches_regex")).unwrap();
    assert_eq!(op, Operator::Unknown("matches_regex".into()));
    assert_eq!(serde_json::to_value(&op).unwrap(), json!("matches_regex"));
  }

  #[test]
  fn wire_names_follow_storage_contract() {
    let condition: Condition = serde_json::from_value(json!({
      "factKey": "experience",
      "operator": "equals",
      "value": "beginner",
    }))
    .unwrap();
    assert_eq!(condition, Condition::new("experience", Operator::Equals, "beginner"));

    let action: Action = serde_json::from_value(json!({
      "type": "recommendSkill",
      "value": "HTML",
    }))
    .unwrap();
    assert_eq!(action.kind, ActionKind::RecommendSkill);
    assert_eq!(action.weight, 1.0);

    assert_eq!(ActionKind::RecommendProject.as_ref(), "recommendProject");
    assert_eq!(RuleStatus::Archived.to_string(), "archived");
  }

  #[test]
  fn validation_collects_every_issue() {
    let mut bad = body(
      vec![
        Condition::new("", Operator::Equals, "x"),
        Condition::new("years", Operator::In, 3),
        Condition::new("years", Operator::GreaterThan, "many"),
        Condition::new("goal", Operator::Unknown("like".into()), "web"),
      ],
      vec![
        Action::new(ActionKind::AddScore, "lots"),
        Action::new(ActionKind::RecommendSkill, "CSS").weighted(-1.0),
      ],
    );
    bad.priority = 11;

    let Err(Error::Validation(issues)) = bad.validate() else {
      panic!("expected validation failure");
    };
    assert_eq!(issues.len(), 7, "{issues:?}");
  }

  #[test]
  fn numeric_text_is_accepted_for_ordering_operators() {
    let ok = body(
      vec![Condition::new("years", Operator::GreaterThan, "3")],
      vec![Action::new(ActionKind::RecommendSkill, "Rust")],
    );
    assert!(ok.validate().is_ok());
  }

  #[test]
  fn new_rule_requires_domain_and_title() {
    let rule = NewRule {
      domain_id: " ".into(),
      title:     String::new(),
      body:      body(vec![], vec![]),
    };
    let Err(Error::Validation(issues)) = rule.validate() else {
      panic!("expected validation failure");
    };
    assert_eq!(issues.len(), 2);
  }
}
