//! Rule lifecycle — version history and the publish state machine.
//!
//! Versions are append-only. Publishing points the rule at one historical
//! version; rolling back is publishing an older number again. Nothing here
//! touches storage: backends load a [`Rule`], apply one of these functions
//! inside a write transaction and persist the result.
//!
//! ```text
//! draft ──publish──▶ active ◀──reactivate/publish── inactive
//!                      │  └────────deactivate────────▶ │
//!                      └──────────archive──────────────┴──▶ archived
//! ```

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  Error, Result,
  rule::{NewRule, Rule, RuleBody, RuleStatus, RuleVersion},
};

impl RuleStatus {
  /// Whether the state machine has an edge from `self` to `to`.
  /// Self-loops on `active` model republishing.
  pub fn can_transition_to(self, to: RuleStatus) -> bool {
    use RuleStatus::*;
    matches!(
      (self, to),
      (Draft, Active)
        | (Active, Active)
        | (Active, Inactive)
        | (Inactive, Active)
        | (Active, Archived)
        | (Inactive, Archived)
    )
  }
}

fn transition(rule: &mut Rule, to: RuleStatus, now: DateTime<Utc>) -> Result<()> {
  if !rule.status.can_transition_to(to) {
    return Err(Error::InvalidTransition { from: rule.status, to });
  }
  rule.status = to;
  rule.updated_at = now;
  Ok(())
}

fn build_version(number: u32, body: RuleBody, user: &str, now: DateTime<Utc>) -> RuleVersion {
  RuleVersion {
    version:      number,
    match_mode:   body.match_mode,
    conditions:   body.conditions,
    actions:      body.actions,
    priority:     body.priority,
    explanation:  body.explanation,
    is_published: false,
    published_at: None,
    created_by:   user.to_owned(),
    created_at:   now,
  }
}

// ─── Creation ────────────────────────────────────────────────────────────────

/// Validate `input` and build a draft rule holding it as version 1.
pub fn new_rule(input: NewRule, user: &str, now: DateTime<Utc>) -> Result<Rule> {
  input.validate()?;

  Ok(Rule {
    id:                Uuid::new_v4(),
    domain_id:         input.domain_id,
    title:             input.title,
    status:            RuleStatus::Draft,
    published_version: None,
    last_published_at: None,
    last_published_by: None,
    versions:          vec![build_version(1, input.body, user, now)],
    created_by:        user.to_owned(),
    created_at:        now,
    updated_at:        now,
  })
}

/// Append a new version numbered `len(versions) + 1`.
///
/// Neither the status nor the published snapshot changes; the new version
/// only goes live once published.
pub fn create_version<'r>(
  rule: &'r mut Rule,
  body: RuleBody,
  user: &str,
  now: DateTime<Utc>,
) -> Result<&'r RuleVersion> {
  if rule.status == RuleStatus::Archived {
    return Err(Error::RuleArchived(rule.id));
  }
  body.validate()?;

  let number = rule.versions.len() as u32 + 1;
  rule.versions.push(build_version(number, body, user, now));
  rule.updated_at = now;

  tracing::debug!(rule_id = %rule.id, version = number, "created rule version");
  Ok(&rule.versions[rule.versions.len() - 1])
}

// ─── Publishing ──────────────────────────────────────────────────────────────

/// Make `version` the live configuration and mark the rule active. Returns
/// the version that was live before, if any.
///
/// Flags on previously published versions are left as they are; the
/// history only ever gains information.
pub fn publish_version(
  rule: &mut Rule,
  version: u32,
  user: &str,
  now: DateTime<Utc>,
) -> Result<Option<u32>> {
  let rule_id = rule.id;
  if rule.version(version).is_none() {
    return Err(Error::VersionNotFound { rule_id, version });
  }

  transition(rule, RuleStatus::Active, now)?;

  if let Some(entry) = rule.versions.iter_mut().find(|v| v.version == version)
    && !entry.is_published
  {
    entry.is_published = true;
    entry.published_at = Some(now);
  }

  let previous = rule.published_version.replace(version);
  rule.last_published_at = Some(now);
  rule.last_published_by = Some(user.to_owned());

  tracing::info!(%rule_id, version, ?previous, user, "published rule version");
  Ok(previous)
}

/// Republish an earlier version verbatim, including its priority and match
/// mode. This does not restore the state from before the last publish.
pub fn rollback_to_version(
  rule: &mut Rule,
  version: u32,
  user: &str,
  now: DateTime<Utc>,
) -> Result<Option<u32>> {
  publish_version(rule, version, user, now)
}

// ─── Status changes ──────────────────────────────────────────────────────────

/// Terminal: archived rules are never loaded for matching again.
pub fn archive(rule: &mut Rule, now: DateTime<Utc>) -> Result<()> {
  transition(rule, RuleStatus::Archived, now)
}

pub fn deactivate(rule: &mut Rule, now: DateTime<Utc>) -> Result<()> {
  transition(rule, RuleStatus::Inactive, now)
}

pub fn reactivate(rule: &mut Rule, now: DateTime<Utc>) -> Result<()> {
  if rule.status != RuleStatus::Inactive {
    return Err(Error::InvalidTransition { from: rule.status, to: RuleStatus::Active });
  }
  transition(rule, RuleStatus::Active, now)
}

/// A status change that is not a publish, as passed to stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
  Archive,
  Deactivate,
  Reactivate,
}

impl StatusChange {
  pub fn apply(self, rule: &mut Rule, now: DateTime<Utc>) -> Result<()> {
    match self {
      Self::Archive => archive(rule, now),
      Self::Deactivate => deactivate(rule, now),
      Self::Reactivate => reactivate(rule, now),
    }
  }

  pub fn target(self) -> RuleStatus {
    match self {
      Self::Archive => RuleStatus::Archived,
      Self::Deactivate => RuleStatus::Inactive,
      Self::Reactivate => RuleStatus::Active,
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::Duration;

  use super::*;
  use crate::rule::{Action, ActionKind, Condition, MatchMode, Operator};

  fn body(priority: u8, skill: &str) -> RuleBody {
    RuleBody {
      match_mode:  MatchMode::All,
      conditions:  vec![Condition::new("experience", Operator::Equals, "beginner")],
      actions:     vec![Action::new(ActionKind::RecommendSkill, skill)],
      priority,
      explanation: format!("recommend {skill}"),
    }
  }

  fn draft() -> Rule {
    let input = NewRule {
      domain_id: "web-dev".into(),
      title:     "R1".into(),
      body:      body(5, "HTML"),
    };
    new_rule(input, "alice", Utc::now()).unwrap()
  }

  #[test]
  fn new_rule_starts_as_unpublished_draft() {
    let rule = draft();
    assert_eq!(rule.status, RuleStatus::Draft);
    assert_eq!(rule.versions.len(), 1);
    assert_eq!(rule.versions[0].version, 1);
    assert!(rule.published_version.is_none());
    assert!(rule.current().is_none());
  }

  #[test]
  fn new_rule_rejects_invalid_input() {
    let mut input = NewRule {
      domain_id: "web-dev".into(),
      title:     "R1".into(),
      body:      body(0, "HTML"),
    };
    input.body.conditions[0].operator = Operator::Unknown("like".into());
    assert!(matches!(new_rule(input, "alice", Utc::now()), Err(Error::Validation(_))));
  }

  #[test]
  fn create_version_does_not_touch_live_snapshot() {
    let mut rule = draft();
    let now = Utc::now();
    publish_version(&mut rule, 1, "alice", now).unwrap();

    let created = create_version(&mut rule, body(9, "CSS"), "bob", now).unwrap();
    assert_eq!(created.version, 2);
    assert!(!created.is_published);

    let current = rule.current().unwrap();
    assert_eq!(current.version, 1);
    assert_eq!(current.priority, 5);
    assert_eq!(rule.status, RuleStatus::Active);
  }

  #[test]
  fn publish_copies_version_into_snapshot() {
    let mut rule = draft();
    let now = Utc::now();
    create_version(&mut rule, body(8, "CSS"), "bob", now).unwrap();
    publish_version(&mut rule, 2, "carol", now).unwrap();

    assert_eq!(rule.status, RuleStatus::Active);
    assert_eq!(rule.published_version, Some(2));
    assert_eq!(rule.last_published_by.as_deref(), Some("carol"));
    assert_eq!(rule.last_published_at, Some(now));

    let current = rule.current().unwrap();
    assert_eq!(current.priority, 8);
    assert_eq!(current.explanation, "recommend CSS");
    assert!(rule.version(2).unwrap().is_published);
    assert!(!rule.version(1).unwrap().is_published);
  }

  #[test]
  fn publish_unknown_version_fails() {
    let mut rule = draft();
    let err = publish_version(&mut rule, 7, "alice", Utc::now()).unwrap_err();
    assert!(matches!(err, Error::VersionNotFound { version: 7, .. }));
    assert_eq!(rule.status, RuleStatus::Draft);
  }

  #[test]
  fn publish_twice_is_idempotent_on_snapshot() {
    let mut rule = draft();
    let first = Utc::now();
    publish_version(&mut rule, 1, "alice", first).unwrap();
    let snapshot = rule.view().current;

    publish_version(&mut rule, 1, "alice", first + Duration::seconds(5)).unwrap();
    assert_eq!(rule.view().current, snapshot);
    assert_eq!(rule.version(1).unwrap().published_at, Some(first));
  }

  #[test]
  fn rollback_republishes_without_reusing_numbers() {
    let mut rule = draft();
    let now = Utc::now();
    assert_eq!(publish_version(&mut rule, 1, "alice", now).unwrap(), None);

    for round in 0..5 {
      let v = create_version(&mut rule, body(3, "CSS"), "bob", now).unwrap().version;
      assert_eq!(publish_version(&mut rule, v, "bob", now).unwrap(), Some(1));
      assert_eq!(rollback_to_version(&mut rule, 1, "bob", now).unwrap(), Some(v));
      assert_eq!(v, round + 2);
    }

    let numbers: Vec<u32> = rule.versions.iter().map(|v| v.version).collect();
    assert_eq!(numbers, (1..=6).collect::<Vec<_>>());
    assert_eq!(rule.current().unwrap().version, 1);
    assert!(rule.versions.iter().all(|v| v.is_published));
  }

  #[test]
  fn archive_is_terminal() {
    let mut rule = draft();
    let now = Utc::now();
    assert!(matches!(archive(&mut rule, now), Err(Error::InvalidTransition { .. })));

    publish_version(&mut rule, 1, "alice", now).unwrap();
    archive(&mut rule, now).unwrap();
    assert_eq!(rule.status, RuleStatus::Archived);

    assert!(publish_version(&mut rule, 1, "alice", now).is_err());
    assert!(reactivate(&mut rule, now).is_err());
    assert!(create_version(&mut rule, body(5, "CSS"), "bob", now).is_err());
  }

  #[test]
  fn deactivate_and_reactivate() {
    let mut rule = draft();
    let now = Utc::now();
    assert!(deactivate(&mut rule, now).is_err());

    publish_version(&mut rule, 1, "alice", now).unwrap();
    deactivate(&mut rule, now).unwrap();
    assert_eq!(rule.status, RuleStatus::Inactive);
    assert!(deactivate(&mut rule, now).is_err());

    reactivate(&mut rule, now).unwrap();
    assert_eq!(rule.status, RuleStatus::Active);
    assert!(reactivate(&mut rule, now).is_err());
  }

  #[test]
  fn status_change_dispatch() {
    let mut rule = draft();
    let now = Utc::now();
    publish_version(&mut rule, 1, "alice", now).unwrap();

    for change in [StatusChange::Deactivate, StatusChange::Reactivate, StatusChange::Archive] {
      change.apply(&mut rule, now).unwrap();
      assert_eq!(rule.status, change.target());
    }
  }
}
