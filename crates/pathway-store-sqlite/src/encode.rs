//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings. Conditions, actions, fact
//! sets and test results are stored as compact JSON. Enumerations use their
//! `strum` string forms. UUIDs are stored as hyphenated lowercase strings.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use pathway_core::{
  audit::{AuditEntry, RuleMetrics},
  harness::{ProfileUsage, TestProfile, TestResult},
  rule::{Rule, RuleVersion},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

/// Parse a `strum`-encoded enum column.
pub fn decode_enum<T: FromStr>(s: &str, what: &str) -> Result<T> {
  s.parse()
    .map_err(|_| Error::Decode(format!("unknown {what}: {s:?}")))
}

fn decode_int<T: TryFrom<i64>>(n: i64, what: &str) -> Result<T> {
  T::try_from(n).map_err(|_| Error::Decode(format!("{what} out of range: {n}")))
}

// ─── Rules ───────────────────────────────────────────────────────────────────

pub const RULE_COLUMNS: &str = "r.rule_id, r.domain_id, r.title, r.status, r.published_version,
   r.last_published_at, r.last_published_by, r.created_by, r.created_at, r.updated_at";

pub const VERSION_COLUMNS: &str = "version, match_mode, conditions, actions, priority,
   explanation, is_published, published_at, created_by, created_at";

/// Raw strings read directly from a `rule_versions` row.
pub struct RawVersion {
  pub version:      i64,
  pub match_mode:   String,
  pub conditions:   String,
  pub actions:      String,
  pub priority:     i64,
  pub explanation:  String,
  pub is_published: bool,
  pub published_at: Option<String>,
  pub created_by:   String,
  pub created_at:   String,
}

impl RawVersion {
  /// Columns in [`VERSION_COLUMNS`] order.
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      version:      row.get(0)?,
      match_mode:   row.get(1)?,
      conditions:   row.get(2)?,
      actions:      row.get(3)?,
      priority:     row.get(4)?,
      explanation:  row.get(5)?,
      is_published: row.get(6)?,
      published_at: row.get(7)?,
      created_by:   row.get(8)?,
      created_at:   row.get(9)?,
    })
  }

  pub fn into_version(self) -> Result<RuleVersion> {
    Ok(RuleVersion {
      version:      decode_int(self.version, "version")?,
      match_mode:   decode_enum(&self.match_mode, "match mode")?,
      conditions:   serde_json::from_str(&self.conditions)?,
      actions:      serde_json::from_str(&self.actions)?,
      priority:     decode_int(self.priority, "priority")?,
      explanation:  self.explanation,
      is_published: self.is_published,
      published_at: decode_opt_dt(self.published_at)?,
      created_by:   self.created_by,
      created_at:   decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read from a `rules` row plus its versions, oldest first.
pub struct RawRule {
  pub rule_id:           String,
  pub domain_id:         String,
  pub title:             String,
  pub status:            String,
  pub published_version: Option<i64>,
  pub last_published_at: Option<String>,
  pub last_published_by: Option<String>,
  pub created_by:        String,
  pub created_at:        String,
  pub updated_at:        String,
  pub versions:          Vec<RawVersion>,
}

impl RawRule {
  /// Columns in [`RULE_COLUMNS`] order; `versions` is filled separately.
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      rule_id:           row.get(0)?,
      domain_id:         row.get(1)?,
      title:             row.get(2)?,
      status:            row.get(3)?,
      published_version: row.get(4)?,
      last_published_at: row.get(5)?,
      last_published_by: row.get(6)?,
      created_by:        row.get(7)?,
      created_at:        row.get(8)?,
      updated_at:        row.get(9)?,
      versions:          Vec::new(),
    })
  }

  pub fn into_rule(self) -> Result<Rule> {
    Ok(Rule {
      id:                decode_uuid(&self.rule_id)?,
      domain_id:         self.domain_id,
      title:             self.title,
      status:            decode_enum(&self.status, "rule status")?,
      published_version: self
        .published_version
        .map(|v| decode_int(v, "published version"))
        .transpose()?,
      last_published_at: decode_opt_dt(self.last_published_at)?,
      last_published_by: self.last_published_by,
      versions:          self
        .versions
        .into_iter()
        .map(RawVersion::into_version)
        .collect::<Result<_>>()?,
      created_by:        self.created_by,
      created_at:        decode_dt(&self.created_at)?,
      updated_at:        decode_dt(&self.updated_at)?,
    })
  }
}

// ─── Metrics ─────────────────────────────────────────────────────────────────

pub struct RawMetrics {
  pub total_executions:       i64,
  pub successful_matches:     i64,
  pub average_execution_time: f64,
  pub last_executed:          Option<String>,
}

impl RawMetrics {
  pub fn into_metrics(self) -> Result<RuleMetrics> {
    Ok(RuleMetrics {
      total_executions:       decode_int(self.total_executions, "total executions")?,
      successful_matches:     decode_int(self.successful_matches, "successful matches")?,
      average_execution_time: self.average_execution_time,
      last_executed:          decode_opt_dt(self.last_executed)?,
    })
  }
}

// ─── Audit ───────────────────────────────────────────────────────────────────

pub struct RawAuditEntry {
  pub entry_id:    String,
  pub event:       String,
  pub subject_id:  Option<String>,
  pub actor:       Option<String>,
  pub payload:     String,
  pub recorded_at: String,
}

impl RawAuditEntry {
  pub fn into_entry(self) -> Result<AuditEntry> {
    Ok(AuditEntry {
      id:          decode_uuid(&self.entry_id)?,
      event:       decode_enum(&self.event, "audit event")?,
      subject_id:  self.subject_id.as_deref().map(decode_uuid).transpose()?,
      actor:       self.actor,
      payload:     serde_json::from_str(&self.payload)?,
      recorded_at: decode_dt(&self.recorded_at)?,
    })
  }
}

// ─── Test profiles ───────────────────────────────────────────────────────────

pub const PROFILE_COLUMNS: &str = "profile_id, domain_id, name, description, facts,
   expected_rules, run_count, last_run_at, created_at";

/// Raw strings read from a `test_profiles` row plus its result documents,
/// oldest first.
pub struct RawProfile {
  pub profile_id:     String,
  pub domain_id:      String,
  pub name:           String,
  pub description:    String,
  pub facts:          String,
  pub expected_rules: String,
  pub run_count:      i64,
  pub last_run_at:    Option<String>,
  pub created_at:     String,
  pub results:        Vec<String>,
}

impl RawProfile {
  /// Columns in [`PROFILE_COLUMNS`] order; `results` is filled separately.
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      profile_id:     row.get(0)?,
      domain_id:      row.get(1)?,
      name:           row.get(2)?,
      description:    row.get(3)?,
      facts:          row.get(4)?,
      expected_rules: row.get(5)?,
      run_count:      row.get(6)?,
      last_run_at:    row.get(7)?,
      created_at:     row.get(8)?,
      results:        Vec::new(),
    })
  }

  pub fn into_profile(self) -> Result<TestProfile> {
    Ok(TestProfile {
      id:             decode_uuid(&self.profile_id)?,
      domain_id:      self.domain_id,
      name:           self.name,
      description:    self.description,
      facts:          serde_json::from_str(&self.facts)?,
      expected_rules: serde_json::from_str(&self.expected_rules)?,
      test_results:   self
        .results
        .iter()
        .map(|json| serde_json::from_str::<TestResult>(json))
        .collect::<serde_json::Result<_>>()?,
      usage:          ProfileUsage {
        run_count:   decode_int(self.run_count, "run count")?,
        last_run_at: decode_opt_dt(self.last_run_at)?,
      },
      created_at:     decode_dt(&self.created_at)?,
    })
  }
}
