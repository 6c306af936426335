//! [`SqliteStore`] — the SQLite implementation of [`RuleStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use uuid::Uuid;

use pathway_core::{
  audit::{AuditEntry, RuleExecution, RuleMetrics},
  harness::{NewTestProfile, TestProfile, TestResult, new_profile, record_result},
  lifecycle::{self, StatusChange},
  rule::{NewRule, Rule, RuleBody, RuleStatus, RuleVersion},
  store::{Publication, RuleStore},
};

use crate::{
  Result,
  encode::{
    PROFILE_COLUMNS, RULE_COLUMNS, RawAuditEntry, RawMetrics, RawProfile, RawRule, RawVersion,
    VERSION_COLUMNS, encode_dt, encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Row access ──────────────────────────────────────────────────────────────

fn fetch_versions(conn: &rusqlite::Connection, rule_id: &str) -> rusqlite::Result<Vec<RawVersion>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {VERSION_COLUMNS} FROM rule_versions WHERE rule_id = ?1 ORDER BY version"
  ))?;
  let rows = stmt
    .query_map([rule_id], RawVersion::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

/// Select rules (aliased `r`) with `tail` appended, then attach versions.
fn fetch_rules(
  conn: &rusqlite::Connection,
  tail: &str,
  params: impl rusqlite::Params,
) -> rusqlite::Result<Vec<RawRule>> {
  let mut stmt = conn.prepare(&format!("SELECT {RULE_COLUMNS} FROM rules r {tail}"))?;
  let mut rules = stmt
    .query_map(params, RawRule::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  for rule in &mut rules {
    rule.versions = fetch_versions(conn, &rule.rule_id)?;
  }
  Ok(rules)
}

fn fetch_profiles(
  conn: &rusqlite::Connection,
  tail: &str,
  params: impl rusqlite::Params,
) -> rusqlite::Result<Vec<RawProfile>> {
  let mut stmt = conn.prepare(&format!("SELECT {PROFILE_COLUMNS} FROM test_profiles {tail}"))?;
  let mut profiles = stmt
    .query_map(params, RawProfile::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let mut results =
    conn.prepare("SELECT result_json FROM test_results WHERE profile_id = ?1 ORDER BY rowid")?;
  for profile in &mut profiles {
    profile.results = results
      .query_map([&profile.profile_id], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<String>>>()?;
  }
  Ok(profiles)
}

fn insert_version(conn: &rusqlite::Connection, rule_id: &str, v: &RuleVersion) -> Result<()> {
  conn.execute(
    "INSERT INTO rule_versions (
       rule_id, version, match_mode, conditions, actions, priority,
       explanation, is_published, published_at, created_by, created_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    rusqlite::params![
      rule_id,
      v.version,
      v.match_mode.as_ref(),
      serde_json::to_string(&v.conditions)?,
      serde_json::to_string(&v.actions)?,
      v.priority,
      v.explanation,
      v.is_published,
      v.published_at.map(encode_dt),
      v.created_by,
      encode_dt(v.created_at),
    ],
  )?;
  Ok(())
}

fn insert_rule(conn: &rusqlite::Connection, rule: &Rule) -> Result<()> {
  let id_str = encode_uuid(rule.id);
  conn.execute(
    "INSERT INTO rules (
       rule_id, domain_id, title, status, published_version,
       last_published_at, last_published_by, created_by, created_at, updated_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    rusqlite::params![
      id_str,
      rule.domain_id,
      rule.title,
      rule.status.as_ref(),
      rule.published_version,
      rule.last_published_at.map(encode_dt),
      rule.last_published_by,
      rule.created_by,
      encode_dt(rule.created_at),
      encode_dt(rule.updated_at),
    ],
  )?;
  for version in &rule.versions {
    insert_version(conn, &id_str, version)?;
  }
  Ok(())
}

/// Persist the changes a lifecycle function made to `rule`. Versions past
/// `known` are new; earlier ones only ever gain a publish flag.
fn update_rule(conn: &rusqlite::Connection, rule: &Rule, known: usize) -> Result<()> {
  let id_str = encode_uuid(rule.id);
  conn.execute(
    "UPDATE rules
        SET status = ?2, published_version = ?3, last_published_at = ?4,
            last_published_by = ?5, updated_at = ?6
      WHERE rule_id = ?1",
    rusqlite::params![
      id_str,
      rule.status.as_ref(),
      rule.published_version,
      rule.last_published_at.map(encode_dt),
      rule.last_published_by,
      encode_dt(rule.updated_at),
    ],
  )?;

  let (existing, added) = rule.versions.split_at(known.min(rule.versions.len()));
  for version in existing.iter().filter(|v| v.is_published) {
    conn.execute(
      "UPDATE rule_versions SET is_published = 1, published_at = ?3
        WHERE rule_id = ?1 AND version = ?2 AND is_published = 0",
      rusqlite::params![id_str, version.version, version.published_at.map(encode_dt)],
    )?;
  }
  for version in added {
    insert_version(conn, &id_str, version)?;
  }
  Ok(())
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Pathway rule store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted. All access
/// runs on the connection's own thread, so writes are serialized.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run `work` inside one `IMMEDIATE` transaction. It commits only if
  /// `work` succeeds; any error rolls everything back.
  async fn transact<R, F>(&self, work: F) -> Result<R>
  where
    R: Send + 'static,
    F: FnOnce(&rusqlite::Connection) -> Result<R> + Send + 'static,
  {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = work(&*tx);
        if outcome.is_ok() {
          tx.commit()?;
        }
        Ok(outcome)
      })
      .await?
  }

  /// Load a rule, apply a lifecycle function and persist the result as one
  /// atomic step.
  async fn mutate_rule<R, F>(&self, rule_id: Uuid, apply: F) -> Result<(R, Rule)>
  where
    R: Send + 'static,
    F: FnOnce(&mut Rule) -> pathway_core::Result<R> + Send + 'static,
  {
    let id_str = encode_uuid(rule_id);
    self
      .transact(move |conn| {
        let raw = fetch_rules(conn, "WHERE r.rule_id = ?1", [&id_str])?
          .pop()
          .ok_or(pathway_core::Error::RuleNotFound(rule_id))?;
        let mut rule = raw.into_rule()?;
        let known = rule.versions.len();
        let out = apply(&mut rule)?;
        update_rule(conn, &rule, known)?;
        Ok((out, rule))
      })
      .await
  }
}

// ─── RuleStore impl ──────────────────────────────────────────────────────────

impl RuleStore for SqliteStore {
  type Error = crate::Error;

  // ── Rules ─────────────────────────────────────────────────────────────────

  async fn create_rule(&self, input: NewRule, user: String) -> Result<Rule> {
    let rule = lifecycle::new_rule(input, &user, Utc::now())?;
    let stored = rule.clone();
    self.transact(move |conn| insert_rule(conn, &stored)).await?;
    tracing::info!(rule_id = %rule.id, domain_id = %rule.domain_id, "created rule");
    Ok(rule)
  }

  async fn get_rule(&self, id: Uuid) -> Result<Option<Rule>> {
    let id_str = encode_uuid(id);
    let raw: Option<RawRule> = self
      .conn
      .call(move |conn| Ok(fetch_rules(conn, "WHERE r.rule_id = ?1", [id_str])?.pop()))
      .await?;
    raw.map(RawRule::into_rule).transpose()
  }

  async fn list_rules(
    &self,
    domain_id: Option<String>,
    status: Option<RuleStatus>,
  ) -> Result<Vec<Rule>> {
    let status_str = status.map(|s| s.as_ref().to_owned());
    let raws: Vec<RawRule> = self
      .conn
      .call(move |conn| {
        Ok(fetch_rules(
          conn,
          "WHERE (?1 IS NULL OR r.domain_id = ?1)
             AND (?2 IS NULL OR r.status = ?2)
           ORDER BY r.created_at, r.rowid",
          rusqlite::params![domain_id, status_str],
        )?)
      })
      .await?;
    raws.into_iter().map(RawRule::into_rule).collect()
  }

  async fn load_active_rules(&self, domain_id: String) -> Result<Vec<Rule>> {
    let raws: Vec<RawRule> = self
      .conn
      .call(move |conn| {
        Ok(fetch_rules(
          conn,
          "LEFT JOIN rule_versions v
                 ON v.rule_id = r.rule_id AND v.version = r.published_version
           WHERE r.domain_id = ?1 AND r.status = 'active'
           ORDER BY v.priority DESC, r.created_at, r.rowid",
          [domain_id],
        )?)
      })
      .await?;
    raws.into_iter().map(RawRule::into_rule).collect()
  }

  async fn create_version(&self, rule_id: Uuid, body: RuleBody, user: String) -> Result<RuleVersion> {
    let now = Utc::now();
    let (version, _) = self
      .mutate_rule(rule_id, move |rule| {
        lifecycle::create_version(rule, body, &user, now).cloned()
      })
      .await?;
    Ok(version)
  }

  async fn publish_version(
    &self,
    rule_id: Uuid,
    version: u32,
    user: String,
  ) -> Result<Publication> {
    let now = Utc::now();
    let (previous, rule) = self
      .mutate_rule(rule_id, move |rule| lifecycle::publish_version(rule, version, &user, now))
      .await?;
    Ok(Publication { rule, previous })
  }

  async fn set_status(&self, rule_id: Uuid, change: StatusChange) -> Result<Rule> {
    let now = Utc::now();
    let ((), rule) = self
      .mutate_rule(rule_id, move |rule| change.apply(rule, now))
      .await?;
    tracing::info!(%rule_id, status = %rule.status, "changed rule status");
    Ok(rule)
  }

  // ── Metrics sink ──────────────────────────────────────────────────────────

  async fn record_executions(&self, executions: Vec<RuleExecution>) -> Result<()> {
    self
      .transact(move |conn| {
        for execution in &executions {
          let id_str = encode_uuid(execution.rule_id);
          let raw = conn
            .query_row(
              "SELECT total_executions, successful_matches, average_execution_time, last_executed
                 FROM rule_metrics WHERE rule_id = ?1",
              [&id_str],
              |row| {
                Ok(RawMetrics {
                  total_executions:       row.get(0)?,
                  successful_matches:     row.get(1)?,
                  average_execution_time: row.get(2)?,
                  last_executed:          row.get(3)?,
                })
              },
            )
            .optional()?;

          let mut metrics = raw.map(RawMetrics::into_metrics).transpose()?.unwrap_or_default();
          metrics.record(execution);

          conn.execute(
            "INSERT INTO rule_metrics (
               rule_id, total_executions, successful_matches,
               average_execution_time, last_executed
             ) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (rule_id) DO UPDATE SET
               total_executions       = excluded.total_executions,
               successful_matches     = excluded.successful_matches,
               average_execution_time = excluded.average_execution_time,
               last_executed          = excluded.last_executed",
            rusqlite::params![
              id_str,
              metrics.total_executions as i64,
              metrics.successful_matches as i64,
              metrics.average_execution_time,
              metrics.last_executed.map(encode_dt),
            ],
          )?;
        }
        Ok(())
      })
      .await
  }

  async fn get_metrics(&self, rule_id: Uuid) -> Result<Option<RuleMetrics>> {
    let id_str = encode_uuid(rule_id);
    let raw: Option<RawMetrics> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT total_executions, successful_matches, average_execution_time, last_executed
               FROM rule_metrics WHERE rule_id = ?1",
            [id_str],
            |row| {
              Ok(RawMetrics {
                total_executions:       row.get(0)?,
                successful_matches:     row.get(1)?,
                average_execution_time: row.get(2)?,
                last_executed:          row.get(3)?,
              })
            },
          )
          .optional()?)
      })
      .await?;
    raw.map(RawMetrics::into_metrics).transpose()
  }

  // ── Audit ─────────────────────────────────────────────────────────────────

  async fn append_audit(&self, entry: AuditEntry) -> Result<()> {
    let id_str      = encode_uuid(entry.id);
    let event_str   = entry.event.as_ref().to_owned();
    let subject_str = entry.subject_id.map(encode_uuid);
    let payload_str = serde_json::to_string(&entry.payload)?;
    let at_str      = encode_dt(entry.recorded_at);
    let actor       = entry.actor;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO audit_log (entry_id, event, subject_id, actor, payload, recorded_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![id_str, event_str, subject_str, actor, payload_str, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_audit(&self, limit: usize) -> Result<Vec<AuditEntry>> {
    let limit_val = i64::try_from(limit).unwrap_or(i64::MAX);
    let raws: Vec<RawAuditEntry> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT entry_id, event, subject_id, actor, payload, recorded_at
             FROM audit_log ORDER BY rowid DESC LIMIT ?1",
        )?;
        let rows = stmt
          .query_map([limit_val], |row| {
            Ok(RawAuditEntry {
              entry_id:    row.get(0)?,
              event:       row.get(1)?,
              subject_id:  row.get(2)?,
              actor:       row.get(3)?,
              payload:     row.get(4)?,
              recorded_at: row.get(5)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawAuditEntry::into_entry).collect()
  }

  // ── Test profiles ─────────────────────────────────────────────────────────

  async fn add_test_profile(&self, input: NewTestProfile) -> Result<TestProfile> {
    let profile = new_profile(input, Utc::now())?;

    let id_str       = encode_uuid(profile.id);
    let domain_id    = profile.domain_id.clone();
    let name         = profile.name.clone();
    let description  = profile.description.clone();
    let facts_str    = serde_json::to_string(&profile.facts)?;
    let expected_str = serde_json::to_string(&profile.expected_rules)?;
    let at_str       = encode_dt(profile.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO test_profiles (
             profile_id, domain_id, name, description, facts, expected_rules, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![
            id_str,
            domain_id,
            name,
            description,
            facts_str,
            expected_str,
            at_str
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(profile)
  }

  async fn get_test_profile(&self, id: Uuid) -> Result<Option<TestProfile>> {
    let id_str = encode_uuid(id);
    let raw: Option<RawProfile> = self
      .conn
      .call(move |conn| Ok(fetch_profiles(conn, "WHERE profile_id = ?1", [id_str])?.pop()))
      .await?;
    raw.map(RawProfile::into_profile).transpose()
  }

  async fn list_test_profiles(&self, domain_id: Option<String>) -> Result<Vec<TestProfile>> {
    let raws: Vec<RawProfile> = self
      .conn
      .call(move |conn| {
        Ok(fetch_profiles(
          conn,
          "WHERE (?1 IS NULL OR domain_id = ?1) ORDER BY created_at, rowid",
          [domain_id],
        )?)
      })
      .await?;
    raws.into_iter().map(RawProfile::into_profile).collect()
  }

  async fn append_test_result(&self, result: TestResult) -> Result<TestProfile> {
    let profile_id = result.profile_id;
    let id_str = encode_uuid(profile_id);
    self
      .transact(move |conn| {
        let mut profile = fetch_profiles(conn, "WHERE profile_id = ?1", [&id_str])?
          .pop()
          .ok_or(pathway_core::Error::ProfileNotFound(profile_id))?
          .into_profile()?;

        conn.execute(
          "INSERT INTO test_results (result_id, profile_id, run_at, passed, accuracy, result_json)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![
            encode_uuid(result.id),
            id_str,
            encode_dt(result.run_at),
            result.passed,
            result.accuracy,
            serde_json::to_string(&result)?,
          ],
        )?;

        record_result(&mut profile, result);
        conn.execute(
          "UPDATE test_profiles SET run_count = ?2, last_run_at = ?3 WHERE profile_id = ?1",
          rusqlite::params![
            id_str,
            profile.usage.run_count as i64,
            profile.usage.last_run_at.map(encode_dt),
          ],
        )?;
        Ok(profile)
      })
      .await
  }
}
