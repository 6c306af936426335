//! SQL schema for the Pathway SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Only the pointer to the live version is stored; the current title,
-- conditions and actions are read from rule_versions.
CREATE TABLE IF NOT EXISTS rules (
    rule_id           TEXT PRIMARY KEY,
    domain_id         TEXT NOT NULL,
    title             TEXT NOT NULL,
    status            TEXT NOT NULL,   -- 'draft' | 'active' | 'inactive' | 'archived'
    published_version INTEGER,
    last_published_at TEXT,
    last_published_by TEXT,
    created_by        TEXT NOT NULL,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

-- Versions are append-only; only the publish flags are ever updated.
CREATE TABLE IF NOT EXISTS rule_versions (
    rule_id      TEXT    NOT NULL REFERENCES rules(rule_id),
    version      INTEGER NOT NULL,
    match_mode   TEXT    NOT NULL,   -- 'all' | 'any'
    conditions   TEXT    NOT NULL,   -- JSON array
    actions      TEXT    NOT NULL,   -- JSON array
    priority     INTEGER NOT NULL CHECK (priority BETWEEN 1 AND 10),
    explanation  TEXT    NOT NULL,
    is_published INTEGER NOT NULL DEFAULT 0,
    published_at TEXT,
    created_by   TEXT    NOT NULL,
    created_at   TEXT    NOT NULL,
    UNIQUE (rule_id, version),
    CHECK  (version >= 1)
);

CREATE TABLE IF NOT EXISTS rule_metrics (
    rule_id                TEXT    PRIMARY KEY REFERENCES rules(rule_id),
    total_executions       INTEGER NOT NULL,
    successful_matches     INTEGER NOT NULL,
    average_execution_time REAL    NOT NULL,
    last_executed          TEXT
);

CREATE TABLE IF NOT EXISTS test_profiles (
    profile_id     TEXT PRIMARY KEY,
    domain_id      TEXT NOT NULL,
    name           TEXT NOT NULL,
    description    TEXT NOT NULL DEFAULT '',
    facts          TEXT NOT NULL,   -- JSON object
    expected_rules TEXT NOT NULL,   -- JSON array
    run_count      INTEGER NOT NULL DEFAULT 0,
    last_run_at    TEXT,
    created_at     TEXT NOT NULL
);

-- Results are strictly append-only.
-- No UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS test_results (
    result_id   TEXT PRIMARY KEY,
    profile_id  TEXT NOT NULL REFERENCES test_profiles(profile_id),
    run_at      TEXT NOT NULL,
    passed      INTEGER NOT NULL,
    accuracy    REAL NOT NULL,
    result_json TEXT NOT NULL
);

-- Append-only as well.
CREATE TABLE IF NOT EXISTS audit_log (
    entry_id    TEXT PRIMARY KEY,
    event       TEXT NOT NULL,
    subject_id  TEXT,
    actor       TEXT,
    payload     TEXT NOT NULL,   -- JSON
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS rules_domain_idx        ON rules(domain_id, status);
CREATE INDEX IF NOT EXISTS test_profiles_domain_idx ON test_profiles(domain_id);
CREATE INDEX IF NOT EXISTS test_results_profile_idx ON test_results(profile_id);

PRAGMA user_version = 1;
";
