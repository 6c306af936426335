//! `pathway` — command-line front end for the Pathway rule engine.
//!
//! Reads `pathway.toml` (or the path given with `--config`), layers
//! `PATHWAY_*` environment variables on top, opens the SQLite store and runs
//! one command. Results are printed to stdout as pretty JSON; logs go to
//! stderr.
//!
//! ```text
//! pathway rule create --file rule.json
//! pathway rule publish --rule <id> --version 2
//! pathway evaluate --domain web-dev --facts facts.json
//! pathway profile run-all --domain web-dev
//! ```
//!
//! Environment keys use `__` for nesting, e.g.
//! `PATHWAY_SCORING__COVERAGE_WEIGHT=0.4`.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use pathway_core::{
  Engine,
  fact::FactSet,
  harness::NewTestProfile,
  rule::{NewRule, RuleBody, RuleStatus},
  scoring::ScoringConfig,
};
use pathway_store_sqlite::SqliteStore;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::task::JoinSet;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "pathway", version, about = "Rule evaluation and versioning engine")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "pathway.toml")]
  config: PathBuf,

  /// Acting user recorded on versions, publishes and test runs.
  #[arg(short, long, default_value = "cli")]
  user: String,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Create, version, publish and inspect rules.
  #[command(subcommand)]
  Rule(RuleCommand),

  /// Evaluate a JSON fact set against a domain's active rules.
  Evaluate {
    #[arg(long)]
    domain: String,
    #[arg(long, value_name = "FILE")]
    facts:  PathBuf,
  },

  /// Manage and run test profiles.
  #[command(subcommand)]
  Profile(ProfileCommand),

  /// Show the most recent audit entries.
  Audit {
    #[arg(long, default_value_t = 20)]
    limit: usize,
  },
}

#[derive(Subcommand)]
enum RuleCommand {
  /// Create a draft rule from a JSON file.
  Create {
    #[arg(long, value_name = "FILE")]
    file: PathBuf,
  },
  /// Append a new version from a JSON file.
  Version {
    #[arg(long)]
    rule: Uuid,
    #[arg(long, value_name = "FILE")]
    file: PathBuf,
  },
  Publish {
    #[arg(long)]
    rule:    Uuid,
    #[arg(long)]
    version: u32,
  },
  Rollback {
    #[arg(long)]
    rule:    Uuid,
    #[arg(long)]
    version: u32,
  },
  Archive {
    #[arg(long)]
    rule: Uuid,
  },
  Deactivate {
    #[arg(long)]
    rule: Uuid,
  },
  Reactivate {
    #[arg(long)]
    rule: Uuid,
  },
  /// Show a rule's current view and execution metrics.
  Show {
    #[arg(long)]
    rule: Uuid,
  },
  List {
    #[arg(long)]
    domain: Option<String>,
    #[arg(long)]
    status: Option<RuleStatus>,
  },
}

#[derive(Subcommand)]
enum ProfileCommand {
  /// Create a test profile from a JSON file.
  Add {
    #[arg(long, value_name = "FILE")]
    file: PathBuf,
  },
  Run {
    #[arg(long)]
    id: Uuid,
  },
  /// Run every profile of a domain concurrently.
  RunAll {
    #[arg(long)]
    domain: String,
  },
  List {
    #[arg(long)]
    domain: Option<String>,
  },
}

// ─── Config ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct AppConfig {
  #[serde(default = "default_store_path")]
  store_path: PathBuf,
  #[serde(default)]
  scoring:    ScoringConfig,
}

fn default_store_path() -> PathBuf { PathBuf::from("pathway.db") }

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
  config::Config::builder()
    .add_source(config::File::from(path).required(false))
    .add_source(
      config::Environment::with_prefix("PATHWAY")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true),
    )
    .build()
    .context("failed to read config file")?
    .try_deserialize()
    .context("failed to deserialise AppConfig")
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
  let raw = std::fs::read_to_string(path)
    .with_context(|| format!("reading {}", path.display()))?;
  serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunSummary<T> {
  results: Vec<T>,
  failed:  Vec<String>,
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let app_config = load_config(&cli.config)?;
  let store_path = expand_tilde(&app_config.store_path);

  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  let engine = Engine::new(Arc::new(store), app_config.scoring)
    .context("invalid scoring configuration")?;

  let user = cli.user.as_str();
  match cli.command {
    Command::Rule(command) => run_rule_command(&engine, command, user).await,
    Command::Evaluate { domain, facts } => {
      let raw: serde_json::Value = read_json(&facts)?;
      let facts = FactSet::from_json(&raw).context("invalid fact set")?;
      print_json(&engine.evaluate(&domain, &facts).await?)
    }
    Command::Profile(command) => run_profile_command(&engine, command, user).await,
    Command::Audit { limit } => print_json(&engine.audit_log(limit).await?),
  }
}

async fn run_rule_command(
  engine: &Engine<SqliteStore>,
  command: RuleCommand,
  user: &str,
) -> anyhow::Result<()> {
  match command {
    RuleCommand::Create { file } => {
      let input: NewRule = read_json(&file)?;
      print_json(&engine.create_rule(input, user).await?.view())
    }
    RuleCommand::Version { rule, file } => {
      let body: RuleBody = read_json(&file)?;
      print_json(&engine.create_version(rule, body, user).await?)
    }
    RuleCommand::Publish { rule, version } => {
      print_json(&engine.publish_version(rule, version, user).await?.view())
    }
    RuleCommand::Rollback { rule, version } => {
      print_json(&engine.rollback_to_version(rule, version, user).await?.view())
    }
    RuleCommand::Archive { rule } => print_json(&engine.archive_rule(rule, user).await?.view()),
    RuleCommand::Deactivate { rule } => {
      print_json(&engine.deactivate_rule(rule, user).await?.view())
    }
    RuleCommand::Reactivate { rule } => {
      print_json(&engine.reactivate_rule(rule, user).await?.view())
    }
    RuleCommand::Show { rule } => {
      let view = engine.rule_view(rule).await?;
      let metrics = engine.rule_metrics(rule).await?.unwrap_or_default();
      print_json(&serde_json::json!({ "rule": view, "metrics": metrics }))
    }
    RuleCommand::List { domain, status } => {
      print_json(&engine.list_rules(domain.as_deref(), status).await?)
    }
  }
}

async fn run_profile_command(
  engine: &Engine<SqliteStore>,
  command: ProfileCommand,
  user: &str,
) -> anyhow::Result<()> {
  match command {
    ProfileCommand::Add { file } => {
      let input: NewTestProfile = read_json(&file)?;
      print_json(&engine.add_test_profile(input).await?)
    }
    ProfileCommand::Run { id } => print_json(&engine.run_test(id, user).await?),
    ProfileCommand::List { domain } => {
      print_json(&engine.list_test_profiles(domain.as_deref()).await?)
    }
    ProfileCommand::RunAll { domain } => {
      let profiles = engine.list_test_profiles(Some(domain.as_str())).await?;
      tracing::info!(%domain, count = profiles.len(), "running test profiles");

      let mut tasks = JoinSet::new();
      for profile in profiles {
        let engine = engine.clone();
        let user = user.to_owned();
        tasks.spawn(async move {
          let outcome = engine.run_test(profile.id, &user).await;
          (profile.name, outcome)
        });
      }

      let mut summary = RunSummary { results: Vec::new(), failed: Vec::new() };
      while let Some(joined) = tasks.join_next().await {
        let (name, outcome) = joined.context("test task panicked")?;
        match outcome {
          Ok(result) => summary.results.push(result),
          Err(err) => {
            tracing::error!(profile = %name, error = %err, "test run failed");
            summary.failed.push(name);
          }
        }
      }
      print_json(&summary)?;

      if !summary.failed.is_empty() {
        anyhow::bail!("{} test profile(s) failed to run", summary.failed.len());
      }
      Ok(())
    }
  }
}
