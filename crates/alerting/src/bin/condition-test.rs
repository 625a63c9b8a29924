//! condition-test: evaluate an alert condition against a recorded response.
//!
//! Loads a condition (or full rule settings) from JSON or YAML, replays a
//! recorded datasource response through it in test-run mode, and prints the
//! verdict, derived state and evaluation logs as JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tracing::info;

use vigil_alerting::{AlertRule, DatasourceStore, EvalHandler, QueryHandler, QueryServices, RuleInfo};
use vigil_core::config::load_dotenv;
use vigil_core::{Config, DataSource, QueryRequest, QueryResponse};

// ── CLI ─────────────────────────────────────────────────────────────

/// Evaluate an alert condition against a recorded datasource response.
#[derive(Parser, Debug)]
#[command(name = "condition-test", version, about)]
struct Cli {
    /// Condition or rule settings file (.json, .yaml or .yml).
    #[arg(long)]
    condition: PathBuf,

    /// Recorded query response (JSON).
    #[arg(long)]
    response: PathBuf,

    /// Query deadline in seconds; overrides the configured timeout.
    #[arg(long, env = "CONDITION_TEST_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Attach request payloads and response metadata to the logs.
    #[arg(long)]
    debug: bool,
}

// ── Replay collaborators ────────────────────────────────────────────

/// Answers every query with the same recorded response.
struct ReplayHandler {
    response: QueryResponse,
}

#[async_trait]
impl QueryHandler for ReplayHandler {
    async fn handle_request(
        &self,
        _datasource: &DataSource,
        _request: &QueryRequest,
    ) -> Result<QueryResponse, String> {
        Ok(self.response.clone())
    }
}

/// Resolves any datasource id to a placeholder.
struct ReplayStore;

#[async_trait]
impl DatasourceStore for ReplayStore {
    async fn get_datasource(&self, id: i64, org_id: i64) -> Result<DataSource, String> {
        Ok(DataSource {
            id,
            org_id,
            name: "replay".into(),
            kind: "replay".into(),
            ..Default::default()
        })
    }
}

// ── Loading ─────────────────────────────────────────────────────────

/// Read a JSON or YAML document, chosen by file extension.
fn load_document(path: &Path) -> anyhow::Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let value = if is_yaml {
        serde_yaml::from_str(&raw).with_context(|| format!("invalid YAML in {}", path.display()))?
    } else {
        serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))?
    };
    Ok(value)
}

/// Wrap a bare condition into rule settings.
fn rule_settings(doc: serde_json::Value) -> serde_json::Value {
    if doc.get("conditions").is_some() {
        doc
    } else {
        serde_json::json!({ "conditions": [doc] })
    }
}

fn load_response(path: &Path) -> anyhow::Result<QueryResponse> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid query response in {}", path.display()))
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let config = Config::from_env();
    config.log_summary();
    let mut alerting = config.alerting.clone();
    if let Some(secs) = cli.timeout_secs {
        alerting.evaluation_timeout = Duration::from_secs(secs);
    }
    alerting.debug |= cli.debug;

    let settings = rule_settings(load_document(&cli.condition)?);
    let response = load_response(&cli.response)?;
    let services = QueryServices::new(Arc::new(ReplayHandler { response }), Arc::new(ReplayStore));

    let rule_info = RuleInfo {
        id: 0,
        org_id: 1,
        name: cli.condition.display().to_string(),
    };
    let rule = AlertRule::from_json(rule_info, &settings, &services)?;
    info!(conditions = rule.conditions.len(), "condition loaded");

    let mut ctx = rule.context(&alerting).test_run();
    EvalHandler::new().eval(&rule, &mut ctx).await;

    let mut out = ctx.summary();
    out["state"] = serde_json::json!(ctx.new_state(&rule.state, chrono::Utc::now()));
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
