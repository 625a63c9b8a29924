//! Evaluation context and per-condition results.
//!
//! An [`EvalContext`] is created fresh for every rule evaluation. Conditions
//! read its settings (timeout, cancellation, test-run flag) and append log
//! entries; the rule-level handler writes the aggregated verdict back into it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use vigil_core::{AlertingConfig, Tags};

use crate::condition::Operator;
use crate::error::AlertError;
use crate::state::AlertState;

// ── Evidence ────────────────────────────────────────────────────────

/// Evidence for one series that satisfied its evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalMatch {
    pub metric: String,
    pub value: Option<f64>,
    #[serde(default)]
    pub tags: Tags,
}

/// Terminal outcome of a condition, derived from its result flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Error,
    NoData,
    NotFiring,
    Firing,
}

/// Outcome of evaluating one condition.
///
/// `error` set implies `firing == false` and `no_data_found == false`.
#[derive(Debug)]
pub struct ConditionResult {
    pub firing: bool,
    pub no_data_found: bool,
    pub operator: Operator,
    pub matches: Vec<EvalMatch>,
    pub error: Option<AlertError>,
}

impl ConditionResult {
    /// Execution failure: never firing, never no-data.
    pub fn failed(operator: Operator, error: AlertError) -> Self {
        Self {
            firing: false,
            no_data_found: false,
            operator,
            matches: Vec::new(),
            error: Some(error),
        }
    }

    pub fn outcome(&self) -> Outcome {
        if self.error.is_some() {
            Outcome::Error
        } else if self.firing {
            Outcome::Firing
        } else if self.no_data_found {
            Outcome::NoData
        } else {
            Outcome::NotFiring
        }
    }

    /// JSON view with the error rendered as a message.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "outcome": self.outcome(),
            "firing": self.firing,
            "noDataFound": self.no_data_found,
            "operator": self.operator,
            "matches": self.matches,
            "error": self.error.as_ref().map(|e| e.to_string()),
        })
    }
}

/// A log line recorded during test runs or debug evaluations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultLogEntry {
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

// ── Context ─────────────────────────────────────────────────────────

/// Identity of the rule being evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleInfo {
    pub id: i64,
    pub org_id: i64,
    pub name: String,
}

/// Per-evaluation settings and accumulated output.
#[derive(Debug)]
pub struct EvalContext {
    pub rule: RuleInfo,
    pub is_test_run: bool,
    pub is_debug: bool,
    /// Deadline applied to each query dispatch.
    pub timeout: Duration,
    /// Upper bound on `eval_matches` (0 = unlimited).
    pub max_eval_matches: usize,
    cancel: Option<watch::Receiver<bool>>,
    pub logs: Vec<ResultLogEntry>,

    pub firing: bool,
    pub no_data_found: bool,
    pub eval_matches: Vec<EvalMatch>,
    pub error: Option<AlertError>,
    /// Human-readable trace of the condition combination, e.g. `[true AND false] = false`.
    pub condition_evals: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub elapsed: Duration,

    pub prev_state: AlertState,
    pub last_state_change: DateTime<Utc>,
}

impl EvalContext {
    pub fn new(rule: RuleInfo, config: &AlertingConfig) -> Self {
        let now = Utc::now();
        Self {
            rule,
            is_test_run: false,
            is_debug: config.debug,
            timeout: config.evaluation_timeout,
            max_eval_matches: config.max_eval_matches,
            cancel: None,
            logs: Vec::new(),
            firing: false,
            no_data_found: false,
            eval_matches: Vec::new(),
            error: None,
            condition_evals: String::new(),
            start_time: now,
            end_time: None,
            elapsed: Duration::ZERO,
            prev_state: AlertState::Unknown,
            last_state_change: now,
        }
    }

    /// Record query results and per-series reductions as log entries.
    pub fn test_run(mut self) -> Self {
        self.is_test_run = true;
        self
    }

    /// Cancel in-flight query dispatch when the watched flag turns `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_previous_state(mut self, state: AlertState, since: DateTime<Utc>) -> Self {
        self.prev_state = state;
        self.last_state_change = since;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolves once the cancel flag is set; never resolves without one.
    pub(crate) async fn cancelled(&self) {
        if let Some(rx) = &self.cancel {
            let mut rx = rx.clone();
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
            if *rx.borrow() {
                return;
            }
        }
        std::future::pending::<()>().await
    }

    pub(crate) fn log(&mut self, message: impl Into<String>, data: serde_json::Value) {
        self.logs.push(ResultLogEntry {
            message: message.into(),
            data,
        });
    }

    /// JSON view of the rule-level verdict.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "rule": self.rule,
            "firing": self.firing,
            "noDataFound": self.no_data_found,
            "conditionEvals": self.condition_evals,
            "matches": self.eval_matches,
            "error": self.error.as_ref().map(|e| e.to_string()),
            "elapsedMs": self.elapsed.as_millis() as u64,
            "logs": self.logs,
        })
    }
}
