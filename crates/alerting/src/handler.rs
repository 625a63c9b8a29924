//! Rule-level evaluation: run every condition and combine the verdicts.

use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use vigil_core::{parse_duration, AlertingConfig};

use crate::condition::{parse_condition, Condition, Operator, QueryServices};
use crate::context::{EvalContext, RuleInfo};
use crate::error::{AlertError, Result};
use crate::state::{ExecutionErrorOption, NoDataOption, StateSettings};

// ── Rule ────────────────────────────────────────────────────────────

/// Rule settings as stored alongside the rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSettings {
    #[serde(default)]
    pub conditions: Vec<serde_json::Value>,
    #[serde(default)]
    pub no_data_state: NoDataOption,
    #[serde(default)]
    pub execution_error_state: ExecutionErrorOption,
    /// Pending period such as `5m`. Empty or `0` disables it.
    #[serde(rename = "for", default)]
    pub for_duration: String,
}

/// An alert rule with its conditions built and validated.
#[derive(Debug)]
pub struct AlertRule {
    pub info: RuleInfo,
    pub conditions: Vec<Box<dyn Condition>>,
    pub state: StateSettings,
}

impl AlertRule {
    /// Build a rule from its settings JSON (`{"conditions": [...]}`).
    pub fn from_json(info: RuleInfo, settings: &serde_json::Value, services: &QueryServices) -> Result<Self> {
        let settings: RuleSettings = serde_json::from_value(settings.clone())?;
        Self::from_settings(info, &settings, services)
    }

    pub fn from_settings(info: RuleInfo, settings: &RuleSettings, services: &QueryServices) -> Result<Self> {
        let conditions = settings
            .conditions
            .iter()
            .enumerate()
            .map(|(i, json)| parse_condition(json, i, services))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            info,
            conditions,
            state: StateSettings {
                no_data_state: settings.no_data_state,
                execution_error_state: settings.execution_error_state,
                for_duration: parse_for(&settings.for_duration)?,
            },
        })
    }

    /// Fresh evaluation context for this rule.
    pub fn context(&self, config: &AlertingConfig) -> EvalContext {
        EvalContext::new(self.info.clone(), config)
    }
}

fn parse_for(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "0" {
        return Ok(Duration::ZERO);
    }
    parse_duration(raw)
        .and_then(|d| d.to_std().ok())
        .ok_or_else(|| AlertError::Validation(format!("invalid for duration '{}'", raw)))
}

// ── Handler ─────────────────────────────────────────────────────────

/// Evaluates rules condition by condition.
#[derive(Debug, Default, Clone, Copy)]
pub struct EvalHandler;

impl EvalHandler {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate every condition of `rule` and write the combined verdict
    /// into `ctx`.
    ///
    /// The first condition seeds the verdict; each later one folds in with
    /// its own operator. Evaluation stops at the first execution error,
    /// which is recorded and forces `firing` and `no_data_found` to false.
    pub async fn eval(&self, rule: &AlertRule, ctx: &mut EvalContext) {
        let started = Instant::now();
        ctx.start_time = Utc::now();

        let mut firing = false;
        let mut no_data_found = false;
        let mut evals = String::new();

        for (i, condition) in rule.conditions.iter().enumerate() {
            let result = condition.eval(ctx).await;

            if let Some(e) = result.error {
                warn!(rule_id = ctx.rule.id, condition = i, error = %e, "rule evaluation failed");
                ctx.error = Some(e);
                break;
            }

            if i == 0 {
                firing = result.firing;
                no_data_found = result.no_data_found;
                evals = result.firing.to_string();
            } else {
                match result.operator {
                    Operator::And => {
                        firing = firing && result.firing;
                        no_data_found = no_data_found && result.no_data_found;
                    }
                    Operator::Or => {
                        firing = firing || result.firing;
                        no_data_found = no_data_found || result.no_data_found;
                    }
                }
                evals = format!("[{} {} {}]", evals, result.operator, result.firing);
            }

            ctx.eval_matches.extend(result.matches);
        }

        if ctx.error.is_some() {
            firing = false;
            no_data_found = false;
        }
        if ctx.max_eval_matches > 0 && ctx.eval_matches.len() > ctx.max_eval_matches {
            debug!(
                rule_id = ctx.rule.id,
                total = ctx.eval_matches.len(),
                kept = ctx.max_eval_matches,
                "truncating eval matches"
            );
            ctx.eval_matches.truncate(ctx.max_eval_matches);
        }

        ctx.firing = firing;
        ctx.no_data_found = no_data_found;
        ctx.condition_evals = if evals.is_empty() {
            firing.to_string()
        } else {
            format!("{} = {}", evals, firing)
        };
        ctx.end_time = Some(Utc::now());
        ctx.elapsed = started.elapsed();

        info!(
            rule_id = ctx.rule.id,
            rule = %ctx.rule.name,
            firing,
            no_data = no_data_found,
            matches = ctx.eval_matches.len(),
            evals = %ctx.condition_evals,
            elapsed_ms = ctx.elapsed.as_millis() as u64,
            "rule evaluated"
        );
    }
}
