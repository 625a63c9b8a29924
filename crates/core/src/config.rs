//! Environment-driven configuration.
//!
//! Every key may be overridden per profile: with `VIGIL_PROFILE=PROD`,
//! `PROD_<KEY>` is consulted before `<KEY>`. Unset, empty or unparsable
//! values fall back to the built-in defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// First non-empty value among `{profile}_{key}` and `{key}`.
fn lookup(profile: &str, key: &str) -> Option<String> {
    let prefixed = (!profile.is_empty()).then(|| format!("{}_{}", profile, key));
    prefixed
        .into_iter()
        .chain(std::iter::once(key.to_string()))
        .find_map(|k| env::var(k).ok().filter(|v| !v.is_empty()))
}

fn lookup_parsed<T: FromStr>(profile: &str, key: &str, default: T) -> T {
    lookup(profile, key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn lookup_flag(profile: &str, key: &str, default: bool) -> bool {
    match lookup(profile, key).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("1" | "true" | "yes") => true,
        Some("0" | "false" | "no") => false,
        _ => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub alerting: AlertingConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `VIGIL_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env::var("VIGIL_PROFILE").unwrap_or_default().to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            alerting: AlertingConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  alerting:    timeout={}s, debug={}, max_eval_matches={}",
            self.alerting.evaluation_timeout.as_secs(),
            self.alerting.debug,
            self.alerting.max_eval_matches,
        );
    }
}

// ── Alerting ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertingConfig {
    /// Deadline applied to every datasource query dispatched by a condition.
    pub evaluation_timeout: Duration,
    /// Attach outgoing request payloads to the evaluation logs.
    pub debug: bool,
    /// Cap on evidence copied into a rule-level evaluation (0 = unlimited).
    pub max_eval_matches: usize,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            evaluation_timeout: Duration::from_secs(30),
            debug: false,
            max_eval_matches: 0,
        }
    }
}

impl AlertingConfig {
    fn from_env_profiled(p: &str) -> Self {
        let defaults = Self::default();
        Self {
            evaluation_timeout: Duration::from_secs(lookup_parsed(
                p,
                "ALERTING_EVALUATION_TIMEOUT_SECONDS",
                defaults.evaluation_timeout.as_secs(),
            )),
            debug: lookup_flag(p, "ALERTING_DEBUG", defaults.debug),
            max_eval_matches: lookup_parsed(
                p,
                "ALERTING_MAX_EVAL_MATCHES",
                defaults.max_eval_matches,
            ),
        }
    }
}
