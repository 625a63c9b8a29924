//! Alert state derivation from an evaluated context.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::EvalContext;
use crate::error::AlertError;

/// Lifecycle state of an alert rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Ok,
    Pending,
    Alerting,
    NoData,
    Paused,
    #[default]
    Unknown,
}

const STATES: &[(AlertState, &str)] = &[
    (AlertState::Ok, "ok"),
    (AlertState::Pending, "pending"),
    (AlertState::Alerting, "alerting"),
    (AlertState::NoData, "no_data"),
    (AlertState::Paused, "paused"),
    (AlertState::Unknown, "unknown"),
];

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        STATES
            .iter()
            .find(|(s, _)| s == self)
            .map(|(_, name)| *name)
            .unwrap_or("unknown")
    }
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertState {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        STATES
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(state, _)| *state)
            .ok_or_else(|| AlertError::Validation(format!("unknown alert state '{}'", s)))
    }
}

/// State to enter when every condition reports no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoDataOption {
    #[default]
    NoData,
    Alerting,
    Ok,
    KeepState,
}

impl NoDataOption {
    /// Target state, or `None` to keep the previous one.
    pub fn to_state(self) -> Option<AlertState> {
        match self {
            NoDataOption::NoData => Some(AlertState::NoData),
            NoDataOption::Alerting => Some(AlertState::Alerting),
            NoDataOption::Ok => Some(AlertState::Ok),
            NoDataOption::KeepState => None,
        }
    }
}

/// State to enter when evaluation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorOption {
    #[default]
    Alerting,
    KeepState,
}

/// Per-rule state transition settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSettings {
    pub no_data_state: NoDataOption,
    pub execution_error_state: ExecutionErrorOption,
    /// How long a rule must keep firing before it is alerting.
    pub for_duration: Duration,
}

impl EvalContext {
    /// Derive the next alert state from the evaluated verdict.
    pub fn new_state(&self, settings: &StateSettings, now: DateTime<Utc>) -> AlertState {
        if self.error.is_some() {
            return match settings.execution_error_state {
                ExecutionErrorOption::KeepState => self.prev_state,
                ExecutionErrorOption::Alerting => AlertState::Alerting,
            };
        }

        if self.firing {
            if settings.for_duration.is_zero() {
                return AlertState::Alerting;
            }
            let since = (now - self.last_state_change).to_std().unwrap_or_default();
            return match self.prev_state {
                AlertState::Alerting => AlertState::Alerting,
                AlertState::Pending if since > settings.for_duration => AlertState::Alerting,
                _ => AlertState::Pending,
            };
        }

        if self.no_data_found {
            return settings.no_data_state.to_state().unwrap_or(self.prev_state);
        }

        AlertState::Ok
    }
}
