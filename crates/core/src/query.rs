//! Request and response shapes exchanged with datasource query handlers.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VigilError};
use crate::frame::Frame;
use crate::series::Series;

// ── Datasource ──────────────────────────────────────────────────────

/// A configured datasource a query is executed against.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub id: i64,
    #[serde(default)]
    pub org_id: i64,
    #[serde(default)]
    pub name: String,
    /// Plugin type, e.g. `graphite` or `postgres`.
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub json_data: serde_json::Value,
}

// ── Time range ──────────────────────────────────────────────────────

/// Relative or absolute query window.
///
/// `from` accepts `5m`, `now-5m`, `now` or epoch milliseconds;
/// `to` accepts `now`, `now-1m` or epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: String,
    pub to: String,
}

impl TimeRange {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Check that both ends parse, without resolving them.
    pub fn validate(&self) -> Result<()> {
        parse_bound(&self.from, true)
            .map_err(|_| VigilError::Config(format!("cannot parse from value {}", self.from)))?;
        parse_bound(&self.to, false)
            .map_err(|_| VigilError::Config(format!("cannot parse to value {}", self.to)))?;
        Ok(())
    }

    /// Resolve both ends against `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let from = parse_bound(&self.from, true)?.at(now)?;
        let to = parse_bound(&self.to, false)?.at(now)?;
        Ok((from, to))
    }
}

enum Bound {
    Relative(Duration),
    Epoch(i64),
}

impl Bound {
    fn at(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match self {
            Bound::Relative(offset) => Ok(now - *offset),
            Bound::Epoch(ms) => Utc
                .timestamp_millis_opt(*ms)
                .single()
                .ok_or_else(|| VigilError::Config(format!("epoch {} out of range", ms))),
        }
    }
}

/// `allow_bare` lets `from` omit the `now-` prefix (`5m` means `now-5m`).
fn parse_bound(raw: &str, allow_bare: bool) -> Result<Bound> {
    let s = raw.trim();
    if s == "now" {
        return Ok(Bound::Relative(Duration::zero()));
    }
    if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
        let ms: i64 = s
            .parse()
            .map_err(|_| VigilError::Config(format!("invalid epoch value {}", s)))?;
        return Ok(Bound::Epoch(ms));
    }
    let rel = match s.strip_prefix("now-") {
        Some(rest) => rest,
        None if allow_bare => s,
        None => return Err(VigilError::Config(format!("invalid time value {}", raw))),
    };
    parse_duration(rel)
        .map(Bound::Relative)
        .ok_or_else(|| VigilError::Config(format!("invalid duration {}", raw)))
}

/// Parse a duration such as `5m`, `1h30m`, `250ms` or `2w`.
///
/// Every number must carry a unit: `ms`, `s`, `m`, `h`, `d` or `w`.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total_ms: i64 = 0;
    let mut chars = s.chars().peekable();

    while chars.peek().is_some() {
        let mut num_buf = String::new();
        while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
            num_buf.push(c);
            chars.next();
        }
        let n: i64 = num_buf.parse().ok()?;

        let unit_ms = match chars.next()? {
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                1
            }
            's' => 1_000,
            'm' => 60_000,
            'h' => 3_600_000,
            'd' => 86_400_000,
            'w' => 604_800_000,
            _ => return None,
        };
        total_ms = total_ms.checked_add(n.checked_mul(unit_ms)?)?;
    }

    Some(Duration::milliseconds(total_ms))
}

// ── Request ─────────────────────────────────────────────────────────

/// A single query inside a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub ref_id: String,
    /// Datasource-specific query body, passed through untouched.
    pub model: serde_json::Value,
    pub datasource: DataSource,
    #[serde(default)]
    pub query_type: String,
    #[serde(default = "default_max_data_points")]
    pub max_data_points: i64,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: i64,
}

fn default_max_data_points() -> i64 {
    100
}

fn default_interval_ms() -> i64 {
    1000
}

impl Query {
    pub fn new(ref_id: impl Into<String>, model: serde_json::Value, datasource: DataSource) -> Self {
        let query_type = model
            .get("queryType")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Self {
            ref_id: ref_id.into(),
            model,
            datasource,
            query_type,
            max_data_points: default_max_data_points(),
            interval_ms: default_interval_ms(),
        }
    }
}

/// Everything a query handler needs to execute one or more queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub time_range: TimeRange,
    pub queries: Vec<Query>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub debug: bool,
}

// ── Response ────────────────────────────────────────────────────────

/// Per-query outcome. A handler returns either legacy `series` or `frames`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    #[serde(default)]
    pub ref_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub series: Vec<Series>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frames: Option<Vec<Frame>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl QueryResult {
    pub fn from_series(ref_id: impl Into<String>, series: Vec<Series>) -> Self {
        Self {
            ref_id: ref_id.into(),
            series,
            ..Default::default()
        }
    }

    pub fn from_frames(ref_id: impl Into<String>, frames: Vec<Frame>) -> Self {
        Self {
            ref_id: ref_id.into(),
            frames: Some(frames),
            ..Default::default()
        }
    }

    /// Frames are only consulted when no legacy series were returned.
    pub fn uses_frames(&self) -> bool {
        self.frames.is_some() && self.series.is_empty()
    }
}

/// Results keyed by query `ref_id`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub results: BTreeMap<String, QueryResult>,
}

impl QueryResponse {
    pub fn single(result: QueryResult) -> Self {
        let mut results = BTreeMap::new();
        results.insert(result.ref_id.clone(), result);
        Self { results }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5m"), Some(Duration::minutes(5)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::minutes(90)));
        assert_eq!(parse_duration("250ms"), Some(Duration::milliseconds(250)));
        assert_eq!(parse_duration("2w"), Some(Duration::days(14)));
        assert_eq!(parse_duration("10"), None);
        assert_eq!(parse_duration("5x"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn time_range_validation() {
        assert!(TimeRange::new("5m", "now").validate().is_ok());
        assert!(TimeRange::new("now-1h", "now-5m").validate().is_ok());
        assert!(TimeRange::new("1577934240000", "now").validate().is_ok());
        assert!(TimeRange::new("yesterday", "now").validate().is_err());
        // `to` must be explicit about being relative to now.
        assert!(TimeRange::new("5m", "1m").validate().is_err());
    }

    #[test]
    fn time_range_resolves_relative_to_now() {
        let now = Utc.with_ymd_and_hms(2020, 1, 2, 3, 10, 0).unwrap();
        let (from, to) = TimeRange::new("5m", "now").resolve(now).unwrap();
        assert_eq!(from, Utc.with_ymd_and_hms(2020, 1, 2, 3, 5, 0).unwrap());
        assert_eq!(to, now);
    }

    #[test]
    fn query_reads_query_type_from_model() {
        let q = Query::new(
            "A",
            serde_json::json!({"queryType": "metrics", "target": "x"}),
            DataSource::default(),
        );
        assert_eq!(q.query_type, "metrics");
    }

    #[test]
    fn result_prefers_series_over_frames() {
        let mut r = QueryResult::from_frames("A", vec![]);
        assert!(r.uses_frames());
        r.series.push(Series::new("s", vec![]));
        assert!(!r.uses_frames());
        assert!(!QueryResult::from_series("A", vec![]).uses_frames());
    }
}
