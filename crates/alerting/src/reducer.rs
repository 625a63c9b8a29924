//! Series reducers: collapse a series to one nullable scalar.
//!
//! Null and NaN points are skipped by every aggregate, `count` included.
//! A series with no points, or with only null points, reduces to `None`
//! under every reducer, so `count` never reports `0`. `count_non_null` is
//! kept as an alias of `count` for stored definitions that name it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use vigil_core::Series;

use crate::error::{AlertError, Result};

/// Built-in reduction algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReducerType {
    Avg,
    Sum,
    Min,
    Max,
    Count,
    CountNonNull,
    Last,
    Median,
    Diff,
    DiffAbs,
    PercentDiff,
    PercentDiffAbs,
}

/// Lookup table from wire name to reducer.
const REDUCERS: &[(&str, ReducerType)] = &[
    ("avg", ReducerType::Avg),
    ("sum", ReducerType::Sum),
    ("min", ReducerType::Min),
    ("max", ReducerType::Max),
    ("count", ReducerType::Count),
    ("count_non_null", ReducerType::CountNonNull),
    ("last", ReducerType::Last),
    ("median", ReducerType::Median),
    ("diff", ReducerType::Diff),
    ("diff_abs", ReducerType::DiffAbs),
    ("percent_diff", ReducerType::PercentDiff),
    ("percent_diff_abs", ReducerType::PercentDiffAbs),
];

impl ReducerType {
    pub fn as_str(&self) -> &'static str {
        REDUCERS
            .iter()
            .find(|(_, r)| r == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }
}

impl fmt::Display for ReducerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReducerType {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self> {
        REDUCERS
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, r)| *r)
            .ok_or_else(|| AlertError::Validation(format!("unknown reducer type: '{}'", s)))
    }
}

/// Reducer section of a condition definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReducerModel {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub params: Vec<f64>,
}

/// A validated reducer, applied identically to every series of a condition.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryReducer {
    pub kind: ReducerType,
    pub params: Vec<f64>,
}

impl QueryReducer {
    pub fn new(kind: ReducerType) -> Self {
        Self {
            kind,
            params: Vec::new(),
        }
    }

    /// Build from the definition, rejecting unknown types.
    pub fn from_model(model: &ReducerModel) -> Result<Self> {
        if model.kind.is_empty() {
            return Err(AlertError::Validation("reducer missing type property".into()));
        }
        Ok(Self {
            kind: model.kind.parse()?,
            params: model.params.clone(),
        })
    }

    pub fn reduce(&self, series: &Series) -> Option<f64> {
        if series.points.is_empty() {
            return None;
        }

        match self.kind {
            ReducerType::Avg => {
                let (sum, n) = series
                    .valid_values()
                    .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                (n > 0).then(|| sum / n as f64)
            }
            ReducerType::Sum => series.valid_values().reduce(|a, b| a + b),
            ReducerType::Min => series.valid_values().reduce(f64::min),
            ReducerType::Max => series.valid_values().reduce(f64::max),
            ReducerType::Count | ReducerType::CountNonNull => {
                let n = series.valid_values().count();
                (n > 0).then_some(n as f64)
            }
            ReducerType::Last => series.valid_values().next_back(),
            ReducerType::Median => median(series.valid_values().collect()),
            ReducerType::Diff => newest_vs_oldest(series, |newest, oldest| newest - oldest),
            ReducerType::DiffAbs => {
                newest_vs_oldest(series, |newest, oldest| (newest - oldest).abs())
            }
            ReducerType::PercentDiff => newest_vs_oldest(series, |newest, oldest| {
                (newest - oldest) / oldest.abs() * 100.0
            }),
            ReducerType::PercentDiffAbs => newest_vs_oldest(series, |newest, oldest| {
                ((newest - oldest) / oldest * 100.0).abs()
            }),
        }
    }
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

/// Apply `f(newest, oldest)` to the newest and oldest valid points.
///
/// A single valid point yields `0`.
fn newest_vs_oldest(series: &Series, f: impl Fn(f64, f64) -> f64) -> Option<f64> {
    let newest_idx = series.points.iter().rposition(|p| p.is_valid())?;
    let newest = series.points[newest_idx].valid_value()?;

    let oldest = series.points[..newest_idx]
        .iter()
        .find_map(|p| p.valid_value());

    Some(oldest.map(|oldest| f(newest, oldest)).unwrap_or(0.0))
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::TimePoint;

    fn series_of(values: &[Option<f64>]) -> Series {
        let points = values
            .iter()
            .enumerate()
            .map(|(i, v)| TimePoint::new(*v, i as f64 * 1000.0))
            .collect();
        Series::new("test", points)
    }

    fn reduce(kind: ReducerType, values: &[Option<f64>]) -> Option<f64> {
        QueryReducer::new(kind).reduce(&series_of(values))
    }

    #[test]
    fn parses_every_known_type() {
        for (name, kind) in REDUCERS {
            assert_eq!(name.parse::<ReducerType>().unwrap(), *kind);
            assert_eq!(kind.to_string(), *name);
        }
    }

    #[test]
    fn unknown_type_is_validation_error() {
        let model = ReducerModel {
            kind: "stddev".into(),
            params: vec![],
        };
        let err = QueryReducer::from_model(&model).unwrap_err();
        assert!(err.is_validation());

        let err = QueryReducer::from_model(&ReducerModel::default()).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn aggregates_skip_nulls() {
        let values = [Some(1.0), None, Some(3.0), Some(f64::NAN), Some(2.0)];
        assert_eq!(reduce(ReducerType::Avg, &values), Some(2.0));
        assert_eq!(reduce(ReducerType::Sum, &values), Some(6.0));
        assert_eq!(reduce(ReducerType::Min, &values), Some(1.0));
        assert_eq!(reduce(ReducerType::Max, &values), Some(3.0));
        assert_eq!(reduce(ReducerType::Last, &values), Some(2.0));
        assert_eq!(reduce(ReducerType::Median, &values), Some(2.0));
        assert_eq!(reduce(ReducerType::CountNonNull, &values), Some(3.0));
        assert_eq!(reduce(ReducerType::Count, &values), Some(3.0));
        assert_eq!(reduce(ReducerType::Count, &[Some(1.0), None, Some(2.0)]), Some(2.0));
    }

    #[test]
    fn empty_series_is_null_for_every_reducer() {
        for (_, kind) in REDUCERS {
            assert_eq!(reduce(*kind, &[]), None, "{kind}");
        }
    }

    #[test]
    fn all_null_series_is_null_for_every_reducer() {
        let values = [None, None, Some(f64::NAN)];
        for (_, kind) in REDUCERS {
            assert_eq!(reduce(*kind, &values), None, "{kind}");
        }
        assert_eq!(reduce(ReducerType::Count, &[None, None]), None);
    }

    #[test]
    fn min_and_max_handle_negatives() {
        let values = [Some(-5.0), Some(-1.0), Some(-10.0)];
        assert_eq!(reduce(ReducerType::Min, &values), Some(-10.0));
        assert_eq!(reduce(ReducerType::Max, &values), Some(-1.0));
    }

    #[test]
    fn median_of_even_count_averages_middle_pair() {
        let values = [Some(4.0), Some(1.0), Some(3.0), Some(2.0)];
        assert_eq!(reduce(ReducerType::Median, &values), Some(2.5));
    }

    #[test]
    fn diff_family_compares_newest_with_oldest() {
        let values = [None, Some(30.0), Some(10.0), Some(40.0), None];
        assert_eq!(reduce(ReducerType::Diff, &values), Some(10.0));
        assert_eq!(reduce(ReducerType::DiffAbs, &[Some(40.0), Some(30.0)]), Some(10.0));
        assert_eq!(reduce(ReducerType::Diff, &[Some(40.0), Some(30.0)]), Some(-10.0));
        assert_eq!(reduce(ReducerType::PercentDiff, &[Some(-50.0), Some(-25.0)]), Some(50.0));
        assert_eq!(reduce(ReducerType::PercentDiff, &[Some(50.0), Some(25.0)]), Some(-50.0));
        assert_eq!(reduce(ReducerType::PercentDiffAbs, &[Some(50.0), Some(25.0)]), Some(50.0));
    }

    #[test]
    fn diff_with_single_valid_point_is_zero() {
        assert_eq!(reduce(ReducerType::Diff, &[None, Some(7.0)]), Some(0.0));
        assert_eq!(reduce(ReducerType::PercentDiff, &[Some(7.0), None]), Some(0.0));
    }
}
