//! Time-series data shape shared by every stage of condition evaluation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Ordered tag set attached to a series.
pub type Tags = BTreeMap<String, String>;

/// A single sample: nullable value plus a timestamp in epoch milliseconds.
///
/// Serialized as a two-element array `[value, timestamp]` where `value`
/// may be `null`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(Option<f64>, f64)", into = "(Option<f64>, f64)")]
pub struct TimePoint {
    pub value: Option<f64>,
    pub timestamp: f64,
}

impl TimePoint {
    pub fn new(value: Option<f64>, timestamp: f64) -> Self {
        Self { value, timestamp }
    }

    /// Value usable for aggregation: present and not NaN.
    pub fn valid_value(&self) -> Option<f64> {
        self.value.filter(|v| !v.is_nan())
    }

    pub fn is_valid(&self) -> bool {
        self.valid_value().is_some()
    }
}

impl From<(Option<f64>, f64)> for TimePoint {
    fn from((value, timestamp): (Option<f64>, f64)) -> Self {
        Self { value, timestamp }
    }
}

impl From<TimePoint> for (Option<f64>, f64) {
    fn from(p: TimePoint) -> Self {
        (p.value, p.timestamp)
    }
}

/// A named, tagged sequence of points ordered by ascending timestamp.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub points: Vec<TimePoint>,
}

impl Series {
    pub fn new(name: impl Into<String>, points: Vec<TimePoint>) -> Self {
        Self {
            name: name.into(),
            tags: Tags::new(),
            points,
        }
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// Build a series from `(value, timestamp)` pairs of non-null values.
    pub fn from_values(name: impl Into<String>, values: &[(f64, f64)]) -> Self {
        let points = values
            .iter()
            .map(|&(v, ts)| TimePoint::new(Some(v), ts))
            .collect();
        Self::new(name, points)
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Iterator over values that are present and not NaN, in time order.
    pub fn valid_values(&self) -> impl DoubleEndedIterator<Item = f64> + '_ {
        self.points.iter().filter_map(TimePoint::valid_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_point_serializes_as_pair() {
        let p = TimePoint::new(None, 1000.0);
        assert_eq!(serde_json::to_string(&p).unwrap(), "[null,1000.0]");

        let back: TimePoint = serde_json::from_str("[12.5, 2000]").unwrap();
        assert_eq!(back, TimePoint::new(Some(12.5), 2000.0));
    }

    #[test]
    fn nan_is_not_valid() {
        assert!(!TimePoint::new(Some(f64::NAN), 0.0).is_valid());
        assert!(!TimePoint::new(None, 0.0).is_valid());
        assert!(TimePoint::new(Some(0.0), 0.0).is_valid());
    }

    #[test]
    fn series_deserializes_without_tags() {
        let s: Series = serde_json::from_str(r#"{"name": "cpu", "points": [[1, 10], [null, 20]]}"#).unwrap();
        assert_eq!(s.name, "cpu");
        assert!(s.tags.is_empty());
        assert_eq!(s.valid_values().collect::<Vec<_>>(), vec![1.0]);
    }
}
