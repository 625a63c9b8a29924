//! Columnar query results: a frame is a set of equally long typed fields.
//!
//! Datasources that return tabular data hand back frames instead of named
//! series. A frame in "wide" shape has one time field and one numeric field
//! per series; a "long" frame additionally carries string fields whose
//! distinct values identify the series each row belongs to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VigilError};
use crate::series::Tags;

/// A named collection of columns.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub fields: Vec<Field>,
}

impl Frame {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Number of rows, taken from the first field.
    pub fn row_len(&self) -> usize {
        self.fields.first().map(Field::len).unwrap_or(0)
    }
}

/// Display overrides attached to a field by the datasource or the user.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, rename = "displayNameFromDS", skip_serializing_if = "Option::is_none")]
    pub display_name_from_ds: Option<String>,
}

/// One column of a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default)]
    pub labels: Tags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<FieldConfig>,
    pub values: FieldValues,
}

/// Typed, nullable column storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValues {
    Time(Vec<Option<DateTime<Utc>>>),
    Int64(Vec<Option<i64>>),
    Float64(Vec<Option<f64>>),
    Bool(Vec<Option<bool>>),
    String(Vec<Option<String>>),
}

impl Field {
    pub fn new(name: impl Into<String>, values: FieldValues) -> Self {
        Self {
            name: name.into(),
            labels: Tags::new(),
            config: None,
            values,
        }
    }

    pub fn with_labels(mut self, labels: Tags) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_config(mut self, config: FieldConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn len(&self) -> usize {
        match &self.values {
            FieldValues::Time(v) => v.len(),
            FieldValues::Int64(v) => v.len(),
            FieldValues::Float64(v) => v.len(),
            FieldValues::Bool(v) => v.len(),
            FieldValues::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_time(&self) -> bool {
        matches!(self.values, FieldValues::Time(_))
    }

    /// Numeric fields become series values; bools count as numeric (1/0).
    pub fn is_numeric(&self) -> bool {
        matches!(
            self.values,
            FieldValues::Int64(_) | FieldValues::Float64(_) | FieldValues::Bool(_)
        )
    }

    pub fn is_string(&self) -> bool {
        matches!(self.values, FieldValues::String(_))
    }

    /// Explicit display name, then the datasource-provided one.
    pub fn display_name_override(&self) -> Option<&str> {
        let config = self.config.as_ref()?;
        config
            .display_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| config.display_name_from_ds.as_deref().filter(|s| !s.is_empty()))
    }

    /// Cell at `row` as a nullable float.
    pub fn float_at(&self, row: usize) -> Result<Option<f64>> {
        let out_of_range = || {
            VigilError::Conversion(format!("row {} out of range for field '{}'", row, self.name))
        };
        match &self.values {
            FieldValues::Int64(v) => v.get(row).map(|c| c.map(|n| n as f64)).ok_or_else(out_of_range),
            FieldValues::Float64(v) => v.get(row).copied().ok_or_else(out_of_range),
            FieldValues::Bool(v) => v
                .get(row)
                .map(|c| c.map(|b| if b { 1.0 } else { 0.0 }))
                .ok_or_else(out_of_range),
            FieldValues::Time(v) => v
                .get(row)
                .map(|c| c.map(|t| t.timestamp_millis() as f64))
                .ok_or_else(out_of_range),
            FieldValues::String(v) => match v.get(row) {
                Some(cell) => Err(VigilError::Conversion(format!(
                    "can not convert value {:?} of field '{}' to float",
                    cell, self.name
                ))),
                None => Err(out_of_range()),
            },
        }
    }

    /// Cell at `row` of a string field.
    pub fn string_at(&self, row: usize) -> Option<&str> {
        match &self.values {
            FieldValues::String(v) => v.get(row).and_then(|c| c.as_deref()),
            _ => None,
        }
    }
}

/// Render labels as `k1=v1, k2=v2` in key order.
pub fn labels_to_string(labels: &Tags) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_render_sorted() {
        let mut labels = Tags::new();
        labels.insert("zone".into(), "b".into());
        labels.insert("host".into(), "a".into());
        assert_eq!(labels_to_string(&labels), "host=a, zone=b");
        assert_eq!(labels_to_string(&Tags::new()), "");
    }

    #[test]
    fn float_at_converts_numeric_cells() {
        let ints = Field::new("i", FieldValues::Int64(vec![Some(3), None]));
        assert_eq!(ints.float_at(0).unwrap(), Some(3.0));
        assert_eq!(ints.float_at(1).unwrap(), None);
        assert!(ints.float_at(2).is_err());

        let bools = Field::new("b", FieldValues::Bool(vec![Some(true)]));
        assert_eq!(bools.float_at(0).unwrap(), Some(1.0));

        let strings = Field::new("s", FieldValues::String(vec![Some("x".into())]));
        assert!(strings.float_at(0).is_err());
    }

    #[test]
    fn display_name_precedence() {
        let field = Field::new("Values", FieldValues::Float64(vec![])).with_config(FieldConfig {
            display_name: Some("sloth #1".into()),
            display_name_from_ds: Some("sloth #2".into()),
        });
        assert_eq!(field.display_name_override(), Some("sloth #1"));

        let field = Field::new("Values", FieldValues::Float64(vec![])).with_config(FieldConfig {
            display_name: Some(String::new()),
            display_name_from_ds: Some("sloth".into()),
        });
        assert_eq!(field.display_name_override(), Some("sloth"));
    }

    #[test]
    fn frame_deserializes_from_json() {
        let frame: Frame = serde_json::from_str(
            r#"{
                "name": "A",
                "fields": [
                    {"name": "time", "values": {"time": ["2020-01-02T03:04:00Z"]}},
                    {"name": "val", "labels": {"host": "a"}, "values": {"int64": [120]},
                     "config": {"displayNameFromDS": "requests"}}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(frame.row_len(), 1);
        assert!(frame.fields[0].is_time());
        assert_eq!(frame.fields[1].display_name_override(), Some("requests"));
        assert_eq!(frame.fields[0].float_at(0).unwrap(), Some(1_577_934_240_000.0));
    }
}
