//! Threshold evaluators: decide whether a reduced value matches.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AlertError, Result};

/// Evaluator section of a condition definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluatorModel {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOp {
    Gt,
    Lt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    Within,
    Outside,
}

/// A validated evaluator.
///
/// Numeric operators never match a null value; `NoValue` matches only a
/// null value.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluator {
    Threshold { op: ThresholdOp, threshold: f64 },
    Range { op: RangeOp, lower: f64, upper: f64 },
    NoValue,
}

#[derive(Clone, Copy)]
enum Shape {
    Threshold(ThresholdOp),
    Range(RangeOp),
    NoValue,
}

/// Lookup table from wire name to operator shape.
const EVALUATORS: &[(&str, Shape)] = &[
    ("gt", Shape::Threshold(ThresholdOp::Gt)),
    ("lt", Shape::Threshold(ThresholdOp::Lt)),
    ("within_range", Shape::Range(RangeOp::Within)),
    ("outside_range", Shape::Range(RangeOp::Outside)),
    ("no_value", Shape::NoValue),
    ("no_data", Shape::NoValue),
];

impl Evaluator {
    /// Build from the definition, validating type and parameter count.
    pub fn from_model(model: &EvaluatorModel) -> Result<Self> {
        if model.kind.is_empty() {
            return Err(AlertError::Validation("evaluator missing type property".into()));
        }

        let shape = EVALUATORS
            .iter()
            .find(|(name, _)| *name == model.kind)
            .map(|(_, shape)| *shape)
            .ok_or_else(|| {
                AlertError::Validation(format!("invalid evaluator type: '{}'", model.kind))
            })?;

        match shape {
            Shape::Threshold(op) => {
                let [threshold] = numeric_params::<1>(model)?;
                Ok(Evaluator::Threshold { op, threshold })
            }
            Shape::Range(op) => {
                let [a, b] = numeric_params::<2>(model)?;
                Ok(Evaluator::Range {
                    op,
                    lower: a.min(b),
                    upper: a.max(b),
                })
            }
            Shape::NoValue => Ok(Evaluator::NoValue),
        }
    }

    pub fn is_no_value(&self) -> bool {
        matches!(self, Evaluator::NoValue)
    }

    pub fn eval(&self, value: Option<f64>) -> bool {
        let value = value.filter(|v| !v.is_nan());
        match (self, value) {
            (Evaluator::NoValue, v) => v.is_none(),
            (_, None) => false,
            (Evaluator::Threshold { op, threshold }, Some(v)) => match op {
                ThresholdOp::Gt => v > *threshold,
                ThresholdOp::Lt => v < *threshold,
            },
            (Evaluator::Range { op, lower, upper }, Some(v)) => {
                let inside = v >= *lower && v <= *upper;
                match op {
                    RangeOp::Within => inside,
                    RangeOp::Outside => !inside,
                }
            }
        }
    }
}

impl fmt::Display for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Evaluator::Threshold { op: ThresholdOp::Gt, threshold } => write!(f, "gt {}", threshold),
            Evaluator::Threshold { op: ThresholdOp::Lt, threshold } => write!(f, "lt {}", threshold),
            Evaluator::Range { op: RangeOp::Within, lower, upper } => {
                write!(f, "within_range [{}, {}]", lower, upper)
            }
            Evaluator::Range { op: RangeOp::Outside, lower, upper } => {
                write!(f, "outside_range [{}, {}]", lower, upper)
            }
            Evaluator::NoValue => f.write_str("no_value"),
        }
    }
}

/// First `N` params as floats. Extra params are ignored.
fn numeric_params<const N: usize>(model: &EvaluatorModel) -> Result<[f64; N]> {
    if model.params.len() < N {
        return Err(AlertError::Validation(format!(
            "evaluator '{}' requires {} param(s), got {}",
            model.kind,
            N,
            model.params.len()
        )));
    }
    let mut out = [0.0; N];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = model.params[i].as_f64().ok_or_else(|| {
            AlertError::Validation(format!(
                "evaluator '{}' param {} is not a number: {}",
                model.kind, i, model.params[i]
            ))
        })?;
    }
    Ok(out)
}

// ── Tests ───────────────────────────────────────────────────────────
