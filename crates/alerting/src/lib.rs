//! Alert condition evaluation engine.
//!
//! This crate provides:
//! - Frame-to-series conversion for columnar query results (wide and long)
//! - Series reducers (avg, min, max, sum, count, last, median, diff, ...)
//! - Threshold and range evaluators, including absence matching
//! - Query conditions with deadlines, cancellation and no-data detection
//! - Rule-level AND/OR combination and alert state derivation

pub mod condition;
pub mod context;
pub mod convert;
pub mod error;
pub mod evaluator;
pub mod handler;
pub mod reducer;
pub mod state;

pub use condition::{
    build_condition, parse_condition, Condition, ConditionModel, DatasourceStore, Operator,
    QueryCondition, QueryHandler, QueryServices,
};
pub use context::{ConditionResult, EvalContext, EvalMatch, Outcome, ResultLogEntry, RuleInfo};
pub use convert::{frame_to_series, frames_to_series};
pub use error::{AlertError, Result};
pub use evaluator::Evaluator;
pub use handler::{AlertRule, EvalHandler, RuleSettings};
pub use reducer::{QueryReducer, ReducerType};
pub use state::{AlertState, ExecutionErrorOption, NoDataOption, StateSettings};
