//! Alert conditions and the collaborators they query through.
//!
//! A condition is built once from its JSON definition (all validation
//! happens here) and then evaluated any number of times. The only built-in
//! kind is the query condition: dispatch a datasource query, reduce each
//! returned series, evaluate each reduced value, aggregate.
//!
//! Query execution and datasource lookup are injected as trait objects so
//! the engine never talks to a datasource directly.

mod query;

#[cfg(test)]
mod tests;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vigil_core::{DataSource, QueryRequest, QueryResponse};

use crate::context::{ConditionResult, EvalContext};
use crate::error::{AlertError, Result};
use crate::evaluator::EvaluatorModel;
use crate::reducer::ReducerModel;

pub use query::QueryCondition;

// ── Collaborators ───────────────────────────────────────────────────

/// Executes a query request against a datasource.
///
/// Implementations own transport, authentication, pooling and caching.
/// Cancellation and deadlines are enforced by the caller, which drops the
/// returned future.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    async fn handle_request(
        &self,
        datasource: &DataSource,
        request: &QueryRequest,
    ) -> std::result::Result<QueryResponse, String>;
}

/// Resolves datasource ids to their configuration.
#[async_trait]
pub trait DatasourceStore: Send + Sync {
    async fn get_datasource(&self, id: i64, org_id: i64) -> std::result::Result<DataSource, String>;
}

/// Collaborators handed to every condition at construction.
#[derive(Clone)]
pub struct QueryServices {
    pub handler: Arc<dyn QueryHandler>,
    pub datasources: Arc<dyn DatasourceStore>,
}

impl QueryServices {
    pub fn new(handler: Arc<dyn QueryHandler>, datasources: Arc<dyn DatasourceStore>) -> Self {
        Self {
            handler,
            datasources,
        }
    }
}

// ── Condition ───────────────────────────────────────────────────────

/// How a condition combines with the conditions before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    #[default]
    And,
    Or,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::And => write!(f, "AND"),
            Operator::Or => write!(f, "OR"),
        }
    }
}

/// A predicate over datasource data producing a [`ConditionResult`].
#[async_trait]
pub trait Condition: Send + Sync + fmt::Debug {
    /// Evaluate once. Execution failures are reported on the result.
    async fn eval(&self, ctx: &mut EvalContext) -> ConditionResult;

    fn operator(&self) -> Operator;
}

// ── Definition ──────────────────────────────────────────────────────

/// `query` section of a condition definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryModel {
    /// `[refId, from, to]`.
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
    #[serde(default)]
    pub datasource_id: i64,
    #[serde(default)]
    pub model: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatorModel {
    #[serde(rename = "type", default)]
    pub kind: Option<Operator>,
}

/// Full condition definition as stored with a rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionModel {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub query: QueryModel,
    #[serde(default)]
    pub reducer: ReducerModel,
    #[serde(default)]
    pub evaluator: EvaluatorModel,
    #[serde(default)]
    pub operator: Option<OperatorModel>,
}

impl ConditionModel {
    pub fn operator(&self) -> Operator {
        self.operator
            .as_ref()
            .and_then(|o| o.kind)
            .unwrap_or_default()
    }
}

// ── Factory ─────────────────────────────────────────────────────────

type ConditionBuilder = fn(&ConditionModel, usize, &QueryServices) -> Result<Box<dyn Condition>>;

fn build_query(model: &ConditionModel, index: usize, services: &QueryServices) -> Result<Box<dyn Condition>> {
    Ok(Box::new(QueryCondition::from_model(model, index, services.clone())?))
}

/// Lookup table from condition `type` to its builder.
const CONDITION_KINDS: &[(&str, ConditionBuilder)] = &[("query", build_query)];

/// Build a condition from its JSON definition.
pub fn parse_condition(
    json: &serde_json::Value,
    index: usize,
    services: &QueryServices,
) -> Result<Box<dyn Condition>> {
    let model: ConditionModel = serde_json::from_value(json.clone())?;
    build_condition(&model, index, services)
}

/// Build a condition from an already deserialized definition.
pub fn build_condition(
    model: &ConditionModel,
    index: usize,
    services: &QueryServices,
) -> Result<Box<dyn Condition>> {
    let builder = CONDITION_KINDS
        .iter()
        .find(|(kind, _)| *kind == model.kind)
        .map(|(_, builder)| *builder)
        .ok_or_else(|| {
            AlertError::Validation(format!(
                "condition {}: unknown condition type '{}'",
                index, model.kind
            ))
        })?;
    builder(model, index, services)
}
