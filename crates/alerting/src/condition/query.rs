//! [`QueryCondition`]: query a datasource, reduce each series, evaluate.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use vigil_core::{DataSource, Query, QueryRequest, Series, TimeRange};

use crate::context::{ConditionResult, EvalContext, EvalMatch};
use crate::convert::frames_to_series;
use crate::error::{AlertError, Result};
use crate::evaluator::Evaluator;
use crate::reducer::QueryReducer;

use super::{Condition, ConditionModel, Operator, QueryServices};

/// Metric name recorded when a query returns no series and the evaluator
/// matches on absence.
const NO_DATA_METRIC: &str = "NoData";

pub struct QueryCondition {
    /// Position of the condition within its rule.
    pub index: usize,
    pub ref_id: String,
    pub time_range: TimeRange,
    pub datasource_id: i64,
    /// Datasource-specific query body.
    pub model: serde_json::Value,
    pub reducer: QueryReducer,
    pub evaluator: Evaluator,
    pub operator: Operator,
    services: QueryServices,
}

impl fmt::Debug for QueryCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCondition")
            .field("index", &self.index)
            .field("ref_id", &self.ref_id)
            .field("time_range", &self.time_range)
            .field("datasource_id", &self.datasource_id)
            .field("reducer", &self.reducer)
            .field("evaluator", &self.evaluator)
            .field("operator", &self.operator)
            .finish_non_exhaustive()
    }
}

impl QueryCondition {
    /// Validate a definition and build the condition.
    pub fn from_model(model: &ConditionModel, index: usize, services: QueryServices) -> Result<Self> {
        let invalid = |msg: String| AlertError::Validation(format!("condition {}: {}", index, msg));

        let params = &model.query.params;
        if params.len() < 3 {
            return Err(invalid(format!(
                "query params must be [refId, from, to], got {} value(s)",
                params.len()
            )));
        }
        let param = |i: usize| {
            params[i]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid(format!("query param {} must be a string", i)))
        };
        let ref_id = param(0)?;
        let time_range = TimeRange::new(param(1)?, param(2)?);
        time_range.validate().map_err(|e| invalid(e.to_string()))?;

        let reducer = QueryReducer::from_model(&model.reducer).map_err(|e| at_condition(index, e))?;
        let evaluator =
            Evaluator::from_model(&model.evaluator).map_err(|e| at_condition(index, e))?;

        Ok(Self {
            index,
            ref_id,
            time_range,
            datasource_id: model.query.datasource_id,
            model: model.query.model.clone(),
            reducer,
            evaluator,
            operator: model.operator(),
            services,
        })
    }

    fn build_request(&self, datasource: &DataSource, debug: bool) -> QueryRequest {
        let mut headers = BTreeMap::new();
        headers.insert("FromAlert".to_string(), "true".to_string());
        QueryRequest {
            time_range: self.time_range.clone(),
            queries: vec![Query::new(self.ref_id.clone(), self.model.clone(), datasource.clone())],
            headers,
            debug,
        }
    }

    /// Run `fut` under the evaluation deadline and cancellation flag.
    async fn guarded<T>(
        ctx: &EvalContext,
        deadline: tokio::time::Instant,
        fut: impl Future<Output = T>,
    ) -> Result<T> {
        tokio::select! {
            res = tokio::time::timeout_at(deadline, fut) => res.map_err(|_| AlertError::Timeout),
            _ = ctx.cancelled() => Err(AlertError::Cancelled),
        }
    }

    /// Dispatch the query and collect every returned series.
    async fn execute_query(&self, ctx: &mut EvalContext) -> Result<Vec<Series>> {
        if ctx.is_cancelled() {
            return Err(AlertError::Cancelled);
        }
        let deadline = tokio::time::Instant::now() + ctx.timeout;

        let datasources = &self.services.datasources;
        let datasource = Self::guarded(
            ctx,
            deadline,
            datasources.get_datasource(self.datasource_id, ctx.rule.org_id),
        )
        .await?
        .map_err(|message| AlertError::DatasourceNotFound {
            id: self.datasource_id,
            message,
        })?;

        let request = self.build_request(&datasource, ctx.is_debug);
        if ctx.is_debug {
            let data = json!({
                "datasource": datasource.name,
                "request": serde_json::to_value(&request).unwrap_or_default(),
            });
            ctx.log(format!("Condition[{}]: Query", self.index), data);
        }

        let handler = &self.services.handler;
        let response = Self::guarded(ctx, deadline, handler.handle_request(&datasource, &request))
            .await?
            .map_err(AlertError::Query)?;

        let mut result = Vec::new();
        for (ref_id, query_result) in &response.results {
            if let Some(message) = &query_result.error {
                return Err(AlertError::Response {
                    ref_id: ref_id.clone(),
                    message: message.clone(),
                });
            }

            let from_frames = query_result.uses_frames();
            let series = if from_frames {
                frames_to_series(query_result.frames.as_deref().unwrap_or_default())?
            } else {
                query_result.series.clone()
            };

            if ctx.is_test_run || ctx.is_debug {
                let mut data = serde_json::Map::new();
                if ctx.is_test_run {
                    data.insert("series".into(), serde_json::to_value(&series).unwrap_or_default());
                }
                if ctx.is_debug {
                    if let Some(meta) = &query_result.meta {
                        data.insert("meta".into(), meta.clone());
                    }
                }
                if from_frames {
                    data.insert("fromDataframe".into(), json!(true));
                }
                ctx.log(
                    format!("Condition[{}]: Query Result", self.index),
                    serde_json::Value::Object(data),
                );
            }

            result.extend(series);
        }

        Ok(result)
    }

    /// Reduce and evaluate every series, then aggregate.
    pub(crate) fn evaluate_series(&self, series: &[Series], ctx: &mut EvalContext) -> ConditionResult {
        if series.is_empty() {
            let firing = self.evaluator.is_no_value();
            if ctx.is_test_run {
                ctx.log(
                    format!(
                        "Condition[{}]: Eval: {}, Query Returned No Series (reduced to null/no value)",
                        self.index, firing
                    ),
                    serde_json::Value::Null,
                );
            }
            let matches = if firing {
                vec![EvalMatch {
                    metric: NO_DATA_METRIC.to_string(),
                    value: None,
                    tags: Default::default(),
                }]
            } else {
                Vec::new()
            };
            return ConditionResult {
                firing,
                no_data_found: !firing,
                operator: self.operator,
                matches,
                error: None,
            };
        }

        let mut matches = Vec::new();
        let mut null_count = 0usize;

        for s in series {
            let reduced = self.reducer.reduce(s).filter(|v| !v.is_nan());
            let matched = self.evaluator.eval(reduced);
            if reduced.is_none() {
                null_count += 1;
            }

            debug!(
                rule_id = ctx.rule.id,
                condition = self.index,
                series = %s.name,
                value = ?reduced,
                matched,
                "series evaluated"
            );
            if ctx.is_test_run {
                ctx.log(
                    format!(
                        "Condition[{}]: Eval: {}, Metric: {}, Value: {}",
                        self.index,
                        matched,
                        s.name,
                        reduced.map_or_else(|| "null".to_string(), |v| v.to_string())
                    ),
                    serde_json::Value::Null,
                );
            }

            if matched {
                matches.push(EvalMatch {
                    metric: s.name.clone(),
                    value: reduced,
                    tags: s.tags.clone(),
                });
            }
        }

        ConditionResult {
            firing: !matches.is_empty(),
            no_data_found: null_count == series.len(),
            operator: self.operator,
            matches,
            error: None,
        }
    }
}

/// Prefix a validation message with the condition index.
fn at_condition(index: usize, e: AlertError) -> AlertError {
    match e {
        AlertError::Validation(msg) => AlertError::Validation(format!("condition {}: {}", index, msg)),
        other => other,
    }
}

#[async_trait]
impl Condition for QueryCondition {
    async fn eval(&self, ctx: &mut EvalContext) -> ConditionResult {
        match self.execute_query(ctx).await {
            Ok(series) => self.evaluate_series(&series, ctx),
            Err(e) => {
                warn!(
                    rule_id = ctx.rule.id,
                    condition = self.index,
                    error = %e,
                    "condition query failed"
                );
                ConditionResult::failed(self.operator, e)
            }
        }
    }

    fn operator(&self) -> Operator {
        self.operator
    }
}
