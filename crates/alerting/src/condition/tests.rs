//! Tests for query condition construction, dispatch and aggregation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;

use vigil_core::{
    AlertingConfig, DataSource, Field, FieldValues, Frame, QueryRequest, QueryResponse,
    QueryResult, Series, TimePoint,
};

use super::*;
use crate::context::{EvalContext, Outcome, RuleInfo};
use crate::evaluator::Evaluator;
use crate::reducer::ReducerType;

// ── Mocks ───────────────────────────────────────────────────────────

enum Reply {
    Result(QueryResult),
    Fail(String),
    Hang,
}

struct MockHandler {
    reply: Reply,
    requests: Mutex<Vec<QueryRequest>>,
}

impl MockHandler {
    fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl QueryHandler for MockHandler {
    async fn handle_request(
        &self,
        _datasource: &DataSource,
        request: &QueryRequest,
    ) -> std::result::Result<QueryResponse, String> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.reply {
            Reply::Result(r) => Ok(QueryResponse::single(r.clone())),
            Reply::Fail(msg) => Err(msg.clone()),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err("unreachable".into())
            }
        }
    }
}

struct MockStore;

#[async_trait]
impl DatasourceStore for MockStore {
    async fn get_datasource(&self, id: i64, org_id: i64) -> std::result::Result<DataSource, String> {
        if id == 1 {
            Ok(DataSource {
                id,
                org_id,
                name: "graphite".into(),
                kind: "graphite".into(),
                ..Default::default()
            })
        } else {
            Err(format!("datasource {} not found", id))
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn condition_json(reducer: serde_json::Value, evaluator: serde_json::Value) -> serde_json::Value {
    json!({
        "type": "query",
        "query": {
            "params": ["A", "5m", "now"],
            "datasourceId": 1,
            "model": {"target": "aliasByNode(statsd.fakesite.counters.session_start.mobile.count, 4)"}
        },
        "reducer": reducer,
        "evaluator": evaluator
    })
}

fn avg_gt_100() -> serde_json::Value {
    condition_json(json!({"type": "avg"}), json!({"type": "gt", "params": [100]}))
}

fn services(handler: Arc<MockHandler>) -> QueryServices {
    QueryServices::new(handler, Arc::new(MockStore))
}

fn context() -> EvalContext {
    EvalContext::new(
        RuleInfo {
            id: 7,
            org_id: 1,
            name: "test rule".into(),
        },
        &AlertingConfig::default(),
    )
}

async fn eval_with(json: serde_json::Value, reply: Reply) -> ConditionResult {
    let condition = parse_condition(&json, 0, &services(MockHandler::new(reply))).unwrap();
    condition.eval(&mut context()).await
}

async fn eval_series(json: serde_json::Value, series: Vec<Series>) -> ConditionResult {
    eval_with(json, Reply::Result(QueryResult::from_series("A", series))).await
}

fn single(name: &str, value: f64) -> Series {
    Series::from_values(name, &[(value, 0.0)])
}

fn null_series(name: &str) -> Series {
    Series::new(name, vec![TimePoint::new(None, 0.0)])
}

fn now_field(rows: usize) -> Field {
    Field::new("time", FieldValues::Time(vec![Some(Utc::now()); rows]))
}

// ── Construction ────────────────────────────────────────────────────

#[test]
fn reads_condition_from_json_model() {
    let handler = MockHandler::new(Reply::Fail("unused".into()));
    let model: ConditionModel = serde_json::from_value(avg_gt_100()).unwrap();
    let condition = QueryCondition::from_model(&model, 0, services(handler)).unwrap();

    assert_eq!(condition.ref_id, "A");
    assert_eq!(condition.time_range.from, "5m");
    assert_eq!(condition.time_range.to, "now");
    assert_eq!(condition.datasource_id, 1);
    assert_eq!(condition.reducer.kind, ReducerType::Avg);
    assert!(matches!(condition.evaluator, Evaluator::Threshold { threshold, .. } if threshold == 100.0));
    assert_eq!(condition.operator, Operator::And);
}

#[test]
fn reads_or_operator() {
    let mut json = avg_gt_100();
    json["operator"] = json!({"type": "or"});
    let condition = parse_condition(&json, 1, &services(MockHandler::new(Reply::Hang))).unwrap();
    assert_eq!(condition.operator(), Operator::Or);
}

#[test]
fn construction_rejects_bad_definitions() {
    let svc = services(MockHandler::new(Reply::Hang));
    let cases = vec![
        condition_json(json!({"type": "stddev"}), json!({"type": "gt", "params": [1]})),
        condition_json(json!({"type": "avg"}), json!({"type": "gte", "params": [1]})),
        condition_json(json!({"type": "avg"}), json!({"type": "within_range", "params": [1]})),
        {
            let mut j = avg_gt_100();
            j["query"]["params"] = json!(["A", "yesterday", "now"]);
            j
        },
        {
            let mut j = avg_gt_100();
            j["query"]["params"] = json!(["A"]);
            j
        },
        {
            let mut j = avg_gt_100();
            j["type"] = json!("classic");
            j
        },
        json!({"type": "query", "query": "not an object"}),
    ];

    for json in cases {
        let err = parse_condition(&json, 3, &svc).unwrap_err();
        assert!(err.is_validation(), "expected validation error for {json}: {err}");
    }
}

#[test]
fn validation_messages_name_the_condition() {
    let svc = services(MockHandler::new(Reply::Hang));
    let json = condition_json(json!({"type": "stddev"}), json!({"type": "gt", "params": [1]}));
    let err = parse_condition(&json, 2, &svc).unwrap_err();
    assert!(err.to_string().contains("condition 2"), "{err}");
    assert!(err.to_string().contains("stddev"), "{err}");
}

// ── Firing ──────────────────────────────────────────────────────────

#[tokio::test]
async fn fires_when_avg_above_threshold() {
    let cr = eval_series(avg_gt_100(), vec![single("test1", 120.0)]).await;
    assert!(cr.error.is_none());
    assert!(cr.firing);
    assert_eq!(cr.outcome(), Outcome::Firing);
}

#[tokio::test]
async fn does_not_fire_when_avg_below_threshold() {
    let cr = eval_series(avg_gt_100(), vec![single("test1", 90.0)]).await;
    assert!(!cr.firing);
    assert!(!cr.no_data_found);
    assert_eq!(cr.outcome(), Outcome::NotFiring);
}

#[tokio::test]
async fn fires_on_frame_input() {
    let frame = Frame::new(
        "",
        vec![now_field(2), Field::new("val", FieldValues::Int64(vec![Some(120), Some(150)]))],
    );
    let cr = eval_with(avg_gt_100(), Reply::Result(QueryResult::from_frames("A", vec![frame]))).await;
    assert!(cr.error.is_none());
    assert!(cr.firing);
    assert_eq!(cr.matches.len(), 1);
    assert_eq!(cr.matches[0].metric, "val");
    assert_eq!(cr.matches[0].value, Some(135.0));
}

#[tokio::test]
async fn does_not_fire_below_threshold_on_frame_input() {
    let frame = Frame::new(
        "",
        vec![now_field(2), Field::new("val", FieldValues::Int64(vec![Some(12), Some(47)]))],
    );
    let cr = eval_with(avg_gt_100(), Reply::Result(QueryResult::from_frames("A", vec![frame]))).await;
    assert!(!cr.firing);
}

#[tokio::test]
async fn fires_if_only_first_series_matches() {
    let cr = eval_series(avg_gt_100(), vec![single("test1", 120.0), single("test2", 0.0)]).await;
    assert!(cr.firing);
    assert_eq!(cr.matches.len(), 1);
    assert_eq!(cr.matches[0].metric, "test1");
    assert_eq!(cr.matches[0].value, Some(120.0));
}

#[tokio::test]
async fn records_every_matching_series_in_order() {
    let mut tagged = single("test3", 300.0);
    tagged.tags.insert("host".into(), "c".into());
    let cr = eval_series(
        avg_gt_100(),
        vec![single("test1", 120.0), single("test2", 50.0), tagged],
    )
    .await;
    let metrics: Vec<&str> = cr.matches.iter().map(|m| m.metric.as_str()).collect();
    assert_eq!(metrics, vec!["test1", "test3"]);
    assert_eq!(cr.matches[1].tags.get("host").map(String::as_str), Some("c"));
}

// ── No series / no data ─────────────────────────────────────────────

#[tokio::test]
async fn no_series_sets_no_data_for_gt() {
    let cr = eval_series(avg_gt_100(), vec![]).await;
    assert!(cr.error.is_none());
    assert!(!cr.firing);
    assert!(cr.no_data_found);
    assert_eq!(cr.outcome(), Outcome::NoData);
}

#[tokio::test]
async fn no_series_fires_for_no_value() {
    let json = condition_json(json!({"type": "avg"}), json!({"type": "no_value", "params": []}));
    let cr = eval_series(json, vec![]).await;
    assert!(cr.firing);
    assert!(!cr.no_data_found);
    assert_eq!(cr.matches.len(), 1);
    assert_eq!(cr.matches[0].metric, "NoData");
    assert_eq!(cr.matches[0].value, None);
}

#[tokio::test]
async fn empty_series_fires_for_no_value() {
    let json = condition_json(json!({"type": "avg"}), json!({"type": "no_value", "params": []}));
    let cr = eval_series(json, vec![Series::new("test1", vec![])]).await;
    assert!(cr.firing);
    assert_eq!(cr.matches[0].metric, "test1");
}

#[tokio::test]
async fn no_data_when_both_series_empty() {
    let cr = eval_series(
        avg_gt_100(),
        vec![Series::new("test1", vec![]), Series::new("test2", vec![])],
    )
    .await;
    assert!(cr.no_data_found);
    assert!(!cr.firing);
}

#[tokio::test]
async fn no_data_when_both_series_contain_only_null() {
    let cr = eval_series(avg_gt_100(), vec![null_series("test1"), null_series("test2")]).await;
    assert!(cr.no_data_found);
}

#[tokio::test]
async fn one_series_with_data_clears_no_data() {
    let cr = eval_series(
        avg_gt_100(),
        vec![Series::new("test1", vec![]), single("test2", 120.0)],
    )
    .await;
    assert!(!cr.no_data_found);
    assert!(cr.firing);
}

#[tokio::test]
async fn non_matching_value_still_clears_no_data() {
    let cr = eval_series(avg_gt_100(), vec![null_series("test1"), single("test2", 1.0)]).await;
    assert!(!cr.no_data_found);
    assert!(!cr.firing);
}

#[tokio::test]
async fn count_over_null_points_is_no_data() {
    let json = condition_json(json!({"type": "count"}), json!({"type": "gt", "params": [0]}));
    let cr = eval_series(json, vec![null_series("test1"), null_series("test2")]).await;
    assert!(cr.no_data_found);
    assert!(!cr.firing);
    assert!(cr.matches.is_empty());
}

#[tokio::test]
async fn count_ignores_null_points() {
    let json = condition_json(json!({"type": "count"}), json!({"type": "gt", "params": [1]}));
    let series = Series::new(
        "test1",
        vec![
            TimePoint::new(Some(1.0), 0.0),
            TimePoint::new(None, 1000.0),
            TimePoint::new(Some(2.0), 2000.0),
        ],
    );
    let cr = eval_series(json, vec![series]).await;
    assert!(cr.firing);
    assert_eq!(cr.matches[0].value, Some(2.0));
}

#[tokio::test]
async fn frame_with_only_time_field_is_no_data() {
    let frame = Frame::new("A", vec![now_field(1)]);
    let cr = eval_with(avg_gt_100(), Reply::Result(QueryResult::from_frames("A", vec![frame]))).await;
    assert!(cr.error.is_none());
    assert!(cr.no_data_found);
}

#[tokio::test]
async fn empty_frame_is_no_data_not_missing_series() {
    let frame = Frame::new(
        "",
        vec![now_field(0), Field::new("val", FieldValues::Float64(vec![]))],
    );
    let cr = eval_with(avg_gt_100(), Reply::Result(QueryResult::from_frames("A", vec![frame]))).await;
    assert!(cr.no_data_found);
    assert!(!cr.firing);
}

// ── Execution errors ────────────────────────────────────────────────

#[tokio::test]
async fn handler_error_is_execution_error_not_no_data() {
    let cr = eval_with(avg_gt_100(), Reply::Fail("connection refused".into())).await;
    assert!(matches!(cr.error, Some(AlertError::Query(ref m)) if m == "connection refused"));
    assert!(!cr.firing);
    assert!(!cr.no_data_found);
    assert_eq!(cr.outcome(), Outcome::Error);
}

#[tokio::test]
async fn response_error_is_execution_error() {
    let result = QueryResult {
        ref_id: "A".into(),
        error: Some("bad query".into()),
        ..Default::default()
    };
    let cr = eval_with(avg_gt_100(), Reply::Result(result)).await;
    assert!(matches!(cr.error, Some(AlertError::Response { .. })));
    assert!(!cr.firing);
    assert!(!cr.no_data_found);
}

#[tokio::test]
async fn unconvertible_frame_is_execution_error() {
    let frame = Frame::new(
        "bad",
        vec![Field::new("val", FieldValues::Float64(vec![Some(1.0)]))],
    );
    let cr = eval_with(avg_gt_100(), Reply::Result(QueryResult::from_frames("A", vec![frame]))).await;
    assert!(matches!(cr.error, Some(AlertError::Conversion(_))));
    assert!(!cr.no_data_found);
}

#[tokio::test]
async fn unknown_datasource_is_execution_error() {
    let mut json = avg_gt_100();
    json["query"]["datasourceId"] = json!(42);
    let cr = eval_series(json, vec![single("test1", 120.0)]).await;
    assert!(matches!(cr.error, Some(AlertError::DatasourceNotFound { id: 42, .. })));
    assert!(!cr.firing);
}

#[tokio::test]
async fn timeout_is_execution_error() {
    let condition = parse_condition(&avg_gt_100(), 0, &services(MockHandler::new(Reply::Hang))).unwrap();
    let mut ctx = context().with_timeout(Duration::from_millis(20));
    let cr = condition.eval(&mut ctx).await;
    assert!(matches!(cr.error, Some(AlertError::Timeout)));
    assert!(!cr.firing);
    assert!(!cr.no_data_found);
}

#[tokio::test]
async fn cancellation_is_execution_error() {
    let condition = parse_condition(&avg_gt_100(), 0, &services(MockHandler::new(Reply::Hang))).unwrap();
    let (tx, rx) = watch::channel(false);
    let mut ctx = context().with_cancel(rx);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let _ = tx.send(true);
    });

    let cr = condition.eval(&mut ctx).await;
    assert!(matches!(cr.error, Some(AlertError::Cancelled)));
    assert!(!cr.no_data_found);
}

#[tokio::test]
async fn already_cancelled_context_skips_dispatch() {
    let handler = MockHandler::new(Reply::Result(QueryResult::from_series("A", vec![])));
    let condition = parse_condition(&avg_gt_100(), 0, &services(handler.clone())).unwrap();
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let cr = condition.eval(&mut context().with_cancel(rx)).await;
    assert!(matches!(cr.error, Some(AlertError::Cancelled)));
    assert!(handler.requests.lock().unwrap().is_empty());
}

// ── Request shape and logs ──────────────────────────────────────────

#[tokio::test]
async fn request_carries_model_time_range_and_alert_header() {
    let handler = MockHandler::new(Reply::Result(QueryResult::from_series("A", vec![])));
    let condition = parse_condition(&avg_gt_100(), 0, &services(handler.clone())).unwrap();
    condition.eval(&mut context()).await;

    let requests = handler.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert_eq!(req.time_range.from, "5m");
    assert_eq!(req.headers.get("FromAlert").map(String::as_str), Some("true"));
    assert_eq!(req.queries[0].ref_id, "A");
    assert_eq!(req.queries[0].datasource.id, 1);
    assert_eq!(req.queries[0].datasource.org_id, 1);
    assert!(req.queries[0].model["target"].is_string());
}

#[tokio::test]
async fn test_run_records_query_result_and_reductions() {
    let handler = MockHandler::new(Reply::Result(QueryResult::from_series(
        "A",
        vec![single("test1", 120.0), null_series("test2")],
    )));
    let condition = parse_condition(&avg_gt_100(), 0, &services(handler)).unwrap();
    let mut ctx = context().test_run();
    condition.eval(&mut ctx).await;

    let messages: Vec<&str> = ctx.logs.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(
        messages,
        vec![
            "Condition[0]: Query Result",
            "Condition[0]: Eval: true, Metric: test1, Value: 120",
            "Condition[0]: Eval: false, Metric: test2, Value: null",
        ]
    );
    assert_eq!(ctx.logs[0].data["series"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn regular_run_records_no_logs() {
    let cr_ctx = {
        let handler = MockHandler::new(Reply::Result(QueryResult::from_series(
            "A",
            vec![single("test1", 120.0)],
        )));
        let condition = parse_condition(&avg_gt_100(), 0, &services(handler)).unwrap();
        let mut ctx = context();
        condition.eval(&mut ctx).await;
        ctx
    };
    assert!(cr_ctx.logs.is_empty());
}
