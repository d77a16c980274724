//! Realtime scoring against an in-process mock prediction endpoint.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use inference_tester::config::{AppConfig, RemoteConfig};
use inference_tester::error::{BackendError, FailureCause, RemoteError, ScoringError};
use inference_tester::models::{BatchScorer, RecordScorer, RemoteScorer};
use inference_tester::metrics::ScoringMetrics;
use inference_tester::orchestrator::{Backend, CancelFlag, ScoringOrchestrator};
use inference_tester::source::RecordSource;
use inference_tester::types::{Prediction, Progress, RecordTable, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// How the mock endpoint answers
#[derive(Clone)]
enum Reply {
    /// `{"data":[{"predictionValues":[{"value": v}]}]}`
    Value(f64),
    /// Fixed status and body
    Status(u16, &'static str),
    /// 200 with a raw body
    Raw(&'static str),
    /// `Value` until the given call index, then the status
    FailAt(usize, u16),
}

struct MockEndpoint {
    reply: Reply,
    calls: AtomicUsize,
    headers: Mutex<Vec<HeaderMap>>,
    bodies: Mutex<Vec<String>>,
}

async fn predictions(
    State(mock): State<Arc<MockEndpoint>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    let call = mock.calls.fetch_add(1, Ordering::SeqCst);
    mock.headers.lock().unwrap().push(headers);
    mock.bodies.lock().unwrap().push(body);

    let ok = |value: f64| {
        (
            StatusCode::OK,
            format!(
                concat!(
                    r#"{{"data":[{{"predictionValues":[{{"value":{},"label":1}},"#,
                    r#"{{"value":{},"label":0}}],"prediction":1,"rowId":0}}]}}"#
                ),
                value,
                1.0 - value
            ),
        )
    };

    match &mock.reply {
        Reply::Value(value) => ok(*value),
        Reply::Status(status, body) => (StatusCode::from_u16(*status).unwrap(), body.to_string()),
        Reply::Raw(body) => (StatusCode::OK, body.to_string()),
        Reply::FailAt(k, status) if call == *k => {
            (StatusCode::from_u16(*status).unwrap(), "internal error".to_string())
        }
        Reply::FailAt(..) => ok(0.5),
    }
}

async fn spawn_mock(reply: Reply) -> (SocketAddr, Arc<MockEndpoint>) {
    let mock = Arc::new(MockEndpoint {
        reply,
        calls: AtomicUsize::new(0),
        headers: Mutex::new(Vec::new()),
        bodies: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route("/predApi/v1.0/deployments/test-deployment/predictions", post(predictions))
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, mock)
}

fn remote_config(addr: SocketAddr, memoize: bool) -> RemoteConfig {
    RemoteConfig {
        endpoint_url: RemoteScorer::endpoint_for(&format!("http://{}", addr), "test-deployment"),
        routing_key_header: "DataRobot-Key".to_string(),
        routing_key: "routing-key-123".to_string(),
        token_env: "INFERENCE_TESTER_UNUSED".to_string(),
        timeout_secs: Some(10),
        memoize,
    }
}

fn base_table(rows: usize) -> RecordTable {
    let columns = vec![
        "line_speed".to_string(),
        "coat_weight".to_string(),
        "operator".to_string(),
    ];
    let rows = (0..rows)
        .map(|i| {
            vec![
                Value::Integer(100 + i as i64),
                Value::Number((i % 7) as f64 * 0.5),
                Value::Text(format!("op{}", i % 3)),
            ]
        })
        .collect();
    RecordTable::new(columns, rows)
}

fn small_table(rows: usize) -> Arc<RecordTable> {
    Arc::new(base_table(rows))
}

/// Stand-in for the local artifact: constant prediction per row
struct ConstantBatch(f64);

impl BatchScorer for ConstantBatch {
    fn predict(&self, table: &RecordTable) -> Result<Vec<Prediction>, ScoringError> {
        Ok((0..table.len()).map(|i| Prediction::new(i, self.0)).collect())
    }
}

#[tokio::test]
async fn test_end_to_end_batch_and_realtime() {
    let source = RecordSource::from_table(base_table(500));
    let base = source.load_base().unwrap();
    assert_eq!(base.len(), 500);

    let table = source.sample(&base, 1000, 42).unwrap();
    assert_eq!(table.len(), 1000);

    let orchestrator = ScoringOrchestrator::new();

    let batch = orchestrator
        .score(table.clone(), Backend::Local(&ConstantBatch(0.1)))
        .await
        .unwrap();
    assert_eq!(batch.predictions.len(), 1000);

    let (addr, mock) = spawn_mock(Reply::Value(0.73)).await;
    let scorer = RemoteScorer::with_token(&remote_config(addr, false), "test-token").unwrap();
    let mut progress: Vec<Progress> = Vec::new();

    let realtime = orchestrator
        .score_with_progress(table.clone(), Backend::Remote(&scorer), &CancelFlag::new(), |u| {
            progress.push(u.progress)
        })
        .await
        .unwrap();

    assert_eq!(realtime.predictions.len(), 1000);
    assert!(realtime.values().iter().all(|&v| (v - 0.73).abs() < 1e-12));
    assert_eq!(mock.calls.load(Ordering::SeqCst), 1000);
    assert_eq!(progress.len(), 1000);
    for (i, p) in progress.iter().enumerate() {
        assert_eq!(*p, Progress { completed: i + 1, total: 1000 });
    }
    assert!(
        (realtime.average_seconds_per_record - realtime.elapsed_seconds / 1000.0).abs() < 1e-12
    );
}

#[tokio::test]
async fn test_default_config_sends_every_sampled_record() {
    let source = RecordSource::from_table(base_table(500));
    let base = source.load_base().unwrap();
    let table = source.sample(&base, 1000, 42).unwrap();

    // Sampling 1000 of 500 with replacement repeats rows
    let distinct: std::collections::HashSet<String> = table
        .iter()
        .map(|row| serde_json::to_string(&row.to_record()).unwrap())
        .collect();
    assert!(distinct.len() < 1000);

    let (addr, mock) = spawn_mock(Reply::Value(0.73)).await;
    let mut config = AppConfig::default().remote;
    config.endpoint_url =
        RemoteScorer::endpoint_for(&format!("http://{}", addr), "test-deployment");
    let scorer = RemoteScorer::with_token(&config, "test-token").unwrap();

    let metrics = Arc::new(ScoringMetrics::new());
    let result = ScoringOrchestrator::with_metrics(metrics.clone())
        .score(table, Backend::Remote(&scorer))
        .await
        .unwrap();

    assert_eq!(result.predictions.len(), 1000);
    assert_eq!(mock.calls.load(Ordering::SeqCst), 1000);
    assert_eq!(metrics.get_call_stats().count, 1000);
    assert_eq!(metrics.cached_records.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn test_request_headers_and_payload() {
    let (addr, mock) = spawn_mock(Reply::Value(0.42)).await;
    let scorer = RemoteScorer::with_token(&remote_config(addr, false), "test-token").unwrap();
    let table = small_table(2);

    let prediction = scorer.predict_one(table.row(1).unwrap()).await.unwrap();
    assert!((prediction.value - 0.42).abs() < 1e-12);
    assert!(!prediction.cached);

    let headers = mock.headers.lock().unwrap();
    assert_eq!(headers[0]["content-type"], "application/json; charset=UTF-8");
    assert_eq!(headers[0]["authorization"], "Bearer test-token");
    assert_eq!(headers[0]["datarobot-key"], "routing-key-123");

    let bodies = mock.bodies.lock().unwrap();
    let payload: serde_json::Value = serde_json::from_str(&bodies[0]).unwrap();
    let records = payload.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["line_speed"], serde_json::json!(101));
    assert_eq!(records[0]["coat_weight"], serde_json::json!(0.5));
    assert!(bodies[0].contains(r#""line_speed":101,"#));
    assert_eq!(records[0]["operator"], serde_json::json!("op1"));
}

#[tokio::test]
async fn test_failure_on_row_k_stops_run() {
    let (addr, mock) = spawn_mock(Reply::FailAt(4, 500)).await;
    let scorer = RemoteScorer::with_token(&remote_config(addr, false), "test-token").unwrap();
    let orchestrator = ScoringOrchestrator::new();

    let failure = orchestrator
        .score(small_table(10), Backend::Remote(&scorer))
        .await
        .unwrap_err();

    assert_eq!(failure.completed, 4);
    assert_eq!(failure.predictions.len(), 4);
    assert_eq!(mock.calls.load(Ordering::SeqCst), 5);
    assert!(matches!(
        failure.cause,
        FailureCause::Backend(BackendError::Remote(RemoteError::HttpStatus { status: 500, .. }))
    ));
}

#[tokio::test]
async fn test_rejected_credential() {
    let (addr, mock) = spawn_mock(Reply::Status(401, "invalid token")).await;
    let scorer = RemoteScorer::with_token(&remote_config(addr, false), "wrong").unwrap();
    let orchestrator = ScoringOrchestrator::new();

    let failure = orchestrator
        .score(small_table(3), Backend::Remote(&scorer))
        .await
        .unwrap_err();

    assert_eq!(failure.completed, 0);
    assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
    assert!(matches!(
        failure.cause,
        FailureCause::Backend(BackendError::Remote(RemoteError::Auth { status: 401, .. }))
    ));
}

#[tokio::test]
async fn test_schema_rejection() {
    let (addr, _mock) = spawn_mock(Reply::Status(422, "column line_speed not in model")).await;
    let scorer = RemoteScorer::with_token(&remote_config(addr, false), "test-token").unwrap();
    let table = small_table(1);

    let err = scorer.predict_one(table.row(0).unwrap()).await.unwrap_err();
    match err {
        RemoteError::Schema { status, message } => {
            assert_eq!(status, 422);
            assert!(message.contains("line_speed"));
        }
        other => panic!("expected Schema, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_response() {
    let (addr, _mock) = spawn_mock(Reply::Raw(r#"{"data":[]}"#)).await;
    let scorer = RemoteScorer::with_token(&remote_config(addr, false), "test-token").unwrap();
    let table = small_table(1);

    let err = scorer.predict_one(table.row(0).unwrap()).await.unwrap_err();
    assert!(matches!(err, RemoteError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_network_error() {
    // Bind then drop to get a port with nothing listening
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let scorer = RemoteScorer::with_token(&remote_config(addr, false), "test-token").unwrap();
    let table = small_table(1);

    let err = scorer.predict_one(table.row(0).unwrap()).await.unwrap_err();
    assert!(matches!(err, RemoteError::Network(_)));
}

#[tokio::test]
async fn test_memoized_rows_skip_requests() {
    let (addr, mock) = spawn_mock(Reply::Value(0.3)).await;
    let scorer = RemoteScorer::with_token(&remote_config(addr, true), "test-token").unwrap();

    // Two distinct rows, each repeated
    let table = Arc::new(RecordTable::new(
        vec!["x".to_string()],
        vec![
            vec![Value::Number(1.0)],
            vec![Value::Number(2.0)],
            vec![Value::Number(1.0)],
            vec![Value::Number(2.0)],
        ],
    ));

    let metrics = Arc::new(ScoringMetrics::new());
    let result = ScoringOrchestrator::with_metrics(metrics.clone())
        .score(table, Backend::Remote(&scorer))
        .await
        .unwrap();

    assert_eq!(result.predictions.len(), 4);
    assert_eq!(mock.calls.load(Ordering::SeqCst), 2);
    assert_eq!(metrics.get_call_stats().count, 2);
    assert_eq!(metrics.cached_records.load(Ordering::Relaxed), 2);
}
