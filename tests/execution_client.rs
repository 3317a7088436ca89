use axum::{http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio_test::assert_ok;

use collab_session::execution::{CodeExecutor, ExecutionError, ExecutionRequest, HttpExecutor};

async fn run(Json(body): Json<Value>) -> Json<Value> {
    let language = body["language"].as_str().unwrap_or_default();
    let code = body["code"].as_str().unwrap_or_default();
    Json(json!({
        "stdout": format!("{}: {}\n", language, code),
        "stderr": "",
        "executionTime": 4.25,
    }))
}

async fn fail() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "sandbox unavailable")
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(2)).await;
    Json(json!({ "stdout": "late" }))
}

async fn garbage() -> &'static str {
    "not json"
}

async fn spawn_service() -> SocketAddr {
    let app = Router::new()
        .route("/run", post(run))
        .route("/fail", post(fail))
        .route("/slow", post(slow))
        .route("/garbage", post(garbage));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn executor(addr: SocketAddr, path: &str, timeout: Duration) -> HttpExecutor {
    HttpExecutor::new(format!("http://{}{}", addr, path), timeout).unwrap()
}

#[tokio::test]
async fn test_execute_returns_service_output() {
    let addr = spawn_service().await;
    let executor = executor(addr, "/run", Duration::from_secs(5));

    let output = assert_ok!(
        executor
            .execute(ExecutionRequest::new("print(1)", "python"))
            .await
    );
    assert_eq!(output.stdout, "python: print(1)\n");
    assert_eq!(output.execution_time_ms, 4.25);
    assert!(!output.has_errors());
}

#[tokio::test]
async fn test_server_error_is_reported() {
    let addr = spawn_service().await;
    let executor = executor(addr, "/fail", Duration::from_secs(5));

    let result = executor.execute(ExecutionRequest::new("1", "javascript")).await;
    match result {
        Err(ExecutionError::Status { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "sandbox unavailable");
        }
        other => panic!("Expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_slow_service_times_out() {
    let addr = spawn_service().await;
    let executor = executor(addr, "/slow", Duration::from_millis(200));

    let result = executor.execute(ExecutionRequest::new("1", "javascript")).await;
    assert!(matches!(result, Err(ExecutionError::Timeout(_))));
}

#[tokio::test]
async fn test_unreadable_body_is_reported() {
    let addr = spawn_service().await;
    let executor = executor(addr, "/garbage", Duration::from_secs(5));

    let result = executor.execute(ExecutionRequest::new("1", "javascript")).await;
    assert!(matches!(result, Err(ExecutionError::InvalidResponse(_))));
}

#[tokio::test]
async fn test_unreachable_service_is_a_request_error() {
    let executor = HttpExecutor::new("http://127.0.0.1:9/run", Duration::from_secs(2)).unwrap();

    let result = executor.execute(ExecutionRequest::new("1", "javascript")).await;
    assert!(matches!(result, Err(ExecutionError::Request(_))));
}
