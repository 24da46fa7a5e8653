use std::time::Duration;

use deep_research_client::decoder::DecoderLimits;
use deep_research_client::history::{HistoryStore, RecordStatus};
use deep_research_client::persistence::MemoryBackend;
use deep_research_client::retry::RetryPolicy;
use deep_research_client::session::SessionConfig;
use deep_research_client::{ErrorKind, EventKind, HttpTransport, ResearchClient};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse_response(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

fn client(server: &MockServer) -> ResearchClient<HttpTransport> {
    let transport = HttpTransport::new(server.uri(), Duration::from_secs(5)).unwrap();
    ResearchClient::new(transport)
        .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(10)))
}

#[tokio::test]
async fn streams_events_until_done() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/research"))
        .and(header("accept", "text/event-stream"))
        .and(body_json(json!({"query": "rust", "stream": true})))
        .respond_with(sse_response(
            "data: {\"kind\":\"plan\",\"message\":\"ok\"}\n\ndata: [DONE]\n\n",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let mut events = Vec::new();
    let summary = client(&server)
        .start_research_stream("rust", |event| events.push(event.clone()))
        .await
        .unwrap();

    assert_eq!(summary.events_delivered, 1);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Plan);
    assert_eq!(events[0].message.as_deref(), Some("ok"));
}

#[tokio::test]
async fn tracked_run_stores_streamed_report() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"type\": \"planning\", \"message\": \"planning\", \"data\": null}\r\n\r\n",
        ": keep-alive\r\n\r\n",
        "data: {\"type\": \"step_start\", \"message\": \"step 1\", \"data\": {\"step\": 1}}\r\n\r\n",
        "data: {\"type\": \"report_complete\", \"message\": \"done\", ",
        "\"data\": {\"query\": \"rust\", \"plan\": [], \"results\": [], \"report\": \"# Rust\"}}\r\n\r\n",
    );
    Mock::given(method("POST"))
        .and(path("/api/research"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let client = client(&server);
    let mut history = HistoryStore::open(MemoryBackend::new());
    let mut kinds = Vec::new();

    let record = client
        .run_tracked(&mut history, "rust", |event| kinds.push(event.kind.clone()))
        .await
        .unwrap();

    assert_eq!(
        kinds,
        vec![EventKind::Planning, EventKind::StepStart, EventKind::ReportComplete]
    );
    assert_eq!(record.status, RecordStatus::Completed);
    assert_eq!(record.result.unwrap().report, "# Rust");
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn http_error_carries_server_detail() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/research"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"detail": "pipeline crashed"})))
        .mount(&server)
        .await;

    let client = client(&server);
    let err = client.start_research_stream("rust", |_| {}).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::HttpStatusFailure);
    assert_eq!(err.status, Some(500));
    assert!(err.message.contains("pipeline crashed"));
    assert_eq!(err.details, Some(json!({"detail": "pipeline crashed"})));

    let mut history = HistoryStore::open(MemoryBackend::new());
    let err = client.run_tracked(&mut history, "rust", |_| {}).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::HttpStatusFailure);
    assert_eq!(history.current().unwrap().status, RecordStatus::Failed);
}

#[tokio::test]
async fn non_streaming_request_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/research"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"detail": "busy"})))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/research"))
        .and(body_json(json!({"query": "rust", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": "rust",
            "status": "completed",
            "data": {"updates": [
                {"type": "report_complete", "data": {"query": "rust", "report": "# Blocking"}}
            ]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client(&server).start_research("rust").await.unwrap();

    assert_eq!(response.status, "completed");
    assert_eq!(response.updates().len(), 1);
    assert_eq!(response.final_result().report, "# Blocking");
}

#[tokio::test]
async fn retries_give_up_with_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server).health_check().await.unwrap_err();
    assert_eq!(err.status, Some(502));
    assert!(err.message.contains("Bad Gateway"));
}

#[tokio::test]
async fn stream_deadline_is_a_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/research"))
        .respond_with(sse_response("data: [DONE]\n\n").set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let client = client(&server).with_session_config(SessionConfig {
        timeout: Duration::from_millis(100),
        limits: DecoderLimits::default(),
    });
    let err = client.start_research_stream("rust", |_| {}).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Timeout);
    assert!(!err.is_cancelled());
}

#[tokio::test]
async fn unreachable_backend_is_a_connection_failure() {
    // nothing listens on the discard port
    let transport = HttpTransport::new("http://127.0.0.1:9", Duration::from_secs(5)).unwrap();
    let client = ResearchClient::new(transport)
        .with_retry_policy(RetryPolicy::new(1, Duration::from_millis(1)));

    let err = client.start_research_stream("rust", |_| {}).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConnectionFailure);

    // the fallback fails the same way and marks the record
    let mut history = HistoryStore::open(MemoryBackend::new());
    let err = client.run_tracked(&mut history, "rust", |_| {}).await.unwrap_err();
    assert!(err.is_network());
    let record = history.current().unwrap();
    assert_eq!(record.status, RecordStatus::Failed);
    assert_eq!(record.error.as_deref(), Some(err.user_message().as_str()));
}

#[tokio::test]
async fn service_endpoints() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "healthy",
            "message": "Deep Research API is running"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/research/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ready",
            "steps": [],
            "message": "idle"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/research/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"history": [], "total": 0})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/research/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "History cleared"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let health = client.health_check().await.unwrap();
    assert!(health.is_healthy());
    assert_eq!(health.message.as_deref(), Some("Deep Research API is running"));

    assert_eq!(client.research_status().await.unwrap().status, "ready");
    assert_eq!(client.remote_history().await.unwrap().total, 0);
    assert_eq!(
        client.clear_remote_history().await.unwrap().message,
        "History cleared"
    );
}
