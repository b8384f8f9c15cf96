//! Dispatch against a real HTTP server standing in for a chat-completions endpoint.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use scalebench_rs::persist;
use scalebench_rs::{
    run_batch, run_sweep, summarize, CancellationToken, DispatchOptions, FailureKind,
    HttpTransport, SweepConfig, TargetConfig, TransportLevelRunner,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CHAT_PATH: &str = "/v1/chat/completions";

fn completion(tokens: u64) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "ok"}}],
        "usage": {"prompt_tokens": 12, "completion_tokens": tokens, "total_tokens": 12 + tokens}
    })
}

fn options(pool_limit: usize, request_timeout: Duration) -> DispatchOptions {
    DispatchOptions {
        pool_limit,
        request_timeout,
        stagger_every: 100,
        stagger_pause: Duration::from_millis(50),
        diagnostic_sample: 2,
    }
}

fn transport_for(url: &str, timeout: Duration) -> (Arc<HttpTransport>, Arc<serde_json::Value>) {
    let target = TargetConfig::try_new(url, Some("test-key".to_string()), "gemma3").unwrap();
    let body = Arc::new(target.request_body());
    (Arc::new(HttpTransport::try_new(target, timeout).unwrap()), body)
}

#[tokio::test]
async fn sends_bearer_token_and_chat_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "gemma3",
            "max_tokens": 512,
            "temperature": 0.7
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(64)))
        .expect(2)
        .mount(&server)
        .await;

    let url = format!("{}{}", server.uri(), CHAT_PATH);
    let (transport, body) = transport_for(&url, Duration::from_secs(5));
    let batch = run_batch(2, transport, body, &options(2, Duration::from_secs(5)), None)
        .await
        .unwrap();

    let record = summarize(&batch);
    assert_eq!(record.successful_requests, 2);
    assert_eq!(record.total_tokens, 128);
}

#[tokio::test]
async fn server_errors_lower_the_success_rate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(100)))
        .up_to_n_times(3)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"error": {"message": "overloaded"}})),
        )
        .with_priority(2)
        .mount(&server)
        .await;

    let url = format!("{}{}", server.uri(), CHAT_PATH);
    let (transport, body) = transport_for(&url, Duration::from_secs(5));
    let batch = run_batch(4, transport, body, &options(1, Duration::from_secs(5)), None)
        .await
        .unwrap();

    assert_eq!(batch.failures_of(FailureKind::HttpError), 1);
    let record = summarize(&batch);
    assert_eq!(record.successful_requests, 3);
    assert_eq!(record.failed_requests, 1);
    assert_eq!(record.total_tokens, 300);
    assert_eq!(record.success_rate_percent, 75.0);
}

#[tokio::test]
async fn slow_responses_time_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion(10))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let url = format!("{}{}", server.uri(), CHAT_PATH);
    let timeout = Duration::from_millis(200);
    let (transport, body) = transport_for(&url, timeout);
    let batch = run_batch(2, transport, body, &options(2, timeout), None)
        .await
        .unwrap();

    assert_eq!(batch.failures_of(FailureKind::Timeout), 2);
    assert_eq!(summarize(&batch).total_tokens, 0);
}

#[tokio::test]
async fn malformed_and_tokenless_bodies_are_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/text"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/empty"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let opts = options(4, Duration::from_secs(5));

    let timeout = Duration::from_secs(5);
    let (transport, body) = transport_for(&format!("{}/text", server.uri()), timeout);
    let batch = run_batch(1, transport, body, &opts, None).await.unwrap();
    assert_eq!(batch.failures_of(FailureKind::DecodeError), 1);

    let (transport, body) = transport_for(&format!("{}/empty", server.uri()), timeout);
    let batch = run_batch(1, transport, body, &opts, None).await.unwrap();
    assert_eq!(batch.failures_of(FailureKind::EmptyTokenCount), 1);
    assert_eq!(summarize(&batch).failed_requests, 1);
}

#[tokio::test]
async fn refused_connections_are_classified() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let url = format!("http://127.0.0.1:{}{}", port, CHAT_PATH);
    let (transport, body) = transport_for(&url, Duration::from_secs(5));
    let batch = run_batch(3, transport, body, &options(3, Duration::from_secs(5)), None)
        .await
        .unwrap();

    assert_eq!(batch.failures_of(FailureKind::ConnectionError), 3);
    assert_eq!(summarize(&batch).successful_requests, 0);
}

#[tokio::test]
async fn sweep_results_are_persisted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(20)))
        .mount(&server)
        .await;

    let url = format!("{}{}", server.uri(), CHAT_PATH);
    let target = TargetConfig::try_new(&url, None, "gemma3").unwrap();
    let body = target.request_body();
    let config = SweepConfig::try_new(vec![1, 3])
        .unwrap()
        .with_cooldown(Duration::from_millis(10));
    let transport = Arc::new(HttpTransport::try_new(target, config.request_timeout).unwrap());
    let mut runner = TransportLevelRunner::new(transport, body, config.clone());

    let run = run_sweep("mock", &config, &mut runner, &CancellationToken::new()).await;
    assert_eq!(run.records.len(), 2);
    assert_eq!(run.records[1].total_tokens, 60);

    let dir = tempfile::tempdir().unwrap();
    let file = persist::results_path(dir.path(), "mock", &config.timestamp_format).unwrap();
    persist::append_records(&file, &run.records).unwrap();

    assert_eq!(persist::read_records(&file).unwrap(), run.records);
    assert_eq!(persist::latest_result_file(dir.path()).unwrap(), file);
    assert_eq!(persist::provider_label(&file), "mock");
}
