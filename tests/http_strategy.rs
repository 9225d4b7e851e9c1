//! Integration tests for the reference HTTP strategy.
//!
//! These tests verify status mapping, Retry-After propagation and credential
//! headers against a mock HTTP server.

use std::time::Duration;

use mediafetch_core::{
    AttemptError, Credentials, Database, HttpStrategy, NewTask, Strategy, Task, TaskKind,
    TaskQueue,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Builds a persisted task for `url`.
async fn task_for(url: &str) -> Task {
    let queue = TaskQueue::new(Database::new_in_memory().await.expect("in-memory db"));
    let id = queue
        .submit(NewTask::new(url, TaskKind::Video))
        .await
        .expect("submit");
    queue.get(&id).await.expect("get").expect("task exists")
}

async fn mount(server: &MockServer, route: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .mount(server)
        .await;
}

fn strategy() -> HttpStrategy {
    HttpStrategy::with_timeouts(Duration::from_secs(5), Duration::from_secs(10))
        .expect("client builds")
}

#[tokio::test]
async fn test_success_reports_bytes_and_content_type() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/video/1",
        ResponseTemplate::new(200)
            .set_body_bytes(b"0123456789".to_vec())
            .insert_header("content-type", "video/mp4"),
    )
    .await;

    let url = format!("{}/video/1", server.uri());
    let task = task_for(&url).await;
    let artifacts = strategy().download(&task, None).await.unwrap();

    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].reference, url);
    assert_eq!(artifacts[0].bytes, Some(10));
    assert_eq!(artifacts[0].content_type.as_deref(), Some("video/mp4"));
}

#[tokio::test]
async fn test_not_found_maps_to_http_status() {
    let server = MockServer::start().await;
    mount(&server, "/video/missing", ResponseTemplate::new(404)).await;

    let task = task_for(&format!("{}/video/missing", server.uri())).await;
    let err = strategy().download(&task, None).await.unwrap_err();

    assert!(
        matches!(err, AttemptError::HttpStatus { status: 404, retry_after: None, .. }),
        "got {err:?}"
    );
}

#[tokio::test]
async fn test_too_many_requests_carries_retry_after() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/video/busy",
        ResponseTemplate::new(429).insert_header("retry-after", "7"),
    )
    .await;

    let task = task_for(&format!("{}/video/busy", server.uri())).await;
    let err = strategy().download(&task, None).await.unwrap_err();

    assert!(matches!(err, AttemptError::HttpStatus { status: 429, .. }));
    assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
}

#[tokio::test]
async fn test_empty_body_is_an_error() {
    let server = MockServer::start().await;
    mount(&server, "/video/empty", ResponseTemplate::new(200)).await;

    let task = task_for(&format!("{}/video/empty", server.uri())).await;
    let err = strategy().download(&task, None).await.unwrap_err();

    assert!(matches!(err, AttemptError::EmptyResponse { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_credentials_are_sent_as_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/video/private"))
        .and(header("cookie", "sessionid=abc; ttwid=xyz"))
        .and(header("x-client", "mediafetch-test"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = Credentials::new()
        .with_cookie("sessionid", "abc")
        .with_cookie("ttwid", "xyz")
        .with_header("x-client", "mediafetch-test");
    let task = task_for(&format!("{}/video/private", server.uri())).await;

    let artifacts = strategy()
        .download(&task, Some(&credentials))
        .await
        .unwrap();
    assert_eq!(artifacts[0].bytes, Some(2));
}

#[tokio::test]
async fn test_only_web_urls_are_handled() {
    let web = task_for("https://example.com/video/1").await;
    // Submission rejects other schemes, so rewrite a stored task.
    let mut ftp = web.clone();
    ftp.url = "ftp://example.com/video/1".to_string();

    assert!(strategy().can_handle(&web));
    assert!(!strategy().can_handle(&ftp));
}
