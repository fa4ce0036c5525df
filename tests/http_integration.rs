//! Integration tests for the transport stack using wiremock
//!
//! These tests verify header injection, the transport-level retry policy and
//! degraded configuration handling against mocked endpoints.

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Method, Request, StatusCode, Url};
use restgate::api::auth::AuthTransport;
use restgate::api::error::HttpError;
use restgate::api::http::{HttpTransport, Transport, MAX_BODY_BYTES};
use restgate::api::retry::{RetryPolicy, RetryingClient};
use restgate::{ApiClient, ApiError, ClientConfiguration, Credential};
use serde_json::{json, Value};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{bearer_token, body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> ClientConfiguration {
    ClientConfiguration {
        base_url: format!("{}/api/v1", server.uri()),
        credential: Some(Credential::new("test-token")),
        timeout_secs: 5,
        max_retries: 3,
        base_wait_ms: 10,
        retry_wait_secs: 5,
        ..Default::default()
    }
}

fn client_for(server: &MockServer) -> ApiClient {
    ApiClient::new(config_for(server)).expect("client should build")
}

/// Log sink shared with a scoped subscriber
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Run `f` with WARN-level events captured
fn with_captured_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
    let logs = CapturedLogs::default();
    let sink = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .with_writer(move || sink.clone())
        .finish();

    let result = tracing::subscriber::with_default(subscriber, f);
    (result, logs.contents())
}

/// Test module for transport-level behavior
mod transport_tests {
    use super::*;

    /// Existing Authorization headers are replaced, never duplicated
    #[tokio::test]
    async fn test_bearer_header_replaces_existing_values() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/organizations"))
            .and(bearer_token("test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let config = config_for(&server);
        let transport = AuthTransport::new(
            HttpTransport::new(&config).unwrap(),
            &Credential::new("test-token"),
        )
        .unwrap();

        let url = Url::parse(&format!("{}/api/v1/organizations", server.uri())).unwrap();
        let mut request = Request::new(Method::GET, url);
        request
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static("Basic c3RhbGU="));
        request
            .headers_mut()
            .append(AUTHORIZATION, HeaderValue::from_static("Bearer stale-token"));

        let response = transport.execute(request).await.expect("request should complete");
        assert_eq!(response.status(), 200);

        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 1);
        let values: Vec<_> = received[0].headers.get_all("authorization").iter().collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0], "Bearer test-token");
    }

    /// Persistent 500 stops at the attempt ceiling and returns the last response
    #[tokio::test]
    async fn test_server_error_respects_attempt_ceiling() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/networks/N_1"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let outcome = client
            .get::<Value>("networks/N_1", &CancellationToken::new())
            .await;

        assert_eq!(outcome.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(
            outcome.result.unwrap_err().status(),
            Some(StatusCode::INTERNAL_SERVER_ERROR)
        );
    }

    /// Retry-After on a 429 delays the next attempt
    #[tokio::test]
    async fn test_retry_after_is_honored() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/devices"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/v1/devices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"serial": "Q2XX"}])))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let started = Instant::now();
        let outcome = client.get::<Value>("devices", &CancellationToken::new()).await;

        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(outcome.status(), Some(StatusCode::OK));
        assert_eq!(outcome.result.unwrap()[0]["serial"], "Q2XX");
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    /// Client errors other than 429 are never retried by the transport
    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/networks/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "errors": ["Network not found"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let outcome = client
            .get::<Value>("networks/missing", &CancellationToken::new())
            .await;

        assert_eq!(outcome.status(), Some(StatusCode::NOT_FOUND));
        let diagnostics = outcome.diagnostics(&[StatusCode::OK]);
        assert!(diagnostics.iter().any(|d| d.detail.contains("Network not found")));
    }

    /// The request body is replayed on every attempt
    #[tokio::test]
    async fn test_post_body_replayed_on_retry() {
        let server = MockServer::start().await;
        let body = json!({"name": "branch-office", "productTypes": ["switch"]});

        Mock::given(method("POST"))
            .and(path("/api/v1/networks"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/v1/networks"))
            .and(body_json(&body))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "N_9"})))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let outcome = client
            .post::<Value, _>("networks", &body, &CancellationToken::new())
            .await;

        assert_eq!(outcome.result.unwrap()["id"], "N_9");
        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].body, received[1].body);
    }

    /// Cancelling during a rate-limit wait returns promptly
    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/organizations"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
            .mount(&server)
            .await;

        let client = ApiClient::new(ClientConfiguration {
            retry_wait_secs: 60,
            ..config_for(&server)
        })
        .unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome = client.get::<Value>("organizations", &cancel).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(outcome.result.unwrap_err().is_cancelled());
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    /// Each attempt is bounded by the per-request timeout
    #[tokio::test]
    async fn test_timeout_applies_per_attempt() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .expect(2)
            .mount(&server)
            .await;

        let client = ApiClient::new(ClientConfiguration {
            timeout_secs: 1,
            max_retries: 2,
            ..config_for(&server)
        })
        .unwrap();

        let outcome = client.get::<Value>("slow", &CancellationToken::new()).await;

        assert!(outcome.response.is_none());
        match outcome.result {
            Err(ApiError::Transport(e)) => assert!(e.is_timeout()),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    /// Connection failures are retried and then surfaced unchanged
    #[tokio::test]
    async fn test_connection_refused_is_surfaced() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let transport = HttpTransport::new(&ClientConfiguration::default()).unwrap();
        let client = RetryingClient::new(
            transport,
            RetryPolicy {
                max_attempts: 3,
                base_wait: Duration::from_millis(50),
                max_wait: Duration::from_secs(1),
            },
        );

        let url = Url::parse(&format!("http://127.0.0.1:{}/api/v1", port)).unwrap();
        let started = Instant::now();
        let result = client
            .execute(Request::new(Method::GET, url), &CancellationToken::new())
            .await;

        // Two waits: 50ms then 100ms
        assert!(started.elapsed() >= Duration::from_millis(150));
        match result {
            Err(HttpError::Transport(e)) => assert!(e.is_connect()),
            other => panic!("expected connect error, got {:?}", other.map(|r| r.status())),
        }
    }

    /// A connection dropped before any response is retried like a 5xx
    #[tokio::test]
    async fn test_dropped_connection_is_retried() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 1024];
                let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut buf).await;
                drop(socket);
            }
        });

        let transport = HttpTransport::new(&ClientConfiguration::default()).unwrap();
        let client = RetryingClient::new(
            transport,
            RetryPolicy {
                max_attempts: 3,
                base_wait: Duration::from_millis(10),
                max_wait: Duration::from_secs(1),
            },
        );

        let url = Url::parse(&format!("http://{}/api/v1/devices", addr)).unwrap();
        let result = client
            .execute(Request::new(Method::GET, url), &CancellationToken::new())
            .await;

        match result {
            Err(HttpError::Transport(e)) => assert!(e.is_request() && !e.is_connect()),
            other => panic!("expected dropped connection, got {:?}", other.map(|r| r.status())),
        }
        assert_eq!(accepted.load(Ordering::SeqCst), 3);
    }

    /// Oversized bodies are cut at the buffer limit
    #[tokio::test]
    async fn test_large_body_is_truncated() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/huge"))
            .respond_with(ResponseTemplate::new(500).set_body_string("x".repeat(MAX_BODY_BYTES * 2)))
            .mount(&server)
            .await;

        let client = ApiClient::new(ClientConfiguration {
            max_retries: 1,
            ..config_for(&server)
        })
        .unwrap();

        let response = client
            .send::<()>(Method::GET, "huge", None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(response.truncated);
        assert_eq!(response.body.len(), MAX_BODY_BYTES);
    }
}

/// Test module for degraded configuration
mod configuration_tests {
    use super::*;

    /// A malformed proxy is ignored and requests go direct
    #[tokio::test]
    async fn test_malformed_proxy_falls_back_to_direct() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/organizations"))
            .and(bearer_token("test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "1"}])))
            .expect(1)
            .mount(&server)
            .await;

        let (client, logs) = with_captured_logs(|| {
            ApiClient::new(ClientConfiguration {
                proxy: Some("http://[::1".to_string()),
                ..config_for(&server)
            })
        });
        let client = client.expect("malformed proxy must not fail construction");

        assert!(logs.contains("WARN"), "expected a warning, got: {}", logs);
        assert!(logs.contains("Ignoring proxy setting"), "got: {}", logs);

        assert!(!client.transport().proxy_applied());

        let outcome = client
            .get::<Value>("organizations", &CancellationToken::new())
            .await;
        assert_eq!(outcome.result.unwrap()[0]["id"], "1");
    }

    /// An unparsable certificate file falls back to the system trust store
    #[tokio::test]
    async fn test_bad_certificate_falls_back_to_system_roots() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/organizations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let cert_path = std::env::temp_dir().join(format!("restgate-{}.pem", uuid::Uuid::new_v4()));
        std::fs::write(&cert_path, "this is not a certificate").unwrap();

        let client = ApiClient::new(ClientConfiguration {
            cert_path: Some(cert_path.clone()),
            ..config_for(&server)
        })
        .expect("bad certificate must not fail construction");

        assert_eq!(client.transport().extra_roots(), 0);

        let outcome = client
            .get::<Value>("organizations", &CancellationToken::new())
            .await;
        assert!(outcome.is_ok());

        let _ = std::fs::remove_file(cert_path);
    }

    /// A valid proxy is applied
    #[tokio::test]
    async fn test_valid_proxy_is_applied() {
        let server = MockServer::start().await;
        let client = ApiClient::new(ClientConfiguration {
            proxy: Some("http://proxy.internal:3128".to_string()),
            ..config_for(&server)
        })
        .unwrap();

        assert!(client.transport().proxy_applied());
    }
}
