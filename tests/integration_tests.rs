//! Integration tests using wiremock to simulate the recognition services.

use carmen_cloud::retry::{predicate_fn, RetryOnRetryable, RetryPredicate};
use carmen_cloud::{
    AnprClient, AnprRequest, Error, InputImage, RetryContext, RetryPolicy, RetryStrategy,
    Selector, TransportClient, TransportRequest, VehicleClient, VehicleRequest,
    REQUEST_ID_HEADER,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn plate() -> InputImage {
    InputImage::jpeg(vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10], "plate.jpg")
}

fn fast_retry(max_retries: usize) -> RetryPolicy {
    RetryPolicy::new(RetryStrategy::Fixed {
        delay: Duration::from_millis(10),
        max_retries,
    })
}

fn recognition_body() -> serde_json::Value {
    json!({
        "version": "1.0",
        "data": { "vehicles": [{ "plate": { "text": "ABC123" } }] }
    })
}

#[tokio::test]
async fn test_anpr_search_sends_multipart_form() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/anpr/us"))
        .and(header("x-api-key", "secret"))
        .and(header("accept", "application/json"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(REQUEST_ID_HEADER, "abc-123")
                .set_body_json(recognition_body()),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = AnprClient::builder()
        .endpoint(format!("{}/anpr", mock_server.uri()))
        .api_key("secret")
        .build()
        .unwrap();

    let request = AnprRequest::new()
        .services([Selector::Anpr])
        .region("us")
        .image(plate());

    let result = client.search_async(&request).await.unwrap();

    assert_eq!(result.request_id.as_deref(), Some("abc-123"));
    assert_eq!(result.version.as_deref(), Some("1.0"));
    assert_eq!(
        result.data.as_ref().unwrap()["vehicles"][0]["plate"]["text"],
        "ABC123"
    );

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);

    let content_type = requests[0].headers.get("content-type").unwrap();
    assert!(content_type
        .to_str()
        .unwrap()
        .starts_with("multipart/form-data; boundary="));

    let body = String::from_utf8_lossy(&requests[0].body);
    let service_at = body.find("name=\"service\"").unwrap();
    let image_at = body.find("name=\"image\"").unwrap();
    assert!(service_at < image_at);
    assert!(body.contains("ANPR"));
    assert!(body.contains("filename=\"plate.jpg\""));
    assert!(body.contains("image/jpeg"));
    assert!(!body.contains("name=\"roi\""));
}

#[tokio::test]
async fn test_vehicle_flags_and_optional_fields() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/vehicle/eur"))
        .and(header("X-Disable-Call-Statistics", "true"))
        .and(header("X-Disable-Image-Resizing", "false"))
        .and(header("X-Enable-Wide-Range-Analysis", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(recognition_body()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = VehicleClient::builder()
        .endpoint(format!("{}/vehicle", mock_server.uri()))
        .api_key("secret")
        .disable_call_statistics(true)
        .enable_wide_range_analysis(true)
        .build()
        .unwrap();

    let request = VehicleRequest::new()
        .services([Selector::Anpr, Selector::Mmr])
        .region("eur")
        .location("HUN")
        .roi("0,0,100,0,100,100,0,100")
        .maxreads(3)
        .image(plate());

    let response = client.send_async(&request).await.unwrap();
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.attempts, 1);
    assert!(!response.was_retried());
    assert_eq!(response.request_id, None);
    assert_eq!(response.data.request_id, None);

    let requests = mock_server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("ANPR,MMR"));

    let order: Vec<usize> = ["service", "image", "location", "roi", "maxreads"]
        .iter()
        .map(|field| body.find(&format!("name=\"{}\"", field)).unwrap())
        .collect();
    assert!(order.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn test_subpath_normalization() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/vehicle"))
        .respond_with(ResponseTemplate::new(200).set_body_json(recognition_body()))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/vehicle/us"))
        .respond_with(ResponseTemplate::new(200).set_body_json(recognition_body()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = VehicleClient::builder()
        .endpoint(format!("{}/vehicle", mock_server.uri()))
        .api_key("secret")
        .build()
        .unwrap();

    let bare = VehicleRequest::new().region("").image(plate());
    client.search_async(&bare).await.unwrap();

    let slashed = VehicleRequest::new().region("/us").image(plate());
    client.search_async(&slashed).await.unwrap();
}

#[tokio::test]
async fn test_persistent_server_error_exhausts_default_budget() {
    init_tracing();
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/anpr"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let client = AnprClient::builder()
        .endpoint(format!("{}/anpr", mock_server.uri()))
        .api_key("secret")
        .build()
        .unwrap();

    let start = std::time::Instant::now();
    let result = client.search_async(&AnprRequest::new().image(plate())).await;

    match result {
        Err(Error::Api {
            status,
            raw_response,
            ..
        }) => {
            assert_eq!(status.as_u16(), 503);
            assert_eq!(raw_response, "Service Unavailable");
        }
        other => panic!("Expected Api error, got {:?}", other),
    }

    // Two 1 second waits between three attempts.
    assert!(start.elapsed() >= Duration::from_millis(1900));
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/anpr"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "message": "Missing image" })),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = AnprClient::builder()
        .endpoint(format!("{}/anpr", mock_server.uri()))
        .api_key("secret")
        .build()
        .unwrap();

    let err = client
        .search_async(&AnprRequest::new().services([Selector::Anpr]))
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 400);
    assert!(!err.is_retryable());
    assert_eq!(err.server_message().as_deref(), Some("Missing image"));
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = VehicleClient::builder()
        .endpoint(mock_server.uri())
        .api_key("wrong")
        .build()
        .unwrap();

    let err = client
        .search_async(&VehicleRequest::new().image(plate()))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);
}

#[tokio::test]
async fn test_rate_limited_then_success() {
    let mock_server = MockServer::start().await;

    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    Mock::given(method("POST"))
        .and(path("/vehicle"))
        .respond_with(move |_req: &wiremock::Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count == 0 {
                ResponseTemplate::new(429).set_body_string("Too Many Requests")
            } else {
                ResponseTemplate::new(200)
                    .insert_header(REQUEST_ID_HEADER, "retried-1")
                    .set_body_json(recognition_body())
            }
        })
        .mount(&mock_server)
        .await;

    let client = VehicleClient::builder()
        .endpoint(format!("{}/vehicle", mock_server.uri()))
        .api_key("secret")
        .retry_policy(fast_retry(3))
        .build()
        .unwrap();

    let response = client
        .send_async(&VehicleRequest::new().image(plate()))
        .await
        .unwrap();

    assert_eq!(response.attempts, 2);
    assert!(response.was_retried());
    assert_eq!(response.data.request_id.as_deref(), Some("retried-1"));
    assert_eq!(attempt_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_retry_policy_none_makes_one_attempt() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = VehicleClient::builder()
        .endpoint(mock_server.uri())
        .api_key("secret")
        .retry_policy(RetryPolicy::none())
        .build()
        .unwrap();

    let err = client
        .search_async(&VehicleRequest::new().image(plate()))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 500);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_invalid_json_is_a_decode_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("invalid json"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = TransportClient::builder()
        .endpoint(mock_server.uri())
        .api_key("secret")
        .build()
        .unwrap();

    let result = client
        .search_async(&TransportRequest::new().image(plate()))
        .await;

    match result {
        Err(err @ Error::DeserializationFailed { .. }) => {
            assert_eq!(err.raw_response(), Some("invalid json"));
            assert!(!err.is_retryable());
        }
        other => panic!("Expected DeserializationFailed error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_transport_sends_every_image() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/transport/container"))
        .and(header("X-Disable-Checksum-Check", "true"))
        .and(header("X-Disable-Iso-Code", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "version": "2.0",
            "data": { "codes": [] }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = TransportClient::builder()
        .endpoint(format!("{}/transport", mock_server.uri()))
        .api_key("secret")
        .disable_checksum_check(true)
        .build()
        .unwrap();

    let request = TransportRequest::new()
        .code_type("container")
        .image(InputImage::jpeg(vec![1, 2, 3], "front.jpg"))
        .image(InputImage::new(vec![4, 5, 6], "back.png", "png"));

    let result = client.search_async(&request).await.unwrap();
    assert_eq!(result.version.as_deref(), Some("2.0"));

    let requests = mock_server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert_eq!(body.matches("name=\"image\"").count(), 2);
    assert!(body.contains("filename=\"front.jpg\""));
    assert!(body.contains("filename=\"back.png\""));
    assert!(body.contains("image/png"));
    assert!(!body.contains("name=\"service\""));
}

#[tokio::test]
async fn test_vehicle_locations() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/vehicle/countries"))
        .and(header("x-api-key", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "code": "HUN", "name": "Hungary" },
            { "code": "USA", "name": "United States", "states": ["CA", "NY"] }
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = VehicleClient::builder()
        .endpoint(format!("{}/vehicle", mock_server.uri()))
        .api_key("secret")
        .build()
        .unwrap();

    let locations = client.locations_async().await.unwrap();
    assert_eq!(locations.len(), 2);
    assert_eq!(
        locations.find("hun").and_then(|l| l.name.as_deref()),
        Some("Hungary")
    );
    assert!(locations.find("USA").unwrap().extra.contains_key("states"));
}

#[tokio::test]
async fn test_retry_context_reaches_every_decision() {
    init_tracing();
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();

    let predicate = predicate_fn(move |error, attempt, context| {
        seen_clone
            .lock()
            .unwrap()
            .push((attempt, context.and_then(|c| c.get("job")).map(str::to_owned)));
        RetryOnRetryable.should_retry(error, attempt)
    });

    let client = VehicleClient::builder()
        .endpoint(mock_server.uri())
        .api_key("secret")
        .retry_policy(fast_retry(2).with_predicate(predicate))
        .build()
        .unwrap();

    let context = RetryContext::new().with("job", "42");
    let result = client
        .search_async_with_context(&VehicleRequest::new().image(plate()), &context)
        .await;
    assert!(result.is_err());

    let seen = seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![
            (1, Some("42".to_string())),
            (2, Some("42".to_string())),
            (3, Some("42".to_string())),
        ]
    );
}

#[tokio::test]
async fn test_invalid_request_is_never_sent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(recognition_body()))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = VehicleClient::builder()
        .endpoint(mock_server.uri())
        .api_key("secret")
        .build()
        .unwrap();

    let request = VehicleRequest::new().image(InputImage::jpeg(Vec::new(), "empty.jpg"));
    let err = client.search_async(&request).await.unwrap_err();

    assert!(matches!(err, Error::InvalidRequest(_)));
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn test_response_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(recognition_body())
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&mock_server)
        .await;

    let client = AnprClient::builder()
        .endpoint(mock_server.uri())
        .api_key("secret")
        .response_timeout_ms(50)
        .retry_policy(RetryPolicy::none())
        .build()
        .unwrap();

    let err = client
        .search_async(&AnprRequest::new().image(plate()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Timeout));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_connection_refused_is_a_network_error() {
    init_tracing();
    // Grab a free port, then close it so nothing is listening.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_clone = attempts.clone();

    let client = VehicleClient::builder()
        .endpoint(format!("http://127.0.0.1:{}", port))
        .api_key("secret")
        .retry_policy(fast_retry(1).with_predicate(predicate_fn(
            move |error, attempt, _context| {
                attempts_clone.fetch_add(1, Ordering::SeqCst);
                RetryOnRetryable.should_retry(error, attempt)
            },
        )))
        .build()
        .unwrap();

    let err = client
        .search_async(&VehicleRequest::new().image(plate()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Network(_)));
    assert!(err.is_retryable());
    assert_eq!(err.status_code(), 500);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn test_blocking_search_outside_runtime() {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let mock_server = runtime.block_on(async {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/anpr/hu"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(REQUEST_ID_HEADER, "blocking-1")
                    .set_body_json(recognition_body()),
            )
            .expect(2)
            .mount(&mock_server)
            .await;
        mock_server
    });

    let client = AnprClient::builder()
        .endpoint(format!("{}/anpr", mock_server.uri()))
        .api_key("secret")
        .build()
        .unwrap();

    let request = AnprRequest::new()
        .services([Selector::Anpr])
        .region("hu")
        .image(plate());

    let result = client.search(&request).unwrap();
    assert_eq!(result.request_id.as_deref(), Some("blocking-1"));

    // Later blocking calls reuse the same runtime and connection pool.
    let context = RetryContext::new().with("caller", "batch");
    let result = client
        .search_with_context(&request, &context)
        .unwrap();
    assert_eq!(result.request_id.as_deref(), Some("blocking-1"));

    runtime.block_on(async {
        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_search_inside_spawn_blocking() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/anpr"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(REQUEST_ID_HEADER, "from-blocking-pool")
                .set_body_json(json!({})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = AnprClient::builder()
        .endpoint(format!("{}/anpr", mock_server.uri()))
        .api_key("secret")
        .build()
        .unwrap();

    let result = tokio::task::spawn_blocking(move || {
        client.search(&AnprRequest::new().image(plate()))
    })
    .await
    .unwrap();

    let result = result.unwrap();
    assert_eq!(result.request_id.as_deref(), Some("from-blocking-pool"));
}

#[tokio::test]
async fn test_dropped_call_stops_retrying() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    // Default policy: the first retry waits 1 second.
    let client = AnprClient::builder()
        .endpoint(mock_server.uri())
        .api_key("secret")
        .build()
        .unwrap();

    let request = AnprRequest::new().image(plate());
    let outcome =
        tokio::time::timeout(Duration::from_millis(300), client.search_async(&request)).await;
    assert!(outcome.is_err(), "call should still be waiting to retry");

    tokio::time::sleep(Duration::from_millis(2500)).await;

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
}

#[tokio::test]
async fn test_unreadable_error_body_keeps_status() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        // Consume the upload up to the closing multipart boundary.
        let mut received = Vec::new();
        let mut buf = [0u8; 4096];
        while !received.ends_with(b"--\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }

        // Promise more body than is sent, then hang up.
        socket
            .write_all(b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 100\r\n\r\npartial")
            .await
            .unwrap();
        socket.shutdown().await.unwrap();
    });

    let client = AnprClient::builder()
        .endpoint(format!("http://{}", addr))
        .api_key("secret")
        .retry_policy(RetryPolicy::none())
        .build()
        .unwrap();

    let err = client
        .search_async(&AnprRequest::new().image(plate()))
        .await
        .unwrap_err();

    match err {
        Error::Api {
            status,
            raw_response,
            ..
        } => {
            assert_eq!(status.as_u16(), 503);
            assert_eq!(raw_response, "");
        }
        other => panic!("Expected Api error, got {:?}", other),
    }
}
