//! Transport tests: dialling, liveness probing, fixed16 exchange.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::harness::{config_for, MockLivestatus, MockResponse};
use crate::connection;
use crate::error::LivestatusError;
use crate::protocol::encode_fixed16_header;
use crate::{LivestatusQuery, OutputFormat};

fn probe_query() -> LivestatusQuery {
    let mut query = LivestatusQuery::new("hosts", ["name"]);
    query.output_format(OutputFormat::Json);
    query
}

#[tokio::test]
async fn exec_roundtrip_forces_framing_headers() {
    let mock = MockLivestatus::unix().await;
    mock.queue_response(MockResponse::Fixed16 {
        code: 200,
        body: b"[[\"web01\",0]]".to_vec(),
    });
    let config = config_for(&mock);

    let mut transport = connection::connect(&config).await.unwrap();
    let token = CancellationToken::new();
    let result = transport
        .exec(&config, &token, &probe_query())
        .await
        .unwrap();

    assert_eq!(result.status_code, 200);
    assert!(result.error.is_none());
    assert_eq!(result.data, b"[[\"web01\",0]]");

    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert!(request.starts_with("GET hosts\n"));
    assert!(request.contains("Columns: name"));
    // The persistent path forces its framing headers no matter what the
    // caller set.
    assert!(request.contains("ResponseHeader: fixed16"));
    assert!(request.contains("KeepAlive: on"));
    assert!(request.ends_with("\n\n"));
    mock.shutdown();
}

#[tokio::test]
async fn exec_works_over_tcp() {
    let mock = MockLivestatus::tcp().await;
    mock.queue_response(MockResponse::Fixed16 {
        code: 200,
        body: b"tcp-body".to_vec(),
    });
    let config = config_for(&mock);

    let mut transport = connection::connect(&config).await.unwrap();
    let token = CancellationToken::new();
    let result = transport
        .exec(&config, &token, &probe_query())
        .await
        .unwrap();

    assert_eq!(result.status_code, 200);
    assert_eq!(result.data, b"tcp-body");
    mock.shutdown();
}

#[tokio::test]
async fn exec_non_200_carries_body_text() {
    let mock = MockLivestatus::unix().await;
    mock.queue_response(MockResponse::Fixed16 {
        code: 404,
        body: b"Table 'nope' does not exist.\n".to_vec(),
    });
    let config = config_for(&mock);

    let mut transport = connection::connect(&config).await.unwrap();
    let token = CancellationToken::new();
    let result = transport
        .exec(&config, &token, &probe_query())
        .await
        .unwrap();

    assert_eq!(result.status_code, 404);
    assert!(result.data.is_empty());
    let error = result.error.expect("non-200 must carry an error");
    assert!(error.to_string().contains("Table 'nope' does not exist."));
    mock.shutdown();
}

#[tokio::test]
async fn exec_non_200_empty_body_gets_default_message() {
    let mock = MockLivestatus::unix().await;
    mock.queue_response(MockResponse::Fixed16 {
        code: 500,
        body: Vec::new(),
    });
    let config = config_for(&mock);

    let mut transport = connection::connect(&config).await.unwrap();
    let token = CancellationToken::new();
    let result = transport
        .exec(&config, &token, &probe_query())
        .await
        .unwrap();

    assert_eq!(result.status_code, 500);
    assert!(result.error.unwrap().to_string().contains("livestatus error"));
    mock.shutdown();
}

#[tokio::test]
async fn exec_oversize_drains_and_keeps_connection_reusable() {
    let mock = MockLivestatus::unix().await;
    mock.queue_response(MockResponse::Fixed16 {
        code: 200,
        body: vec![b'x'; 64],
    });
    mock.queue_response(MockResponse::Fixed16 {
        code: 200,
        body: b"small".to_vec(),
    });
    let mut config = config_for(&mock);
    config.max_body_bytes = 16;

    let mut transport = connection::connect(&config).await.unwrap();
    let token = CancellationToken::new();

    let error = transport
        .exec(&config, &token, &probe_query())
        .await
        .expect_err("oversize body must error");
    match error {
        LivestatusError::Oversize { length, cap } => {
            assert_eq!(length, 64);
            assert_eq!(cap, 16);
        }
        other => panic!("expected Oversize, got {other}"),
    }

    // The oversize body was drained, so the same connection serves the next
    // request.
    let result = transport
        .exec(&config, &token, &probe_query())
        .await
        .unwrap();
    assert_eq!(result.data, b"small");
    assert_eq!(mock.accept_count(), 1);
    mock.shutdown();
}

#[tokio::test]
async fn ensure_reuses_idle_connection() {
    let mock = MockLivestatus::unix().await;
    mock.queue_response(MockResponse::Fixed16 {
        code: 200,
        body: b"one".to_vec(),
    });
    let config = config_for(&mock);

    let mut transport = connection::connect(&config).await.unwrap();
    let token = CancellationToken::new();
    transport
        .exec(&config, &token, &probe_query())
        .await
        .unwrap();

    let transport = connection::ensure(&config, Some(transport)).await.unwrap();
    drop(transport);
    assert_eq!(mock.accept_count(), 1, "idle connection must be reused");
    mock.shutdown();
}

#[tokio::test]
async fn ensure_redials_when_peer_closed() {
    let mock = MockLivestatus::unix().await;
    // Valid response, then the server hangs up.
    let mut wire = encode_fixed16_header(200, 4).to_vec();
    wire.extend_from_slice(b"gone");
    mock.queue_response(MockResponse::RawThenClose(wire));
    let config = config_for(&mock);

    let mut transport = connection::connect(&config).await.unwrap();
    let token = CancellationToken::new();
    let result = transport
        .exec(&config, &token, &probe_query())
        .await
        .unwrap();
    assert_eq!(result.data, b"gone");

    // Give the FIN time to arrive, then the probe must declare death and
    // ensure must dial anew.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let _fresh = connection::ensure(&config, Some(transport)).await.unwrap();
    assert_eq!(mock.accept_count(), 2);
    mock.shutdown();
}

#[tokio::test]
async fn probe_preserves_unread_bytes() {
    let mock = MockLivestatus::unix().await;
    mock.set_respond_early(true);
    mock.queue_response(MockResponse::Fixed16 {
        code: 200,
        body: b"early".to_vec(),
    });
    let config = config_for(&mock);

    let transport = connection::connect(&config).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Data is waiting: the probe consumes one byte and must stash it.
    let mut transport = connection::ensure(&config, Some(transport)).await.unwrap();
    assert_eq!(transport.readahead_len(), 1);
    assert_eq!(mock.accept_count(), 1);

    let token = CancellationToken::new();
    let result = transport
        .exec(&config, &token, &probe_query())
        .await
        .unwrap();
    assert_eq!(result.status_code, 200);
    assert_eq!(result.data, b"early");
    mock.shutdown();
}

#[tokio::test]
async fn exec_survives_short_reads() {
    let mock = MockLivestatus::unix().await;
    mock.queue_response(MockResponse::Fixed16Chunked {
        code: 200,
        body: b"dribbled out three bytes at a time".to_vec(),
        chunk: 3,
        delay: Duration::from_millis(2),
    });
    let config = config_for(&mock);

    let mut transport = connection::connect(&config).await.unwrap();
    let token = CancellationToken::new();
    let result = transport
        .exec(&config, &token, &probe_query())
        .await
        .unwrap();
    assert_eq!(result.data, b"dribbled out three bytes at a time");
    mock.shutdown();
}

#[tokio::test]
async fn cancellation_interrupts_pending_read() {
    let mock = MockLivestatus::unix().await;
    mock.queue_response(MockResponse::NeverRespond);
    let config = config_for(&mock); // read bound stays at 2s

    let mut transport = connection::connect(&config).await.unwrap();
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let started = std::time::Instant::now();
    let error = transport
        .exec(&config, &token, &probe_query())
        .await
        .expect_err("cancelled exec must abort");
    assert!(matches!(error, LivestatusError::Cancelled), "got {error}");
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "cancellation must interrupt the read ahead of its deadline"
    );
    mock.shutdown();
}

#[tokio::test]
async fn exec_times_out_on_silent_server() {
    let mock = MockLivestatus::unix().await;
    mock.queue_response(MockResponse::NeverRespond);
    let mut config = config_for(&mock);
    config.read_timeout = Duration::from_millis(150);

    let mut transport = connection::connect(&config).await.unwrap();
    let token = CancellationToken::new();
    let error = transport
        .exec(&config, &token, &probe_query())
        .await
        .expect_err("silent server must time out");
    assert!(
        matches!(error, LivestatusError::Timeout { phase: "read", .. }),
        "got {error}"
    );
    mock.shutdown();
}

#[tokio::test]
async fn connect_reports_unreachable_endpoint() {
    let temp = tempfile::TempDir::new().unwrap();
    let mut config = crate::LivestatusConfig::new(
        temp.path().join("missing.sock").to_string_lossy().into_owned(),
    );
    config.connect_timeout = Duration::from_millis(200);

    let error = connection::connect(&config)
        .await
        .expect_err("missing socket must fail");
    assert!(matches!(error, LivestatusError::Connect(_)), "got {error}");
}
