//! Tests for the queue-host-service library module.

use super::*;
use std::io::Write;
use tokio_test::assert_ok;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn fast_config() -> ServiceConfig {
    ServiceConfig {
        host: HostRunOptions {
            batch_size: 8,
            min_poll_interval_ms: 5,
            max_poll_interval_ms: 20,
            delta_backoff_ms: 5,
            renewal_min_interval_ms: 10,
            ..Default::default()
        },
        handler: HandlerConfig {
            work_duration_ms: 10,
        },
    }
}

fn received(body: &str) -> ReceivedMessage {
    let now = queue_host::Timestamp::now();
    ReceivedMessage {
        message_id: queue_host::MessageId::new(),
        body: body.to_string().into(),
        attributes: HashMap::new(),
        group_id: None,
        receipt_handle: queue_host::ReceiptHandle::new("receipt".to_string(), now),
        dequeue_count: 1,
        first_delivered_at: now,
        delivered_at: now,
    }
}

#[test]
fn test_cli_parsing() {
    let cli = Cli::try_parse_from(["queue-host", "--mode", "job", "--seed", "messages.jsonl"]);
    assert!(cli.is_ok());

    let cli = cli.unwrap();
    assert_eq!(cli.mode, RunMode::Job);
    assert_eq!(cli.seed, Some(PathBuf::from("messages.jsonl")));
    assert!(!cli.json_logs);
}

#[test]
fn test_cli_defaults_to_listen_mode() {
    let cli = Cli::try_parse_from(["queue-host", "--json-logs"]).unwrap();
    assert_eq!(cli.mode, RunMode::Listen);
    assert!(cli.json_logs);
}

#[test]
fn test_cli_rejects_unknown_mode() {
    assert!(Cli::try_parse_from(["queue-host", "--mode", "daemon"]).is_err());
}

#[test]
fn test_config_defaults() {
    let config = ServiceConfig::default();
    assert_eq!(config.host, HostRunOptions::default());
    assert_eq!(config.handler.work_duration_ms, 250);
    assert!(config.validate().is_ok());
}

#[test]
fn test_load_configuration_from_explicit_file() {
    let file = write_config(
        r#"
host:
  batch_size: 4
  visibility_timeout_ms: 5000
  singleton:
    scope:
      source: body_path
      path: "order:id"
    lease_duration_ms: 10000
handler:
  work_duration_ms: 20
"#,
    );

    let config = load_configuration(Some(file.path())).unwrap();

    assert_eq!(config.host.batch_size, 4);
    assert_eq!(config.host.visibility_timeout_ms, 5_000);
    assert_eq!(config.host.max_dequeue_count, 5);
    assert_eq!(config.handler.work_duration_ms, 20);

    let singleton = config.host.singleton.unwrap();
    assert_eq!(
        singleton.scope,
        queue_host::ScopeExpression::BodyPath {
            path: "order:id".to_string()
        }
    );
    assert_eq!(singleton.lease_duration_ms, 10_000);
    assert_eq!(singleton.max_retries, 10);
}

#[test]
fn test_load_configuration_rejects_invalid_values() {
    let file = write_config("host:\n  batch_size: 0\n");

    let result = load_configuration(Some(file.path()));

    assert!(matches!(result, Err(ServiceError::Configuration(_))));
    assert_eq!(result.unwrap_err().exit_code(), 3);
}

#[test]
fn test_load_configuration_requires_explicit_file_to_exist() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.yaml");

    let result = load_configuration(Some(&missing));

    assert!(matches!(result, Err(ServiceError::Load(_))));
}

#[test]
fn test_parse_seed_messages() {
    let contents = r#"
{"body": {"order": {"id": "A-1"}}, "group_id": "tenant-1"}

{"body": "plain", "attributes": {"kind": "note"}}
"#;

    let messages = parse_seed_messages(Path::new("seed.jsonl"), contents).unwrap();

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].group_id.as_deref(), Some("tenant-1"));
    let body: serde_json::Value = serde_json::from_slice(&messages[0].body).unwrap();
    assert_eq!(body["order"]["id"], "A-1");
    assert_eq!(&messages[1].body[..], br#""plain""#);
    assert_eq!(messages[1].attributes.get("kind").map(String::as_str), Some("note"));
}

#[test]
fn test_parse_seed_messages_reports_line_number() {
    let contents = "{\"body\": 1}\nnot json\n";

    let result = parse_seed_messages(Path::new("seed.jsonl"), contents);

    match result {
        Err(ServiceError::Seed { line, .. }) => assert_eq!(line, 2),
        other => panic!("Expected seed error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_load_seed_messages_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, r#"{{"body": {{"n": 1}}}}"#).unwrap();
    writeln!(file, r#"{{"body": {{"n": 2}}}}"#).unwrap();

    let messages = load_seed_messages(file.path()).await.unwrap();

    assert_eq!(messages.len(), 2);
}

#[tokio::test]
async fn test_load_seed_messages_missing_file() {
    let result = load_seed_messages(Path::new("/nonexistent/seed.jsonl")).await;
    assert!(matches!(result, Err(ServiceError::Io(_))));
}

#[tokio::test]
async fn test_simulated_handler_succeeds() {
    let handler = SimulatedWorkHandler::new(Duration::from_millis(5));
    let result = handler
        .execute(&received(r#"{"order": 1}"#), CancellationToken::new())
        .await;
    assert_ok!(result);
}

#[tokio::test]
async fn test_simulated_handler_fails_marked_messages() {
    let handler = SimulatedWorkHandler::new(Duration::from_millis(5));
    let result = handler
        .execute(&received(r#"{"fail": true}"#), CancellationToken::new())
        .await;
    assert!(matches!(result, Err(ProcessingError::Handler(_))));
}

#[tokio::test]
async fn test_simulated_handler_honours_cancellation() {
    let handler = SimulatedWorkHandler::new(Duration::from_secs(30));
    let cancellation = CancellationToken::new();
    cancellation.cancel();

    let result = handler.execute(&received("{}"), cancellation).await;

    assert!(matches!(result, Err(ProcessingError::Cancelled)));
}

#[tokio::test]
async fn test_run_host_job_mode_settles_seeded_messages() {
    let seed = parse_seed_messages(
        Path::new("seed.jsonl"),
        "{\"body\": {\"n\": 1}}\n{\"body\": {\"n\": 2}}\n{\"body\": {\"fail\": true}}\n",
    )
    .unwrap();

    let summary = run_host(fast_config(), RunMode::Job, seed, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.batches, 1);
    assert_eq!(summary.fetched, 3);
    assert_eq!(summary.deleted, 2);
    assert_eq!(summary.requeued, 1);
}

#[tokio::test]
async fn test_run_host_listen_mode_stops_on_cancellation() {
    let seed = parse_seed_messages(
        Path::new("seed.jsonl"),
        "{\"body\": {\"n\": 1}}\n{\"body\": {\"n\": 2}}\n",
    )
    .unwrap();
    let cancellation = CancellationToken::new();
    let stopper = cancellation.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        stopper.cancel();
    });

    let summary = run_host(fast_config(), RunMode::Listen, seed, &cancellation)
        .await
        .unwrap();

    assert_eq!(summary.fetched, 2);
    assert_eq!(summary.deleted, 2);
}

#[test]
fn test_queue_errors_exit_with_host_failure_code() {
    let error = ServiceError::from(QueueError::ConnectionFailed {
        message: "store unreachable".to_string(),
    });

    assert!(matches!(error, ServiceError::Queue(_)));
    assert_eq!(error.exit_code(), 5);
}

#[tokio::test]
async fn test_signal_cancels_host() {
    let shutdown = CancellationToken::new();

    cancel_on_signal(async { Ok(()) }, shutdown.clone()).await;

    assert!(shutdown.is_cancelled());
}

#[tokio::test]
async fn test_failed_signal_listener_keeps_host_running() {
    let shutdown = CancellationToken::new();

    cancel_on_signal(
        async { Err(std::io::Error::new(std::io::ErrorKind::Other, "no signal support")) },
        shutdown.clone(),
    )
    .await;

    assert!(!shutdown.is_cancelled());
}
