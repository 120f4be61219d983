use nimbus_core::config::ExecutionConfig;
use nimbus_core::{AccountRef, DocumentCatalog, OperationRequest, OperationType, Parameters};
use nimbus_runtime::{
    CancellationToken, ErrorClass, ExecutionContext, ExecutionStatus, MockTransport, Orchestrator,
    Page, ProviderError, RetryPolicy, StopReason,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn orchestrator(mock: &MockTransport, config: ExecutionConfig) -> Orchestrator {
    Orchestrator::new(
        Arc::new(mock.clone()),
        Arc::new(DocumentCatalog::builtin().unwrap()),
        config,
    )
}

fn request(service: &str, operation: &str, region: &str) -> OperationRequest {
    OperationRequest::new(
        service,
        operation,
        Parameters::new(),
        region,
        AccountRef::new("123456789012"),
    )
    .unwrap()
}

fn describe_instances() -> OperationRequest {
    request("ec2", "describe_instances", "us-east-1")
}

fn reservations(ids: &[&str], next: Option<&str>) -> Page {
    let data = json!({
        "Reservations": ids.iter().map(|id| json!({"Instances": [{"InstanceId": id}]})).collect::<Vec<_>>()
    });
    Page {
        data,
        next_cursor: next.map(str::to_string),
    }
}

fn read_ctx() -> ExecutionContext {
    ExecutionContext::new(OperationType::Read)
}

#[tokio::test]
async fn three_pages_are_merged_in_order() {
    let mock = MockTransport::new();
    mock.push_page("ec2", "describe_instances", reservations(&["i-1", "i-2"], Some("t1")));
    mock.push_page("ec2", "describe_instances", reservations(&["i-3"], Some("t2")));
    mock.push_page("ec2", "describe_instances", reservations(&["i-4"], None));

    let outcome = orchestrator(&mock, ExecutionConfig::default())
        .execute(&describe_instances(), &read_ctx())
        .await;

    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(outcome.pages.len(), 3);
    assert_eq!(outcome.item_count, 4);
    assert!(outcome.next_cursor.is_none());

    let ids: Vec<Value> = outcome
        .items()
        .iter()
        .map(|r| r["Instances"][0]["InstanceId"].clone())
        .collect();
    assert_eq!(ids, vec![json!("i-1"), json!("i-2"), json!("i-3"), json!("i-4")]);

    let calls = mock.calls();
    let cursors: Vec<Option<String>> = calls.iter().map(|c| c.cursor.clone()).collect();
    assert_eq!(cursors, vec![None, Some("t1".into()), Some("t2".into())]);
    assert_eq!(calls[1].parameters.get("NextToken"), Some(&json!("t1")));
    assert!(calls[0].parameters.get("NextToken").is_none());
}

#[tokio::test]
async fn cursor_in_response_body_is_followed() {
    let mock = MockTransport::new();
    mock.push_page(
        "s3",
        "list_objects_v2",
        Page::last(json!({"Contents": [{"Key": "a"}], "NextContinuationToken": "c1"})),
    );
    mock.push_page("s3", "list_objects_v2", Page::last(json!({"Contents": [{"Key": "b"}]})));

    let mut req = request("s3", "list_objects_v2", "us-east-1");
    req = req.with_parameters([("Bucket".to_string(), json!("logs"))].into());
    let outcome = orchestrator(&mock, ExecutionConfig::default())
        .execute(&req, &read_ctx())
        .await;

    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(outcome.items().len(), 2);
    assert_eq!(
        mock.calls()[1].parameters.get("ContinuationToken"),
        Some(&json!("c1"))
    );
}

#[tokio::test]
async fn failure_on_second_page_keeps_the_first() {
    let mock = MockTransport::new();
    mock.push_page("ec2", "describe_instances", reservations(&["i-1"], Some("t1")));
    mock.push_error(
        "ec2",
        "describe_instances",
        ProviderError::new("UnauthorizedOperation", "not allowed").with_status(403),
    );

    let outcome = orchestrator(&mock, ExecutionConfig::default())
        .execute(&describe_instances(), &read_ctx())
        .await;

    assert_eq!(outcome.status, ExecutionStatus::Partial);
    assert_eq!(outcome.pages.len(), 1);
    assert_eq!(outcome.stop_reason, Some(StopReason::Error));
    assert_eq!(outcome.next_cursor.as_deref(), Some("t1"));

    let error = outcome.error.unwrap();
    assert_eq!(error.code, "UnauthorizedOperation");
    assert_eq!(error.page, 2);
    assert_eq!(error.attempts, 1);
    assert_eq!(error.class, Some(ErrorClass::PermanentClientError));
}

#[tokio::test]
async fn failure_on_first_page_is_failed() {
    let mock = MockTransport::new();
    mock.push_error(
        "ec2",
        "describe_instances",
        ProviderError::new("InternalError", "boom").with_status(500),
    );

    let outcome = orchestrator(&mock, ExecutionConfig::default())
        .execute(&describe_instances(), &read_ctx())
        .await;

    assert_eq!(outcome.status, ExecutionStatus::Failed);
    assert!(outcome.pages.is_empty());
    assert_eq!(
        outcome.error.unwrap().class,
        Some(ErrorClass::PermanentServerError)
    );
    // Server errors are surfaced, never retried.
    assert_eq!(mock.call_count("ec2", "describe_instances"), 1);
}

#[tokio::test(start_paused = true)]
async fn throttling_is_retried_with_growing_backoff_then_fails() {
    let mock = MockTransport::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        mock.on("ec2", "describe_instances", move |_, _| {
            seen.lock().unwrap().push(tokio::time::Instant::now());
            Err(ProviderError::new("ThrottlingException", "Rate exceeded").with_status(400))
        });
    }

    let config = ExecutionConfig {
        max_attempts: 4,
        base_delay_ms: 100,
        max_delay_ms: 10_000,
        ..ExecutionConfig::default()
    };
    let orchestrator = orchestrator(&mock, config.clone())
        .with_retry_policy(RetryPolicy::from_config(&config).without_jitter());
    let outcome = orchestrator.execute(&describe_instances(), &read_ctx()).await;

    assert_eq!(outcome.status, ExecutionStatus::Failed);
    let error = outcome.error.unwrap();
    assert_eq!(error.class, Some(ErrorClass::Throttled));
    assert_eq!(error.attempts, 4);
    assert_eq!(mock.call_count("ec2", "describe_instances"), 4);

    let seen = seen.lock().unwrap();
    let gaps: Vec<Duration> = seen.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(gaps.len(), 3);
    assert!(gaps[0] >= Duration::from_millis(100));
    assert!(gaps.windows(2).all(|w| w[1] > w[0]), "gaps: {:?}", gaps);
}

#[tokio::test(start_paused = true)]
async fn throttling_then_success() {
    let mock = MockTransport::new();
    for _ in 0..2 {
        mock.push_error(
            "ec2",
            "describe_instances",
            ProviderError::new("RequestLimitExceeded", "slow down"),
        );
    }
    mock.push_page("ec2", "describe_instances", reservations(&["i-1"], None));

    let outcome = orchestrator(&mock, ExecutionConfig::default())
        .execute(&describe_instances(), &read_ctx())
        .await;

    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(mock.call_count("ec2", "describe_instances"), 3);
}

#[tokio::test(start_paused = true)]
async fn network_errors_are_retried_for_writes() {
    let mock = MockTransport::new();
    mock.push_error("sqs", "send_message", ProviderError::network("connection reset"));
    mock.push_page("sqs", "send_message", Page::last(json!({"MessageId": "m-1"})));

    let req = request("sqs", "send_message", "us-east-1");
    let outcome = orchestrator(&mock, ExecutionConfig::default())
        .execute(&req, &ExecutionContext::new(OperationType::Write))
        .await;

    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(mock.call_count("sqs", "send_message"), 2);
}

#[tokio::test(start_paused = true)]
async fn idempotency_gate_stops_network_retries_for_plain_writes() {
    let mock = MockTransport::new();
    mock.push_error("sqs", "send_message", ProviderError::network("connection reset"));

    let req = request("sqs", "send_message", "us-east-1");
    let config = ExecutionConfig {
        idempotent_network_retries_only: true,
        ..ExecutionConfig::default()
    };
    let orchestrator = orchestrator(&mock, config);

    let outcome = orchestrator
        .execute(&req, &ExecutionContext::new(OperationType::Write))
        .await;
    assert_eq!(outcome.status, ExecutionStatus::Failed);
    assert_eq!(outcome.error.unwrap().class, Some(ErrorClass::TransientNetwork));
    assert_eq!(mock.call_count("sqs", "send_message"), 1);

    mock.push_error("sqs", "send_message", ProviderError::network("connection reset"));
    mock.push_page("sqs", "send_message", Page::last(json!({"MessageId": "m-2"})));
    let outcome = orchestrator
        .execute(&req, &ExecutionContext::new(OperationType::Write).idempotent(true))
        .await;
    assert_eq!(outcome.status, ExecutionStatus::Success);
}

#[tokio::test]
async fn page_cap_returns_partial_with_cursor() {
    let mock = MockTransport::new();
    mock.on("ec2", "describe_instances", |_, cursor| {
        let n: u32 = cursor
            .and_then(|c| c.strip_prefix('t'))
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        Ok(reservations(&["i-x"], Some(&format!("t{}", n + 1))))
    });

    let config = ExecutionConfig {
        max_pages: 2,
        ..ExecutionConfig::default()
    };
    let outcome = orchestrator(&mock, config)
        .execute(&describe_instances(), &read_ctx())
        .await;

    assert_eq!(outcome.status, ExecutionStatus::Partial);
    assert_eq!(outcome.stop_reason, Some(StopReason::PageLimit));
    assert_eq!(outcome.pages.len(), 2);
    assert_eq!(outcome.next_cursor.as_deref(), Some("t2"));
    assert!(outcome.error.is_none());
}

#[tokio::test]
async fn item_cap_returns_partial_and_resume_continues() {
    let mock = MockTransport::new();
    mock.push_page("ec2", "describe_instances", reservations(&["i-1", "i-2", "i-3"], Some("t1")));
    mock.push_page("ec2", "describe_instances", reservations(&["i-4"], None));

    let config = ExecutionConfig {
        max_items: 3,
        ..ExecutionConfig::default()
    };
    let orchestrator = orchestrator(&mock, config);
    let first = orchestrator.execute(&describe_instances(), &read_ctx()).await;
    assert_eq!(first.status, ExecutionStatus::Partial);
    assert_eq!(first.stop_reason, Some(StopReason::ItemLimit));

    let resumed = orchestrator
        .execute(&describe_instances(), &read_ctx().resume_from(first.next_cursor))
        .await;
    assert_eq!(resumed.status, ExecutionStatus::Success);
    assert_eq!(resumed.item_count, 1);
    assert_eq!(mock.calls()[1].cursor.as_deref(), Some("t1"));
}

#[tokio::test]
async fn cancellation_keeps_fetched_pages() {
    let mock = MockTransport::new();
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        mock.on("ec2", "describe_instances", move |_, cursor| {
            // Abort while the first page is in flight.
            if cursor.is_none() {
                cancel.cancel();
            }
            Ok(reservations(&["i-1"], Some("t1")))
        });
    }

    let outcome = orchestrator(&mock, ExecutionConfig::default())
        .execute(&describe_instances(), &read_ctx().with_cancel(cancel))
        .await;

    assert_eq!(outcome.status, ExecutionStatus::Partial);
    assert_eq!(outcome.stop_reason, Some(StopReason::Cancelled));
    assert_eq!(outcome.pages.len(), 1);
    assert!(outcome.error.unwrap().is_cancelled());
}

#[tokio::test]
async fn mutations_do_not_follow_cursors() {
    let mock = MockTransport::new();
    mock.push_page(
        "ec2",
        "create_tags",
        Page::more(json!({"Return": true}), "unexpected"),
    );

    let outcome = orchestrator(&mock, ExecutionConfig::default())
        .execute(
            &request("ec2", "create_tags", "us-east-1"),
            &ExecutionContext::new(OperationType::Write),
        )
        .await;

    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(mock.call_count("ec2", "create_tags"), 1);
}

#[tokio::test]
async fn discovery_results_are_resequenced() {
    let mock = MockTransport::new();
    mock.on("ec2", "describe_instances", |req, _| {
        Ok(reservations(&[req.region()], None))
    });
    mock.on("s3", "list_buckets", |_, _| Ok(Page::last(json!({"Buckets": []}))));

    let requests = vec![
        request("s3", "list_buckets", "us-east-1"),
        request("ec2", "describe_instances", "us-west-2"),
        request("ec2", "describe_instances", "eu-west-1"),
    ];
    let results = orchestrator(&mock, ExecutionConfig::default())
        .discover(&requests, &read_ctx())
        .await;

    let order: Vec<(String, String)> = results
        .iter()
        .map(|r| (r.service.clone(), r.region.clone()))
        .collect();
    assert_eq!(
        order,
        vec![
            ("ec2".to_string(), "eu-west-1".to_string()),
            ("ec2".to_string(), "us-west-2".to_string()),
            ("s3".to_string(), "us-east-1".to_string()),
        ]
    );
    assert!(results.iter().all(|r| r.outcome.is_success()));
}
