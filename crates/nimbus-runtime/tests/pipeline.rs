use nimbus_core::config::ExecutionConfig;
use nimbus_core::{AccountRef, DocumentCatalog, OperationRequest, Parameters, SafetyMode};
use nimbus_policy::{ConfirmationError, Outcome, Session, Validator, engine_from_config};
use nimbus_runtime::{
    AuditStatus, CancellationToken, ExecutionStatus, MemoryAuditSink, MockTransport, Orchestrator,
    Page, Pipeline, PipelineError, PipelineOutcome, ProviderError, RunOptions,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

const INSTANCE_A: &str = "i-0123456789abcdef0";
const INSTANCE_B: &str = "i-0fedcba9876543210";

fn pipeline(mock: &MockTransport) -> (Pipeline, Arc<MemoryAuditSink>) {
    let catalog = Arc::new(DocumentCatalog::builtin().unwrap());
    let policy = engine_from_config(&Default::default()).unwrap();
    let validator = Validator::new(catalog.clone(), 50);
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(mock.clone()),
        catalog,
        ExecutionConfig::default(),
    ));
    let audit = Arc::new(MemoryAuditSink::new());
    let pipeline = Pipeline::new(policy, validator, orchestrator).with_audit_sink(audit.clone());
    (pipeline, audit)
}

fn session(mode: SafetyMode) -> Session {
    Session::new(
        AccountRef::new("123456789012"),
        mode,
        Duration::from_secs(900),
        4,
    )
}

fn request(service: &str, operation: &str, params: Value) -> OperationRequest {
    let parameters: Parameters = serde_json::from_value(params).unwrap();
    OperationRequest::new(
        service,
        operation,
        parameters,
        "us-east-1",
        AccountRef::new("123456789012"),
    )
    .unwrap()
}

fn terminate(instance: Value) -> OperationRequest {
    request("ec2", "terminate_instances", json!({ "InstanceIds": instance }))
}

#[tokio::test]
async fn read_only_mode_denies_mutations_without_calling_out() {
    let mock = MockTransport::new();
    let (pipeline, audit) = pipeline(&mock);
    let session = session(SafetyMode::ReadOnly);

    let outcome = pipeline
        .run(&session, terminate(json!([INSTANCE_A])), RunOptions::default())
        .await;

    let PipelineOutcome::Denied { evaluation } = outcome else {
        panic!("expected a denial, got {:?}", outcome);
    };
    assert_eq!(evaluation.decision.suggested_mode, Some(SafetyMode::Standard));
    assert!(mock.calls().is_empty());
    assert_eq!(audit.statuses(), vec![AuditStatus::Denied]);
}

#[tokio::test]
async fn denylisted_operations_are_denied_even_unrestricted() {
    let mock = MockTransport::new();
    let (pipeline, _) = pipeline(&mock);
    let session = session(SafetyMode::Unrestricted);

    let outcome = pipeline
        .run(
            &session,
            request("cloudtrail", "stop_logging", json!({"Name": "main"})),
            RunOptions::confirmed("anything"),
        )
        .await;

    let evaluation = outcome.evaluation();
    assert_eq!(evaluation.decision.outcome, Outcome::Deny);
    assert!(evaluation.decision.reason.contains("permanently blocked"));
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn reads_run_in_read_only_mode() {
    let mock = MockTransport::new();
    mock.push_page("s3", "list_buckets", Page::last(json!({"Buckets": [{"Name": "logs"}]})));
    let (pipeline, audit) = pipeline(&mock);

    let outcome = pipeline
        .run(
            &session(SafetyMode::ReadOnly),
            request("s3", "ListBuckets", json!({})),
            RunOptions::default(),
        )
        .await;

    let execution = outcome.execution().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(audit.statuses(), vec![AuditStatus::Success]);
}

#[tokio::test]
async fn standard_mode_confirmation_round_trip() {
    let mock = MockTransport::new();
    mock.push_page(
        "ec2",
        "terminate_instances",
        Page::last(json!({"TerminatingInstances": [{"InstanceId": INSTANCE_A}]})),
    );
    let (pipeline, audit) = pipeline(&mock);
    let session = session(SafetyMode::Standard);

    let first = pipeline
        .run(&session, terminate(json!([INSTANCE_A])), RunOptions::default())
        .await;
    let PipelineOutcome::ConfirmationRequired {
        ref evaluation,
        ref token_error,
        ..
    } = first
    else {
        panic!("expected a confirmation request, got {:?}", first);
    };
    assert!(evaluation.high_risk);
    assert!(token_error.is_none());
    assert!(mock.calls().is_empty());
    let token = first.confirmation_token().unwrap().to_string();

    // A lone id normalizes to the same list the token was issued for.
    let second = pipeline
        .run(&session, terminate(json!(INSTANCE_A)), RunOptions::confirmed(&token))
        .await;
    let PipelineOutcome::Executed {
        evaluation,
        request,
        outcome,
        ..
    } = second
    else {
        panic!("expected execution, got {:?}", second);
    };
    assert_eq!(evaluation.decision.outcome, Outcome::Allow);
    assert_eq!(request.parameters()["InstanceIds"], json!([INSTANCE_A]));
    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(mock.call_count("ec2", "terminate_instances"), 1);
    assert_eq!(
        audit.statuses(),
        vec![AuditStatus::ConfirmationRequired, AuditStatus::Success]
    );

    // Tokens are single use.
    let replay = pipeline
        .run(&session, terminate(json!([INSTANCE_A])), RunOptions::confirmed(&token))
        .await;
    let PipelineOutcome::ConfirmationRequired { token_error, .. } = replay else {
        panic!("expected a fresh confirmation request, got {:?}", replay);
    };
    assert!(matches!(token_error, Some(ConfirmationError::AlreadyUsed { .. })));
    assert_eq!(mock.call_count("ec2", "terminate_instances"), 1);
}

#[tokio::test]
async fn token_for_a_different_request_is_rejected() {
    let mock = MockTransport::new();
    let (pipeline, _) = pipeline(&mock);
    let session = session(SafetyMode::Standard);

    let first = pipeline
        .run(&session, terminate(json!([INSTANCE_A])), RunOptions::default())
        .await;
    let token = first.confirmation_token().unwrap().to_string();

    let other = pipeline
        .run(&session, terminate(json!([INSTANCE_B])), RunOptions::confirmed(&token))
        .await;
    let PipelineOutcome::ConfirmationRequired {
        token_error,
        pending,
        ..
    } = other
    else {
        panic!("expected the token to be refused, got {:?}", other);
    };
    assert!(matches!(token_error, Some(ConfirmationError::Mismatch { .. })));
    assert_ne!(pending.token, token);
    assert!(mock.calls().is_empty());

    // The original token still confirms the request it was issued for.
    mock.push_page("ec2", "terminate_instances", Page::last(json!({})));
    let confirmed = pipeline
        .run(&session, terminate(json!([INSTANCE_A])), RunOptions::confirmed(&token))
        .await;
    assert!(matches!(confirmed, PipelineOutcome::Executed { .. }));
}

#[tokio::test]
async fn mode_change_does_not_leak_into_other_sessions() {
    let mock = MockTransport::new();
    mock.push_page("ec2", "terminate_instances", Page::last(json!({})));
    let (pipeline, _) = pipeline(&mock);
    let relaxed = session(SafetyMode::ReadOnly);
    let strict = session(SafetyMode::ReadOnly);

    relaxed.set_mode(SafetyMode::Unrestricted);
    let ran = pipeline
        .run(&relaxed, terminate(json!([INSTANCE_A])), RunOptions::default())
        .await;
    assert!(matches!(ran, PipelineOutcome::Executed { .. }));

    let denied = pipeline
        .run(&strict, terminate(json!([INSTANCE_A])), RunOptions::default())
        .await;
    assert!(matches!(denied, PipelineOutcome::Denied { .. }));
}

#[tokio::test]
async fn validation_lists_every_problem() {
    let mock = MockTransport::new();
    let (pipeline, audit) = pipeline(&mock);

    let outcome = pipeline
        .run(
            &session(SafetyMode::Unrestricted),
            request("ec2", "run_instances", json!({"MinCount": "many", "KeyName": 7})),
            RunOptions::default(),
        )
        .await;

    let PipelineOutcome::Rejected { validation, .. } = outcome else {
        panic!("expected a rejection, got {:?}", outcome);
    };
    assert!(validation.errors.len() >= 3);
    let fields: Vec<_> = validation
        .errors
        .iter()
        .filter_map(|e| e.field.clone())
        .collect();
    assert!(fields.contains(&"ImageId".to_string()));
    assert!(fields.contains(&"MaxCount".to_string()));
    assert!(fields.contains(&"MinCount".to_string()));
    assert!(mock.calls().is_empty());
    assert_eq!(audit.statuses(), vec![AuditStatus::Rejected]);
}

#[tokio::test]
async fn dry_run_uses_provider_flag_when_supported() {
    let mock = MockTransport::new();
    mock.push_error(
        "ec2",
        "terminate_instances",
        ProviderError::new("DryRunOperation", "Request would have succeeded").with_status(412),
    );
    let (pipeline, _) = pipeline(&mock);

    // Standard mode: a dry run skips confirmation.
    let outcome = pipeline
        .run(
            &session(SafetyMode::Standard),
            terminate(json!([INSTANCE_A])),
            RunOptions::dry_run(),
        )
        .await;

    let PipelineOutcome::DryRun {
        provider_checked,
        outcome: Some(execution),
        ..
    } = outcome
    else {
        panic!("expected a provider dry run, got {:?}", outcome);
    };
    assert!(provider_checked);
    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(mock.calls()[0].parameters.get("DryRun"), Some(&json!(true)));
}

#[tokio::test]
async fn dry_run_without_provider_support_is_a_local_preview() {
    let mock = MockTransport::new();
    let (pipeline, _) = pipeline(&mock);

    let outcome = pipeline
        .run(
            &session(SafetyMode::Standard),
            request("s3", "delete_bucket", json!({"Bucket": "old-logs"})),
            RunOptions::dry_run(),
        )
        .await;

    let PipelineOutcome::DryRun {
        provider_checked,
        outcome,
        request,
        ..
    } = outcome
    else {
        panic!("expected a preview, got {:?}", outcome);
    };
    assert!(!provider_checked);
    assert!(outcome.is_none());
    assert_eq!(request.qualified_name(), "s3.delete_bucket");
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn dry_run_still_respects_read_only() {
    let mock = MockTransport::new();
    let (pipeline, _) = pipeline(&mock);

    let outcome = pipeline
        .run(
            &session(SafetyMode::ReadOnly),
            terminate(json!([INSTANCE_A])),
            RunOptions::dry_run(),
        )
        .await;
    assert!(matches!(outcome, PipelineOutcome::Denied { .. }));
}

#[tokio::test]
async fn discovery_refuses_mutations() {
    let mock = MockTransport::new();
    let (pipeline, _) = pipeline(&mock);
    let session = session(SafetyMode::Unrestricted);

    let result = pipeline
        .discover(
            &session,
            vec![
                request("s3", "list_buckets", json!({})),
                terminate(json!([INSTANCE_A])),
            ],
            CancellationToken::new(),
        )
        .await;
    assert!(matches!(result, Err(PipelineError::NotReadOnly { .. })));
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn discovery_fans_out_reads() {
    let mock = MockTransport::new();
    mock.on("ec2", "describe_vpcs", |req, _| {
        Ok(Page::last(json!({"Vpcs": [{"VpcId": format!("vpc-{}", req.region())}]})))
    });
    let (pipeline, audit) = pipeline(&mock);
    let session = session(SafetyMode::ReadOnly);

    let requests = ["us-west-2", "eu-west-1"]
        .into_iter()
        .map(|region| {
            OperationRequest::new(
                "ec2",
                "describe_vpcs",
                Parameters::new(),
                region,
                AccountRef::new("123456789012"),
            )
            .unwrap()
        })
        .collect();
    let results = pipeline
        .discover(&session, requests, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].region, "eu-west-1");
    assert_eq!(results[1].region, "us-west-2");
    assert_eq!(audit.statuses(), vec![AuditStatus::Success, AuditStatus::Success]);
}

#[tokio::test]
async fn repeated_discovery_targets_are_audited_with_their_own_outcome() {
    let mock = MockTransport::new();
    mock.on("ec2", "describe_instances", |req, _| {
        if req.parameters().get("InstanceIds") == Some(&json!([INSTANCE_A])) {
            Err(ProviderError::new("UnauthorizedOperation", "not allowed").with_status(403))
        } else {
            Ok(Page::last(json!({"Reservations": []})))
        }
    });
    let (pipeline, audit) = pipeline(&mock);
    let session = session(SafetyMode::ReadOnly);

    let requests = vec![
        request("ec2", "describe_instances", json!({"InstanceIds": [INSTANCE_A]})),
        request("ec2", "describe_instances", json!({"InstanceIds": [INSTANCE_B]})),
    ];
    let results = pipeline
        .discover(&session, requests, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(results[0].outcome.status, ExecutionStatus::Failed);
    assert_eq!(results[1].outcome.status, ExecutionStatus::Success);
    let events = audit.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].status, AuditStatus::Failed);
    assert_eq!(events[1].status, AuditStatus::Success);
    assert_ne!(events[0].fingerprint, events[1].fingerprint);
}
