use nimbus_core::config::SafetyConfig;
use nimbus_core::{OperationType, SafetyMode};
use nimbus_policy::{Outcome, decide, engine_from_config};

const MODES: [SafetyMode; 3] = [
    SafetyMode::ReadOnly,
    SafetyMode::Standard,
    SafetyMode::Unrestricted,
];

#[test]
fn every_denylisted_operation_is_denied_in_every_mode() {
    let engine = engine_from_config(&SafetyConfig::default()).unwrap();
    let entries: Vec<String> = engine
        .denylist()
        .entries()
        .into_iter()
        .map(str::to_string)
        .collect();
    assert!(entries.len() > 50);

    for entry in entries {
        let (service, operation) = entry.split_once('.').unwrap();
        for mode in MODES {
            for token in [false, true] {
                let evaluation = engine.evaluate(service, operation, mode, token);
                assert_eq!(
                    evaluation.decision.outcome,
                    Outcome::Deny,
                    "{} in {} (token: {})",
                    entry,
                    mode,
                    token
                );
            }
        }
    }
}

#[test]
fn read_only_mode_only_runs_reads() {
    let engine = engine_from_config(&SafetyConfig::default()).unwrap();
    let cases = [
        ("ec2", "describe_instances", Outcome::Allow),
        ("s3", "list_buckets", Outcome::Allow),
        ("ec2", "create_tags", Outcome::Deny),
        ("ec2", "terminate_instances", Outcome::Deny),
        ("lambda", "invoke", Outcome::Deny),
    ];
    for (service, operation, expected) in cases {
        let evaluation = engine.evaluate(service, operation, SafetyMode::ReadOnly, false);
        assert_eq!(evaluation.decision.outcome, expected, "{}.{}", service, operation);
    }
}

#[test]
fn configured_tables_extend_the_builtin_ones() {
    let safety = SafetyConfig {
        extra_denied: vec!["ec2.delete_vpc".to_string()],
        classification_overrides: [("lambda.invoke".to_string(), OperationType::Read)].into(),
        ..Default::default()
    };
    let engine = engine_from_config(&safety).unwrap();

    let delete_vpc = engine.evaluate("ec2", "delete_vpc", SafetyMode::Unrestricted, false);
    assert_eq!(delete_vpc.decision.outcome, Outcome::Deny);

    let invoke = engine.evaluate("lambda", "invoke", SafetyMode::ReadOnly, false);
    assert_eq!(invoke.operation_type, OperationType::Read);
    assert_eq!(invoke.decision.outcome, Outcome::Allow);
}

#[test]
fn decide_is_total_and_deterministic() {
    for mode in MODES {
        for op_type in [OperationType::Read, OperationType::Write, OperationType::Destructive] {
            for denied in [false, true] {
                for token in [false, true] {
                    assert_eq!(
                        decide(mode, op_type, denied, token),
                        decide(mode, op_type, denied, token)
                    );
                }
            }
        }
    }
}
