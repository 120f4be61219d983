//! `nimbus classify` - show classification and the policy decision offline.

use anyhow::{Context, Result};
use clap::Args;
use nimbus_core::SafetyMode;
use nimbus_policy::{PolicyEngine, PolicyEvaluation, engine_from_config, operation_key};
use std::path::Path;

/// Arguments for `nimbus classify`.
#[derive(Debug, Args)]
pub struct ClassifyArgs {
    /// Service name, e.g. ec2.
    pub service: String,

    /// Operation name, snake_case or PascalCase.
    pub operation: String,

    /// Safety mode to decide under. Defaults to the configured mode.
    #[arg(long)]
    pub mode: Option<String>,

    /// Print the evaluation as JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run(config_path: Option<&Path>, args: ClassifyArgs) -> Result<()> {
    let config = super::load_config(config_path)?;
    let engine = engine_from_config(&config.safety).context("Failed to load policy tables")?;

    let mode = match &args.mode {
        Some(mode) => mode.parse::<SafetyMode>()?,
        None => config.safety.default_mode,
    };

    let evaluation = engine.evaluate(&args.service, &args.operation, mode, false);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&evaluation)?);
    } else {
        print!("{}", render(&engine, &args.service, &args.operation, &evaluation));
    }
    Ok(())
}

fn render(
    engine: &PolicyEngine,
    service: &str,
    operation: &str,
    evaluation: &PolicyEvaluation,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n", operation_key(service, operation)));
    out.push_str(&format!(
        "  type:      {:?} ({})\n",
        evaluation.operation_type,
        evaluation.operation_type.description()
    ));
    out.push_str(&format!("  mode:      {}\n", evaluation.mode));
    out.push_str(&format!(
        "  decision:  {} - {}\n",
        evaluation.decision.outcome, evaluation.decision.reason
    ));
    if let Some(mode) = evaluation.decision.suggested_mode {
        out.push_str(&format!("  allowed in: {}\n", mode));
    }
    if engine.classifier().supports_dry_run(service, operation) {
        out.push_str("  dry run:   provider-side\n");
    }
    if evaluation.high_risk {
        out.push_str("  high risk: run an impact analysis first\n");
    }
    for warning in &evaluation.warnings {
        out.push_str(&format!("  warning:   {}\n", warning));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::config::SafetyConfig;

    #[test]
    fn test_render_read_only_denial() {
        let engine = engine_from_config(&SafetyConfig::default()).unwrap();
        let evaluation =
            engine.evaluate("ec2", "TerminateInstances", SafetyMode::ReadOnly, false);

        let text = render(&engine, "ec2", "TerminateInstances", &evaluation);

        assert!(text.starts_with("ec2.terminate_instances\n"));
        assert!(text.contains("Destructive"));
        assert!(text.contains("DENY"));
        assert!(text.contains("allowed in: standard"));
        assert!(text.contains("dry run:   provider-side"));
    }

    #[test]
    fn test_render_plain_read() {
        let engine = engine_from_config(&SafetyConfig::default()).unwrap();
        let evaluation = engine.evaluate("s3", "list_buckets", SafetyMode::ReadOnly, false);

        let text = render(&engine, "s3", "list_buckets", &evaluation);

        assert!(text.contains("ALLOW"));
        assert!(!text.contains("allowed in"));
    }
}
