//! `nimbus check-config` command implementation.
//!
//! Loads everything the server would load at start and reports problems:
//! - configuration file and environment overrides
//! - classifier and denylist tables
//! - operation catalog
//! - relationship rules (read-only, known operations)

use anyhow::Result;
use nimbus_core::catalog::OperationCatalog;
use nimbus_core::config::Transport;
use nimbus_core::{NimbusConfig, SafetyMode};
use nimbus_graph::RuleSet;
use nimbus_policy::{PolicyEngine, engine_from_config};
use std::path::Path;
use std::sync::Arc;

/// Severity level for check results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// A single check finding.
#[derive(Debug, Clone)]
pub struct CheckFinding {
    pub severity: Severity,
    /// Check that produced the finding.
    pub category: String,
    pub message: String,
}

impl CheckFinding {
    fn error(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, category, message)
    }

    fn warning(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, category, message)
    }

    fn info(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, category, message)
    }

    fn new(severity: Severity, category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            category: category.into(),
            message: message.into(),
        }
    }
}

/// Results from running all checks.
#[derive(Debug, Default)]
pub struct CheckResults {
    pub findings: Vec<CheckFinding>,
}

impl CheckResults {
    fn add(&mut self, finding: CheckFinding) {
        self.findings.push(finding);
    }

    fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    /// Print findings, most severe first.
    pub fn print_summary(&self) {
        let mut findings: Vec<_> = self.findings.iter().collect();
        findings.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.category.cmp(&b.category)));

        for finding in findings {
            let icon = match finding.severity {
                Severity::Error => "✗",
                Severity::Warning => "⚠",
                Severity::Info => "ℹ",
            };
            println!("  {} [{}] {}", icon, finding.category, finding.message);
        }

        println!();
        if self.error_count() == 0 && self.warning_count() == 0 {
            println!("All checks passed.");
        } else {
            println!(
                "Summary: {} error(s), {} warning(s)",
                self.error_count(),
                self.warning_count()
            );
        }
    }
}

/// Run every check without printing.
pub fn collect(config_path: Option<&Path>) -> CheckResults {
    let mut results = CheckResults::default();

    let config = match super::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            results.add(CheckFinding::error("config", format!("{:#}", e)));
            return results;
        }
    };
    check_settings(&config, &mut results);

    let engine = match engine_from_config(&config.safety) {
        Ok(engine) => {
            results.add(CheckFinding::info(
                "policy",
                format!("{} denylisted operations", engine.denylist().len()),
            ));
            Some(engine)
        }
        Err(e) => {
            results.add(CheckFinding::error("policy", e.to_string()));
            None
        }
    };

    let catalog = match nimbus_core::catalog::from_config(&config.catalog) {
        Ok(catalog) => {
            check_catalog(catalog.as_ref(), &mut results);
            Some(catalog)
        }
        Err(e) => {
            results.add(CheckFinding::error("catalog", e.to_string()));
            None
        }
    };

    match RuleSet::from_config(&config.graph) {
        Ok(rules) => check_rules(&rules, engine.as_ref(), catalog, &mut results),
        Err(e) => results.add(CheckFinding::error("rules", e.to_string())),
    }

    results
}

fn check_settings(config: &NimbusConfig, results: &mut CheckResults) {
    if config.safety.default_mode == SafetyMode::Unrestricted {
        results.add(CheckFinding::warning(
            "safety",
            "default mode is unrestricted; mutations run without confirmation",
        ));
    }
    if !config.audit.enabled {
        results.add(CheckFinding::warning("audit", "audit events are disabled"));
    }
    if config.mcp.transport == Transport::Http && config.mcp.host == "0.0.0.0" {
        results.add(CheckFinding::warning(
            "mcp",
            format!("HTTP transport listens on all interfaces ({})", config.mcp.bind_address()),
        ));
    }
}

fn check_catalog(catalog: &dyn OperationCatalog, results: &mut CheckResults) {
    match catalog.list_services() {
        Ok(services) if services.is_empty() => {
            results.add(CheckFinding::warning("catalog", "catalog has no services"));
        }
        Ok(services) => results.add(CheckFinding::info(
            "catalog",
            format!("{} services: {}", services.len(), services.join(", ")),
        )),
        Err(e) => results.add(CheckFinding::error("catalog", e.to_string())),
    }
}

fn check_rules(
    rules: &RuleSet,
    engine: Option<&PolicyEngine>,
    catalog: Option<Arc<dyn OperationCatalog>>,
    results: &mut CheckResults,
) {
    results.add(CheckFinding::info(
        "rules",
        format!("{} resource types", rules.supported_types().len()),
    ));

    if let Some(engine) = engine
        && let Err(e) = rules.check_read_only(engine.classifier())
    {
        results.add(CheckFinding::error("rules", e.to_string()));
    }

    let Some(catalog) = catalog else {
        return;
    };
    for (service, operation) in rules.operations() {
        match catalog.describe_operation(&service, &operation) {
            Ok(description) if !description.exists => results.add(CheckFinding::warning(
                "rules",
                format!("{}.{} is not in the catalog; it will not be validated", service, operation),
            )),
            Ok(_) => {}
            Err(e) => results.add(CheckFinding::warning("rules", e.to_string())),
        }
    }
}

pub fn run(config_path: Option<&Path>) -> Result<()> {
    println!("Checking Nimbus configuration...");
    println!();

    let results = collect(config_path);
    results.print_summary();

    if results.has_errors() {
        anyhow::bail!("Configuration has {} error(s)", results.error_count());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_pass() {
        let file = write_config("");
        let results = collect(Some(file.path()));
        assert!(!results.has_errors(), "{:?}", results.findings);
        assert_eq!(results.warning_count(), 0, "{:?}", results.findings);
    }

    #[test]
    fn test_unrestricted_default_warns() {
        let file = write_config("safety:\n  default_mode: unrestricted\n");
        let results = collect(Some(file.path()));
        assert!(!results.has_errors());
        assert!(
            results
                .findings
                .iter()
                .any(|f| f.severity == Severity::Warning && f.category == "safety")
        );
    }

    #[test]
    fn test_invalid_values_are_errors() {
        let file = write_config("execution:\n  max_pages: 0\n");
        let results = collect(Some(file.path()));
        assert_eq!(results.error_count(), 1);
        assert_eq!(results.findings[0].category, "config");
    }

    #[test]
    fn test_mutating_rules_are_errors() {
        let mut rules = tempfile::NamedTempFile::new().unwrap();
        rules
            .write_all(
                br#"
resource_types:
  s3/bucket:
    describe: { service: s3, operation: delete_bucket, parameters: { Bucket: "{id}" } }
"#,
            )
            .unwrap();
        let file = write_config(&format!(
            "graph:\n  rules_file: {}\n",
            rules.path().display()
        ));

        let results = collect(Some(file.path()));

        assert!(
            results
                .findings
                .iter()
                .any(|f| f.severity == Severity::Error && f.category == "rules"),
            "{:?}",
            results.findings
        );
    }
}
