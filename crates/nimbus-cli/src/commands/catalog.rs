//! `nimbus catalog` - browse the operation catalog.
//!
//! With no arguments lists services; with a service lists its operations and
//! their classification; with an operation too, describes its parameters.

use anyhow::{Context, Result, bail};
use clap::Args;
use nimbus_core::catalog::{OperationCatalog, OperationDescription};
use nimbus_policy::{PolicyEngine, engine_from_config};
use std::fmt::Write as _;
use std::path::Path;

/// Arguments for `nimbus catalog`.
#[derive(Debug, Args)]
pub struct CatalogArgs {
    /// Service to list operations for.
    pub service: Option<String>,

    /// Operation to describe.
    pub operation: Option<String>,

    /// Print the operation description as JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run(config_path: Option<&Path>, args: CatalogArgs) -> Result<()> {
    let config = super::load_config(config_path)?;
    let catalog = nimbus_core::catalog::from_config(&config.catalog)
        .context("Failed to load the operation catalog")?;
    let engine = engine_from_config(&config.safety).context("Failed to load policy tables")?;

    match (args.service, args.operation) {
        (None, _) => print!("{}", list_services(catalog.as_ref())?),
        (Some(service), None) => {
            print!("{}", list_operations(catalog.as_ref(), &engine, &service)?)
        }
        (Some(service), Some(operation)) => {
            let description = catalog.describe_operation(&service, &operation)?;
            if !description.exists {
                bail!("{}.{} is not in the catalog", service, operation);
            }
            if args.json {
                println!("{}", serde_json::to_string_pretty(&description)?);
            } else {
                print!("{}", describe(&engine, &description));
            }
        }
    }
    Ok(())
}

fn list_services(catalog: &dyn OperationCatalog) -> Result<String> {
    let mut out = String::new();
    for service in catalog.list_services()? {
        let count = catalog.list_operations(&service)?.len();
        writeln!(out, "{:<16} {:>4} operations", service, count)?;
    }
    Ok(out)
}

fn list_operations(
    catalog: &dyn OperationCatalog,
    engine: &PolicyEngine,
    service: &str,
) -> Result<String> {
    let operations = catalog.list_operations(service)?;
    if operations.is_empty() {
        bail!("Service '{}' is not in the catalog", service);
    }

    let mut out = String::new();
    for operation in operations {
        let op_type = engine.classifier().classify(service, &operation);
        let marker = if engine.denylist().is_denied(service, &operation) {
            " (denied)"
        } else {
            ""
        };
        writeln!(out, "{:<44} {:?}{}", operation, op_type, marker)?;
    }
    Ok(out)
}

fn describe(engine: &PolicyEngine, description: &OperationDescription) -> String {
    let (service, operation) = (&description.service, &description.operation);
    let mut out = String::new();
    let _ = writeln!(out, "{}.{}", service, operation);
    let _ = writeln!(
        out,
        "  type:       {:?}",
        engine.classifier().classify(service, operation)
    );
    if let Some(reason) = engine.denylist().block_reason(service, operation) {
        let _ = writeln!(out, "  denied:     {}", reason);
    }
    let _ = writeln!(out, "  idempotent: {}", description.idempotent);

    if !description.required.is_empty() {
        let _ = writeln!(out, "  required:");
        for param in &description.required {
            let _ = writeln!(out, "    {:<32} {}", param.name, param.param_type);
        }
    }
    if !description.optional.is_empty() {
        let _ = writeln!(out, "  optional:");
        for param in &description.optional {
            let _ = writeln!(out, "    {:<32} {}", param.name, param.param_type);
        }
    }
    if let Some(pagination) = &description.pagination {
        let _ = writeln!(
            out,
            "  pagination: {} -> {}",
            pagination.output_token, pagination.input_token
        );
        if let Some(key) = &pagination.result_key {
            let _ = writeln!(out, "  items:      {}", key);
        }
    }
    out
}
