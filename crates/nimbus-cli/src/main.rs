use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "nimbus", version, about = "Safety-gated cloud operations for AI agents")]
struct Cli {
    /// Configuration file. Defaults are used when omitted.
    #[arg(short, long, global = true, env = "NIMBUS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the MCP server.
    Serve(commands::serve::ServeArgs),

    /// Show how an operation is classified and what the policy decides.
    Classify(commands::classify::ClassifyArgs),

    /// Check the configuration, policy tables, catalog and relationship rules.
    CheckConfig,

    /// Browse the operation catalog.
    Catalog(commands::catalog::CatalogArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries JSON-RPC in stdio mode.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.cmd {
        Command::Serve(args) => commands::serve::run(config_path, args).await?,
        Command::Classify(args) => commands::classify::run(config_path, args)?,
        Command::CheckConfig => commands::check::run(config_path)?,
        Command::Catalog(args) => commands::catalog::run(config_path, args)?,
    }

    Ok(())
}
