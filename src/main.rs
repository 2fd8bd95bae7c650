// src/main.rs
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use spiderflow::core::validator::ValidationIssue;
use spiderflow::services::flow_store::{DirectoryFlowStore, FlowStore};
use spiderflow::services::web_server;
use spiderflow::{
    FlowDocument, FlowExecutor, FlowParser, FlowValidator, LogCallback, LogEntry, LogLevel,
    SpiderConfig,
};

#[derive(Parser)]
#[command(name = "spiderflow", version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a flow and print the collected records
    Run {
        /// Flow document (JSON with `nodes` and `edges`)
        file: Option<PathBuf>,
        /// Run a saved flow from the configured flows directory
        #[arg(long, conflicts_with = "file")]
        id: Option<String>,
        /// Seed for delays and user-agent rotation
        #[arg(long)]
        seed: Option<u64>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
        /// Also write the collected records to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Report structural problems in a flow without running it
    Check {
        file: PathBuf,
        /// Show warnings for valid flows too
        #[arg(long)]
        all: bool,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Start the HTTP API
    Web {
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(long)]
        host: Option<String>,
    },
}

fn load_document(
    file: Option<&Path>,
    id: Option<&str>,
    config: &SpiderConfig,
) -> Result<FlowDocument> {
    match (file, id) {
        (Some(path), _) => FlowParser::from_path(path),
        (None, Some(id)) => DirectoryFlowStore::new(&config.store.flows_dir)
            .load(id)?
            .ok_or_else(|| anyhow!("Flow '{}' not found in {:?}", id, config.store.flows_dir)),
        (None, None) => Err(anyhow!("Either a flow file or --id is required")),
    }
}

fn print_entry(entry: &LogEntry) {
    let tag = match entry.level {
        LogLevel::Info => "\x1b[36minfo\x1b[0m ",
        LogLevel::Warn => "\x1b[33mwarn\x1b[0m ",
        LogLevel::Error => "\x1b[31merror\x1b[0m",
    };
    match &entry.node_id {
        Some(node) => println!("  {} [{}] {}", tag, node, entry.message),
        None => println!("  {} {}", tag, entry.message),
    }
}

async fn handle_run(
    file: Option<&Path>,
    id: Option<&str>,
    seed: Option<u64>,
    format: &str,
    output: Option<&Path>,
    mut config: SpiderConfig,
) -> Result<()> {
    let doc = load_document(file, id, &config)?;
    if seed.is_some() {
        config.engine.seed = seed;
    }

    let json_mode = format == "json";
    if !json_mode {
        println!("\x1b[1mRunning\x1b[0m {}", doc.title());
    }

    let executor = FlowExecutor::new(config);
    let on_log: Option<LogCallback> = if json_mode {
        None
    } else {
        Some(Arc::new(print_entry))
    };
    let result = executor.execute_flow(&doc.nodes, &doc.edges, on_log).await;

    if let Some(path) = output {
        let records = serde_json::to_string_pretty(&result.data)?;
        fs::write(path, records).with_context(|| format!("Failed to write {:?}", path))?;
        info!("Wrote {} record(s) to {:?}", result.data.len(), path);
    }

    if json_mode {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!();
        for record in &result.data {
            println!("{}", serde_json::to_string_pretty(record)?);
        }
        match &result.error {
            None => println!(
                "    \x1b[1;32mFinished\x1b[0m {} record(s) collected",
                result.data.len()
            ),
            Some(e) => println!("\x1b[1;31merror\x1b[0m: {}", e),
        }
    }

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

fn print_issues(kind: &str, color: &str, issues: &[ValidationIssue]) {
    for issue in issues {
        let at = issue
            .node_id
            .as_deref()
            .map(|id| format!(" (node '{}')", id))
            .unwrap_or_default();
        println!(
            "  \x1b[{}m{}\x1b[0m[{}]: {}{}",
            color, kind, issue.code, issue.message, at
        );
    }
}

fn handle_check(file: &Path, show_all: bool, format: &str) -> Result<()> {
    let doc = FlowParser::from_path(file)?;
    let validation = FlowValidator::validate(&doc);

    if format == "json" {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "file": file,
                "flow": doc.title(),
                "valid": validation.is_valid,
                "errors": validation.errors,
                "warnings": validation.warnings,
            }))?
        );
    } else {
        print_issues("error", "1;31", &validation.errors);
        if show_all || !validation.is_valid {
            print_issues("warning", "33", &validation.warnings);
        }

        if !validation.is_valid {
            println!(
                "\x1b[1;31merror\x1b[0m: {} has {} error(s), {} warning(s)",
                file.display(),
                validation.error_count(),
                validation.warning_count()
            );
        } else if validation.warning_count() > 0 {
            println!(
                "    \x1b[1;32mFinished\x1b[0m checking {} - valid with {} warning(s)",
                doc.title(),
                validation.warning_count()
            );
        } else {
            println!("    \x1b[1;32mFinished\x1b[0m checking {} - all valid", doc.title());
        }
    }

    if !validation.is_valid {
        std::process::exit(1);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("spiderflow=warn,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = SpiderConfig::load()?;

    match &cli.command {
        Commands::Run { file, id, seed, format, output } => {
            handle_run(
                file.as_deref(),
                id.as_deref(),
                *seed,
                format,
                output.as_deref(),
                config,
            )
            .await?;
        }
        Commands::Check { file, all, format } => handle_check(file, *all, format)?,
        Commands::Web { port, host } => {
            // CLI > config file > default
            let final_host = host.clone().unwrap_or_else(|| config.server.host.clone());
            let final_port = port.unwrap_or(config.server.port);
            web_server::start_web_server(config, final_host, final_port).await?;
        }
    }

    Ok(())
}
