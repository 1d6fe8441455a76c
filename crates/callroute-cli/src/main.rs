//! `callroute` - connection routing simulator
//!
//! Routes the call described by a YAML scenario through the routing engine
//! using in-memory collaborators, then prints the attempts and the outcome.

mod scenario;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use callroute_core::collaborators::memory::RecordingSink;
use callroute_core::logging::{parse_log_level, setup_logging, LoggingConfig};
use callroute_core::types::{Candidate, CreatedConnection, DisconnectCause};
use callroute_core::{CreateConnectionProcessor, RoutingConfig, RoutingOutcome, RoutingResult};

use scenario::Scenario;

/// Exit status when routing ends in failure
const ROUTING_FAILED: u8 = 2;

#[derive(Parser, Debug)]
#[command(author, version, about = "Connection routing simulator", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Route the call described by a scenario file
    Run {
        /// Scenario YAML file
        scenario: PathBuf,

        /// Routing config YAML; defaults to $CALLROUTE_CONFIG, then built-in defaults
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, env = "CALLROUTE_LOG_LEVEL", default_value = "info")]
        log_level: String,

        /// Emit logs and the report as JSON
        #[arg(long)]
        json: bool,

        /// Log span enter and exit events
        #[arg(long)]
        log_spans: bool,

        /// Include source file and line in log lines
        #[arg(long)]
        file_info: bool,
    },
}

/// Machine-readable run report
#[derive(Debug, Serialize)]
struct Report {
    call_id: String,
    connected: bool,
    attempts: Vec<Candidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection: Option<CreatedConnection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cause: Option<DisconnectCause>,
}

impl From<&RoutingOutcome> for Report {
    fn from(outcome: &RoutingOutcome) -> Self {
        let mut report = Report {
            call_id: outcome.call_id.to_string(),
            connected: outcome.is_connected(),
            attempts: outcome.attempts.clone(),
            service: None,
            connection: None,
            cause: None,
        };
        match &outcome.result {
            RoutingResult::Connected {
                service,
                connection,
                ..
            } => {
                report.service = Some(service.to_string());
                report.connection = Some(connection.clone());
            }
            RoutingResult::Failed { cause } => report.cause = Some(cause.clone()),
        }
        report
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    match args.command {
        Command::Run {
            scenario,
            config,
            log_level,
            json,
            log_spans,
            file_info,
        } => {
            let mut logging = LoggingConfig::new(parse_log_level(&log_level)?, "callroute");
            if json {
                logging = logging.with_json();
            }
            if log_spans {
                logging = logging.with_spans();
            }
            if file_info {
                logging = logging.with_file_info();
            }
            setup_logging(logging)?;

            let config = match config {
                Some(path) => RoutingConfig::from_yaml_file(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => RoutingConfig::from_env_override()?,
            };
            let outcome = run(&scenario, config).await?;
            print_outcome(&outcome, json)?;

            Ok(if outcome.is_connected() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(ROUTING_FAILED)
            })
        }
    }
}

async fn run(path: &Path, config: RoutingConfig) -> Result<RoutingOutcome> {
    let scenario = Scenario::from_file(path)
        .with_context(|| format!("loading scenario {}", path.display()))?;
    if let Some(description) = &scenario.description {
        info!("Scenario: {}", description.trim());
    }
    let env = scenario.build().context("building scenario")?;

    let handle = CreateConnectionProcessor::new(
        env.call.clone(),
        env.catalog.clone(),
        env.slots.clone(),
        env.binder.clone(),
        Arc::new(RecordingSink::new()),
        config,
    )
    .process()
    .await;
    Ok(handle.wait().await)
}

fn print_outcome(outcome: &RoutingOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&Report::from(outcome))?);
        return Ok(());
    }

    println!("call {}", outcome.call_id);
    if outcome.attempts.is_empty() {
        println!("  no candidates attempted");
    }
    for (n, candidate) in outcome.attempts.iter().enumerate() {
        println!("  attempt {}: {}", n + 1, candidate);
    }
    match &outcome.result {
        RoutingResult::Connected {
            service,
            connection,
            ..
        } => println!("connected via {} (connection {})", service, connection.connection_id),
        RoutingResult::Failed { cause } => println!("failed: {}", cause),
    }
    Ok(())
}
