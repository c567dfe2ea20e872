//! Fanin - pipeline fan-in revision resolver CLI
//!
//! The `fanin` command resolves, for a pipeline in a workspace file, one
//! revision per upstream material such that all upstream runs agree.
//!
//! ## Commands
//!
//! - `revisions`: resolved `fingerprint -> revision` map as JSON
//! - `trace`: resolution report (compact, Markdown or JSON)
//! - `debug`: a page of search steps
//! - `trigger`: resolve with optional pins and decide whether to run

mod workspace;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fanin_core::{FanInService, FanInSettings, PipelineName, TriggerRequest};
use tracing::{debug, Level};

use crate::workspace::Workspace;

#[derive(Parser)]
#[command(name = "fanin")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Resolve consistent upstream revisions for fan-in pipelines", long_about = None)]
struct Cli {
    /// Workspace file with pipelines and recorded runs
    #[arg(short, long, env = "FANIN_WORKSPACE", global = true)]
    workspace: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Newest passed runs considered per dependency
    #[arg(long, global = true)]
    max_candidates: Option<usize>,

    /// Candidate evaluations before giving up
    #[arg(long, global = true)]
    max_steps: Option<u64>,

    /// Take each dependency's newest passed run without checking agreement
    #[arg(long, global = true)]
    no_enforce_upstream: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Compact,
    Markdown,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved fingerprint -> revision map
    Revisions {
        /// Target pipeline
        pipeline: String,
    },

    /// Show the resolution report
    Trace {
        /// Target pipeline
        pipeline: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "compact")]
        format: ReportFormat,
    },

    /// Show a page of search steps
    Debug {
        /// Target pipeline
        pipeline: String,

        /// First step to show (0-based)
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Maximum number of steps to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Resolve and decide whether the pipeline should be triggered
    Trigger {
        /// Target pipeline
        pipeline: String,

        /// Pin a material: NAME=REVISION (repeatable)
        #[arg(long = "pin")]
        pins: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    fanin_core::telemetry::init_tracing(cli.json_logs, level);

    let path = cli
        .workspace
        .clone()
        .context("No workspace file given (use --workspace or FANIN_WORKSPACE)")?;
    let workspace = Workspace::load(&path).await?;
    let settings = settings_from(&cli)?;

    let output = run(cli.command, workspace, settings).await?;
    println!("{output}");
    Ok(())
}

fn settings_from(cli: &Cli) -> Result<FanInSettings> {
    let mut settings = FanInSettings::from_env().context("Invalid FANIN_* environment")?;
    if let Some(n) = cli.max_candidates {
        settings = settings.with_max_candidates(n);
    }
    if let Some(n) = cli.max_steps {
        settings = settings.with_max_steps(n);
    }
    if cli.no_enforce_upstream {
        settings = settings.with_enforce_upstream(false);
    }
    settings.validate().context("Invalid resolver settings")?;
    Ok(settings)
}

async fn run(command: Commands, workspace: Workspace, settings: FanInSettings) -> Result<String> {
    let pins = match &command {
        Commands::Trigger { pins, .. } => pins
            .iter()
            .map(|pin| workspace.parse_pin(pin))
            .collect::<Result<Vec<_>>>()?,
        _ => Vec::new(),
    };
    let service = FanInService::new(
        Arc::new(workspace.configs),
        Arc::new(workspace.store),
        settings,
    );

    match command {
        Commands::Revisions { pipeline } => cmd_revisions(&service, &pipeline.into()).await,
        Commands::Trace { pipeline, format } => cmd_trace(&service, &pipeline.into(), format).await,
        Commands::Debug {
            pipeline,
            offset,
            limit,
        } => cmd_debug(&service, &pipeline.into(), offset, limit).await,
        Commands::Trigger { pipeline, .. } => {
            let mut request = TriggerRequest::new(pipeline);
            for (fingerprint, revision) in pins {
                request = request.pin(fingerprint, revision);
            }
            cmd_trigger(&service, request).await
        }
    }
}

async fn cmd_revisions(service: &FanInService, pipeline: &PipelineName) -> Result<String> {
    let map = service
        .revisions(pipeline)
        .await
        .with_context(|| format!("Failed to resolve {pipeline}"))?;
    Ok(serde_json::to_string_pretty(&map)?)
}

async fn cmd_trace(service: &FanInService, pipeline: &PipelineName, format: ReportFormat) -> Result<String> {
    let report = service
        .trace(pipeline)
        .await
        .with_context(|| format!("Failed to trace {pipeline}"))?;
    debug!(steps = report.steps.len(), resolved = report.is_resolved(), "Built report");
    Ok(match format {
        ReportFormat::Compact => report.render_compact(),
        ReportFormat::Markdown => report.render_verbose(),
        ReportFormat::Json => serde_json::to_string_pretty(&report)?,
    })
}

async fn cmd_debug(
    service: &FanInService,
    pipeline: &PipelineName,
    offset: usize,
    limit: usize,
) -> Result<String> {
    let steps = service
        .debug(pipeline, offset, limit)
        .await
        .with_context(|| format!("Failed to trace {pipeline}"))?;
    if steps.is_empty() {
        return Ok(format!("No steps at offset {offset}"));
    }
    Ok(steps
        .iter()
        .map(|step| format!("{:>4}. {}", step.index, step.summary))
        .collect::<Vec<_>>()
        .join("\n"))
}

async fn cmd_trigger(service: &FanInService, request: TriggerRequest) -> Result<String> {
    let pipeline = request.pipeline.clone();
    let outcome = service
        .trigger(request)
        .await
        .with_context(|| format!("Failed to resolve {pipeline}"))?;

    let mut out = if outcome.decision.should_trigger {
        format!("trigger {pipeline}: yes\n")
    } else {
        format!("trigger {pipeline}: no (nothing changed since last run)\n")
    };
    for (fingerprint, material) in outcome.resolution.iter() {
        let marker = if outcome.decision.changed.contains(fingerprint) {
            "*"
        } else {
            " "
        };
        let names: Vec<&str> = material.names.iter().map(String::as_str).collect();
        out.push_str(&format!(
            "{marker} {} → {} ({})\n",
            names.join(", "),
            material.revision,
            material.origin
        ));
    }
    Ok(out.trim_end().to_string())
}
