mod cli;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sarathi_core::{
    generic_template, repair, HeuristicGate, ReconstructionMethod, Reconstructor, RepairPolicy,
    StructuredResult,
};
use sarathi_runtime::{
    AuditSink, CaseRequest, ConsultationOrchestrator, InMemoryAuditStore, JsonlAuditSink, Outcome,
    RuntimeConfig,
};

use cli::{Cli, Commands};

/// Exit code for a case the gate turned away.
const EXIT_REJECTED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr; stdout carries only JSON results.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Check { case, offline } => {
            let case = load_case(&case)?;
            let decision = if offline {
                HeuristicGate::new().evaluate(&case.text())
            } else {
                build_orchestrator(config, None)
                    .await?
                    .check_acceptance(&case)
                    .await
                    .decision
            };
            print_json(&decision)?;
            Ok(if decision.is_accepted() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_REJECTED)
            })
        }
        Commands::Reconstruct {
            case,
            refined,
            draft,
        } => {
            let case = load_case(&case)?;
            let refined = refined.as_deref().map(read_text).transpose()?;
            let draft = draft.as_deref().map(read_text).transpose()?;
            let report =
                reconstruct_case(&case, refined.as_deref(), draft.as_deref(), &config.repair)?;
            print_json(&report)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Consult { case, audit } => {
            let case = load_case(&case)?;
            let outcome = consult(&case, config, audit.as_deref()).await?;
            print_json(&outcome)?;
            Ok(match outcome {
                Outcome::Accepted { .. } => ExitCode::SUCCESS,
                Outcome::Rejected { .. } => ExitCode::from(EXIT_REJECTED),
                Outcome::Failed { .. } => ExitCode::FAILURE,
            })
        }
        Commands::Config => {
            let yaml = serde_yaml::to_string(&config).context("Failed to render configuration")?;
            print!("{yaml}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(RuntimeConfig::default()),
    }
}

/// Case files are YAML; JSON parses as YAML too.
fn load_case(path: &Path) -> Result<CaseRequest> {
    let content = read_text(path)?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse case file {}", path.display()))
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}

async fn build_orchestrator(
    config: RuntimeConfig,
    audit: Option<&Path>,
) -> Result<ConsultationOrchestrator> {
    let sink: Arc<dyn AuditSink> = match audit {
        Some(path) => Arc::new(
            JsonlAuditSink::open(path)
                .await
                .with_context(|| format!("Failed to open audit log {}", path.display()))?,
        ),
        None => Arc::new(InMemoryAuditStore::new()),
    };

    ConsultationOrchestrator::builder()
        .config(config)
        .audit(sink)
        .build()
        .context("Failed to build consultation pipeline")
}

async fn consult(case: &CaseRequest, config: RuntimeConfig, audit: Option<&Path>) -> Result<Outcome> {
    let orchestrator = build_orchestrator(config, audit).await?;
    Ok(orchestrator.run_consultation(case).await)
}

#[derive(Debug, Serialize)]
struct ReconstructReport {
    method: ReconstructionMethod,
    result: StructuredResult,
    repairs: Vec<String>,
    /// Why earlier prose was unusable
    notes: Vec<String>,
}

fn reconstruct_case(
    case: &CaseRequest,
    refined: Option<&str>,
    draft: Option<&str>,
    policy: &RepairPolicy,
) -> Result<ReconstructReport> {
    let (result, method, notes) = match Reconstructor::new().reconstruct(refined, draft, &case.sources)
    {
        Ok(reconstruction) => {
            let notes = reconstruction
                .skipped
                .iter()
                .map(|(origin, err)| format!("{origin:?}: {err}"))
                .collect();
            (reconstruction.result, reconstruction.method, notes)
        }
        Err(failure) => (
            generic_template(&case.sources),
            ReconstructionMethod::GenericTemplate,
            vec![failure.to_string()],
        ),
    };

    let candidate = serde_json::to_value(&result).context("Failed to serialize reconstruction")?;
    let outcome = repair(&candidate, &case.sources, policy);
    Ok(ReconstructReport {
        method,
        repairs: outcome.repairs.iter().map(ToString::to_string).collect(),
        result: outcome.result,
        notes,
    })
}
