//! Build command: charm and bundle runs.

use anyhow::{Context, Result};
use charmforge_config::run::load_run_config;
use charmforge_config::CharmEnv;
use charmforge_executor::AttemptOutcome;
use charmforge_pipeline::{
    BundlePipeline, CharmInputs, CharmPipeline, EntryState, PipelineEvent, PromotionState,
    RunOutcome, RunReport,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use super::{combined_outcome, exit_code, toolchain};

pub struct BuildOptions {
    pub config: PathBuf,
    pub charms: bool,
    pub bundles: bool,
    pub dry_run: bool,
    pub report: Option<PathBuf>,
}

pub async fn run(opts: BuildOptions) -> Result<ExitCode> {
    let config = load_run_config(&opts.config)
        .with_context(|| format!("Failed to load config file: {}", opts.config.display()))?;
    let env = CharmEnv::from_env().context("Build environment is incomplete")?;
    let tools = toolchain(env.tool_env())?;

    let mut reports = Vec::new();

    if let Some(charms) = config.charms.filter(|_| opts.charms) {
        let inputs = CharmInputs::load(&charms).context("Failed to load charm manifests")?;
        println!(
            "Charm run: {} charms listed, filter '{}'",
            inputs.charms.len(),
            charms.filter
        );
        let pipeline = CharmPipeline::new(tools.clone(), env.clone(), charms, inputs)
            .dry_run(opts.dry_run);
        reports.push(follow(pipeline.execute()).await?);
    }

    let charms_aborted = reports.iter().any(|r| r.aborted.is_some());
    if charms_aborted && opts.bundles && config.bundles.is_some() {
        println!("\n⊘ Bundle run skipped: charm run aborted");
    }

    if let Some(bundles) = config.bundles.filter(|_| opts.bundles && !charms_aborted) {
        let pipeline = BundlePipeline::load(tools.clone(), env.clone(), bundles)
            .context("Failed to load bundle list")?
            .dry_run(opts.dry_run);
        println!("\nBundle run");
        reports.push(follow(pipeline.execute()).await?);
    }

    if reports.is_empty() {
        anyhow::bail!(
            "Nothing to build: {} enables no selected phase",
            opts.config.display()
        );
    }

    if let Some(path) = &opts.report {
        let json = serde_json::to_string_pretty(&reports).context("Failed to encode run report")?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write run report: {}", path.display()))?;
        info!(path = %path.display(), "Run report written");
    }

    let outcome = overall_outcome(&reports);
    println!("\nOverall: {}", outcome);
    Ok(exit_code(outcome))
}

/// An aborted run fails the whole build; otherwise the run outcomes are
/// folded together.
fn overall_outcome(reports: &[RunReport]) -> RunOutcome {
    if reports.iter().any(|r| r.aborted.is_some()) {
        return RunOutcome::Failed;
    }
    let outcomes: Vec<_> = reports.iter().map(RunReport::outcome).collect();
    combined_outcome(&outcomes)
}

/// Print events as they arrive, then the summary of the finished run.
async fn follow(
    (mut rx, handle): (mpsc::UnboundedReceiver<PipelineEvent>, JoinHandle<RunReport>),
) -> Result<RunReport> {
    while let Some(event) = rx.recv().await {
        print_event(event);
    }
    let report = handle.await.context("Pipeline execution task failed")?;
    print_summary(&report);
    Ok(report)
}

fn print_event(event: PipelineEvent) {
    match event {
        PipelineEvent::RunStarted { run_id, kind } => {
            println!("--- Starting {} run {} ---\n", kind, run_id);
        }
        PipelineEvent::LayerResolved { layer } => {
            println!("  ✓ {}", layer);
        }
        PipelineEvent::EntryStarted { name } => {
            println!("▶ '{}' started", name);
        }
        PipelineEvent::EntryPhase { name, phase } => {
            println!("  [{}] {}", name, phase);
        }
        PipelineEvent::EntryPlanned { name, detail } => {
            println!("○ {}: {}", name, detail);
        }
        PipelineEvent::EntryCompleted { name, success } => {
            if success {
                println!("✓ '{}' published\n", name);
            } else {
                println!("✗ '{}' failed\n", name);
            }
        }
        PipelineEvent::Attempt(attempt) => match attempt.outcome {
            AttemptOutcome::Retrying(error) => println!(
                "  ! {} failed [{}/{}], retrying: {}",
                attempt.operation, attempt.attempt, attempt.max_attempts, error
            ),
            AttemptOutcome::Exhausted(error) => println!(
                "  ! {} gave up after {} attempts: {}",
                attempt.operation, attempt.attempt, error
            ),
            AttemptOutcome::Succeeded | AttemptOutcome::Fatal(_) => {}
        },
        PipelineEvent::PromotionCompleted { entity, success } => {
            let marker = if success { "✓" } else { "✗" };
            println!("{} promoted {}", marker, entity);
        }
        PipelineEvent::RunCompleted { outcome } => {
            println!("--- Run finished: {} ---", outcome);
        }
    }
}

fn print_summary(report: &RunReport) {
    if let Some(abort) = &report.aborted {
        println!("\n✗ Aborted during {}: {}", abort.phase, abort.message);
    }

    if !report.entries.is_empty() {
        println!("\n--- Summary ---");
    }
    for entry in &report.entries {
        let status = match &entry.state {
            EntryState::Succeeded { artifact } => format!("✓ {}", artifact.url),
            EntryState::Failed { phase, message } => format!("✗ {} failed: {}", phase, message),
            EntryState::Planned { .. } => "○ planned".to_string(),
        };
        println!("  {} - {}", entry.name, status);
    }

    for promotion in &report.promotions {
        let status = match &promotion.state {
            PromotionState::Released { id, .. } => format!("✓ {} released", id),
            PromotionState::Failed { message } => format!("✗ failed: {}", message),
            PromotionState::Skipped { reason } => format!("⊘ skipped: {}", reason),
        };
        println!("  {} -> {} - {}", promotion.entity, promotion.to, status);
    }
}
