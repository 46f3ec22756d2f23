use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use bioeval::{load_evals, CommandAgent, Config, EvalRunner, FailureKind, RunCache};

// Leftover work dirs from a hard-killed process are removed at startup once
// they are clearly abandoned.
const STALE_WORKDIR_SECS: u64 = 24 * 3600;

#[derive(Parser)]
#[command(name = "bioeval", about = "Run biology-data evals against an agent command")]
struct Args {
    /// Eval definition file, or directory searched recursively for *.json
    #[arg(long)]
    evals: PathBuf,

    /// Shell command invoked once per eval; receives the task prompt on
    /// stdin with the work directory as cwd
    #[arg(long)]
    agent_cmd: String,

    /// Cache completed runs under this name and reuse them on re-runs
    #[arg(long)]
    cache_name: Option<String>,

    /// Write the batch summary JSON to this path
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bioeval=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env();
    config.log_summary();

    tokio::fs::create_dir_all(&config.workspace_base)
        .await
        .context("Failed to create workspace directory")?;
    bioeval::workdir::reap_stale_workdirs(&config.workspace_base, STALE_WORKDIR_SECS).await;

    let cache = match &args.cache_name {
        Some(name) => Some(RunCache::open(&config.cache_base, name)?),
        None => None,
    };

    let evals = load_evals(&args.evals)?;
    if evals.is_empty() {
        warn!("No eval definitions found under {}", args.evals.display());
        return Ok(());
    }

    let agent = CommandAgent::from_config(args.agent_cmd.clone(), &config);
    let identity = agent.identity();
    let agent = &agent;

    let mut results = Vec::new();
    for eval in evals {
        let runner = EvalRunner::new(eval, config.workspace_base.clone(), identity.clone());
        let result = runner
            .run(
                move |prompt, work_dir| async move { agent.run(&prompt, &work_dir).await },
                cache.as_ref(),
            )
            .await?;

        match result.passed() {
            Some(true) => info!("[{}] PASS", result.eval_id),
            Some(false) => info!("[{}] FAIL", result.eval_id),
            None => warn!("[{}] NOT GRADED (agent execution failure)", result.eval_id),
        }
        results.push(result);
    }

    let total = results.len();
    let passed = results.iter().filter(|r| r.passed() == Some(true)).count();
    let errored = results
        .iter()
        .filter(|r| r.metadata.failure_kind == Some(FailureKind::AgentExecutionFailure))
        .count();
    let accuracy = passed as f64 / total as f64;
    info!(
        "{}/{} passed ({:.1}%), {} agent failures",
        passed,
        total,
        accuracy * 100.0,
        errored
    );

    if let Some(path) = &args.output {
        let summary = serde_json::json!({
            "generated_at": chrono::Utc::now(),
            "agent": identity,
            "total": total,
            "passed": passed,
            "accuracy": accuracy,
            "results": results,
        });
        std::fs::write(path, serde_json::to_string_pretty(&summary)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Results written to {}", path.display());
    }

    Ok(())
}
