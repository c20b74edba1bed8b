//! DevStory CLI
//!
//! The `devstory` command drives the story and code generation pipeline
//! against a GitHub repository.
//!
//! ## Commands
//!
//! - `run`: start a run (impact analysis through story generation)
//! - `generate`: continue a run parked after story generation
//! - `resume`: restart a failed, cancelled or interrupted run
//! - `status`: show a run's phase and artifacts
//! - `runs`: list runs of a repository
//! - `export`: write stories, code and tests of a run to disk

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use devstory_core::obs::RunSpan;
use devstory_core::{
    AccessToken, PipelineConfig, PipelineOrchestrator, ProjectRef, RunId, RunPhase, RunSnapshot,
    RunState,
};
use devstory_integrations::{GeminiCompletion, GitHubSource};
use devstory_state::{FsCasStore, StoreConfig, SurrealArtifactStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "devstory")]
#[command(author = "DevStory Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Generate user stories, code and tests from a feature request", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new run against a GitHub repository
    Run {
        /// Repository URL (https://github.com/<owner>/<repo>)
        #[arg(short, long)]
        repo: String,

        /// Feature request in natural language
        #[arg(short, long)]
        query: String,

        /// GitHub access token (optional for public repositories)
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Branch, tag or commit to read (default: repository default branch)
        #[arg(long = "ref")]
        git_ref: Option<String>,

        /// Continue into code generation without pausing after stories
        #[arg(short, long)]
        generate: bool,
    },

    /// Continue a run that is awaiting code generation
    Generate {
        /// Run ID
        run: String,
    },

    /// Resume a failed, cancelled or interrupted run
    Resume {
        /// Run ID
        run: String,

        /// GitHub access token (tokens are never stored with the run)
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Show the state of a run
    Status {
        /// Run ID
        run: String,

        /// Print the full snapshot, artifacts included, as JSON
        #[arg(long)]
        full: bool,
    },

    /// List runs of a repository
    Runs {
        /// Repository as owner/repo
        project: String,
    },

    /// Write a run's stories, code and tests to a directory
    Export {
        /// Run ID
        run: String,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    devstory_core::telemetry::init_tracing(cli.json, level);

    let mut config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    if let Commands::Run { generate: true, .. } = cli.command {
        config.auto_generate = true;
    }
    let orchestrator = build_orchestrator(config).await?;

    match cli.command {
        Commands::Run {
            repo,
            query,
            token,
            git_ref,
            ..
        } => {
            let token = AccessToken::new(token.unwrap_or_default());
            cmd_run(&orchestrator, &repo, &query, token, git_ref.as_deref()).await
        }
        Commands::Generate { run } => cmd_generate(&orchestrator, &RunId::from(run.as_str())).await,
        Commands::Resume { run, token } => {
            cmd_resume(&orchestrator, &RunId::from(run.as_str()), token.map(AccessToken::new)).await
        }
        Commands::Status { run, full } => {
            cmd_status(&orchestrator, &RunId::from(run.as_str()), full).await
        }
        Commands::Runs { project } => cmd_runs(&orchestrator, &project).await,
        Commands::Export { run, out } => {
            cmd_export(&orchestrator, &RunId::from(run.as_str()), &out).await
        }
    }
}

/// Wire the production store and collaborators.
async fn build_orchestrator(config: PipelineConfig) -> Result<PipelineOrchestrator> {
    let store_config = StoreConfig::from_env();
    let cas = FsCasStore::new(store_config.data_dir().join("cas"))
        .context("Failed to open blob store")?;
    let store = SurrealArtifactStore::connect(&store_config, Arc::new(cas))
        .await
        .with_context(|| format!("Failed to connect to run store at {}", store_config.describe()))?;

    let source = GitHubSource::from_env().context("Failed to configure GitHub client")?;
    let completion = GeminiCompletion::from_env().context("Failed to configure Gemini client")?;

    PipelineOrchestrator::new(Arc::new(store), Arc::new(source), Arc::new(completion), config)
        .context("Invalid pipeline configuration")
}

/// Start a run and wait for it to settle
async fn cmd_run(
    orchestrator: &PipelineOrchestrator,
    repo_url: &str,
    query: &str,
    token: AccessToken,
    git_ref: Option<&str>,
) -> Result<()> {
    let project = ProjectRef::from_url(repo_url, token, git_ref)?;
    info!(repo = %project.project_key(), git_ref = %project.branch_or_ref, "starting run");

    let run_id = orchestrator.start_run(project, query).await?;
    println!("Run: {}", run_id);

    let state = wait_for_run(orchestrator, &run_id).await?;
    report(orchestrator, &run_id, &state).await
}

/// Trigger code generation on a parked run
async fn cmd_generate(orchestrator: &PipelineOrchestrator, run_id: &RunId) -> Result<()> {
    orchestrator
        .trigger_code_generation(run_id)
        .await
        .with_context(|| format!("Cannot generate code for run {}", run_id))?;
    let state = wait_for_run(orchestrator, run_id).await?;
    report(orchestrator, run_id, &state).await
}

async fn cmd_resume(
    orchestrator: &PipelineOrchestrator,
    run_id: &RunId,
    token: Option<AccessToken>,
) -> Result<()> {
    orchestrator
        .resume_run(run_id, token)
        .await
        .with_context(|| format!("Cannot resume run {}", run_id))?;
    let state = wait_for_run(orchestrator, run_id).await?;
    report(orchestrator, run_id, &state).await
}

/// Await a run; Ctrl-C cancels it at the next stage boundary.
async fn wait_for_run(orchestrator: &PipelineOrchestrator, run_id: &RunId) -> Result<RunState> {
    tokio::select! {
        state = orchestrator.await_run(run_id) => Ok(state?),
        _ = tokio::signal::ctrl_c() => {
            warn!(run_id = %run_id, "interrupted, cancelling at the next stage boundary");
            orchestrator.cancel_run(run_id).await?;
            Ok(orchestrator.await_run(run_id).await?)
        }
    }
}

async fn report(orchestrator: &PipelineOrchestrator, run_id: &RunId, state: &RunState) -> Result<()> {
    let snapshot = orchestrator.get_run_state(run_id).await?;
    print!("{}", render_summary(&snapshot));

    match state.phase {
        RunPhase::Completed => Ok(()),
        RunPhase::AwaitingCodeGeneration => {
            println!("\nStories ready. Continue with: devstory generate {}", run_id);
            Ok(())
        }
        RunPhase::Cancelled => {
            println!("\nCancelled. Resume with: devstory resume {}", run_id);
            Ok(())
        }
        phase => anyhow::bail!("run {} ended in {}", run_id, phase),
    }
}

async fn cmd_status(orchestrator: &PipelineOrchestrator, run_id: &RunId, full: bool) -> Result<()> {
    let snapshot = orchestrator.get_run_state(run_id).await?;
    if full {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }
    print!("{}", render_summary(&snapshot));

    let history = orchestrator.state_history(run_id).await?;
    println!("\nHistory:");
    for state in history {
        println!(
            "  {}  {:<24} cycle {}",
            state.updated_at.format("%Y-%m-%d %H:%M:%S"),
            state.phase.to_string(),
            state.revision_cycle
        );
    }
    Ok(())
}

async fn cmd_runs(orchestrator: &PipelineOrchestrator, project_key: &str) -> Result<()> {
    let runs = orchestrator.list_runs(project_key).await?;
    if runs.is_empty() {
        println!("No runs for {}", project_key);
        return Ok(());
    }

    println!("Runs for {}:", project_key);
    for run_id in runs {
        let snapshot = orchestrator.get_run_state(&run_id).await?;
        println!(
            "  {}  {:<24} {}  {}",
            run_id,
            snapshot.state.phase.to_string(),
            snapshot.created_at.format("%Y-%m-%d %H:%M"),
            truncate(snapshot.manifest.query.as_str(), 60)
        );
    }
    Ok(())
}

/// Export the latest artifacts of a run
async fn cmd_export(orchestrator: &PipelineOrchestrator, run_id: &RunId, out: &Path) -> Result<()> {
    let snapshot = orchestrator.get_run_state(run_id).await?;
    let _span = RunSpan::enter(&run_id.0);
    let written = write_export(&snapshot, out)?;
    if written.is_empty() {
        anyhow::bail!("run {} has no stories or code to export yet", run_id);
    }
    for path in written {
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn write_export(snapshot: &RunSnapshot, out: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(out).with_context(|| format!("Failed to create {:?}", out))?;
    let artifacts = &snapshot.artifacts;
    let mut files: Vec<(&str, String)> = Vec::new();

    if let Some(stories) = &artifacts.stories {
        files.push((
            "stories.md",
            format!(
                "# Stories: {}\n\n## Developer\n\n{}\n\n## Tester\n\n{}\n",
                snapshot.manifest.query, stories.developer_story, stories.tester_story
            ),
        ));
    }
    if let Some(code) = &artifacts.code {
        files.push(("developer_code.txt", code.code.clone()));
    }
    if let Some(tests) = &artifacts.tests {
        files.push(("tester_code.txt", tests.code.clone()));
    }
    if let Some(verdict) = &artifacts.verdict {
        let status = if verdict.is_approved() {
            "APPROVED"
        } else {
            "NEEDS_REVISION"
        };
        let mut review = format!("# Review (cycle {})\n\n{}\n", verdict.code_version, status);
        for comment in &verdict.comments {
            review.push_str(&format!("\n- {}", comment));
        }
        review.push('\n');
        files.push(("review.md", review));
    }

    let mut written = Vec::new();
    for (name, content) in files {
        let path = out.join(name);
        std::fs::write(&path, content).with_context(|| format!("Failed to write {:?}", path))?;
        info!(file = %path.display(), "exported artifact");
        written.push(path);
    }
    Ok(written)
}

fn render_summary(snapshot: &RunSnapshot) -> String {
    let state = &snapshot.state;
    let mut out = format!(
        "Run:        {}\nRepository: {}@{}\nQuery:      {}\nPhase:      {}{}\n",
        snapshot.run_id,
        snapshot.manifest.project.project_key(),
        snapshot.manifest.project.branch_or_ref,
        snapshot.manifest.query,
        state.phase,
        if snapshot.active { " (running)" } else { "" },
    );
    if state.revision_cycle > 0 {
        out.push_str(&format!("Cycle:      {}\n", state.revision_cycle));
    }
    if let Some(failure) = &state.failure {
        out.push_str(&format!(
            "Failure:    {} at {} after {} attempt(s): {}\n",
            failure.cause, failure.stage, failure.attempts, failure.message
        ));
    }

    let artifacts = &snapshot.artifacts;
    if let Some(impact) = &artifacts.impact_set {
        out.push_str(&format!("Impacted:   {} file(s)\n", impact.len()));
        for path in impact.paths() {
            out.push_str(&format!("  - {}\n", path));
        }
    }
    if let Some(bundle) = &artifacts.source_bundle {
        let failed = bundle.failed_paths();
        out.push_str(&format!(
            "Sources:    {} loaded, {} failed\n",
            bundle.loaded_count(),
            failed.len()
        ));
    }
    if let Some(verdict) = &artifacts.verdict {
        let status = if verdict.is_approved() {
            "approved"
        } else {
            "needs revision"
        };
        out.push_str(&format!("Verdict:    {} (cycle {})\n", status, verdict.code_version));
    }
    out
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
