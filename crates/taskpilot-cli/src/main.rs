//! CLI binary for running taskpilot workflows.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use taskpilot_clients::{GitCli, HttpCodeHost, HttpTaskTracker};
use taskpilot_engines::{
    AnthropicEngine, EngineRegistry, EngineSelector, FallbackExecutor, FallbackPolicy,
    SelectionCriteria,
};
use taskpilot_types::{GenerationOptions, StepRecord, StepStatus, WorkflowConfig};
use taskpilot_workflow::{Progress, RunOptions, TaskPipeline, TaskRef};

#[derive(Parser)]
#[command(name = "taskpilot", version, about = "Automate tracker tasks into pull requests")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the end-to-end workflow for one task
    Workflow {
        /// Tracker project id
        project_id: String,

        /// Tracker task id
        task_id: String,

        /// Target repository as owner/repo (required for pull requests)
        #[arg(short, long, default_value = "")]
        repository: String,

        /// Prefix for the derived branch name
        #[arg(long, default_value = "feature")]
        branch_prefix: String,

        /// Branch to fork from and return to on cleanup
        #[arg(long, default_value = "main")]
        base_branch: String,

        /// Target language for generated code
        #[arg(long)]
        language: Option<String>,

        /// Target framework for generated code
        #[arg(long)]
        framework: Option<String>,

        /// Code style hint passed to the engine
        #[arg(long)]
        style: Option<String>,

        /// Ask the engine to include unit tests
        #[arg(long)]
        tests: bool,

        /// Ask the engine to comment non-obvious decisions
        #[arg(long)]
        comments: bool,

        /// Preferred engine id (skips reputation-based selection)
        #[arg(long)]
        engine: Option<String>,

        /// Engine to try when the primary is exhausted (repeatable)
        #[arg(long = "fallback-engine")]
        fallback_engines: Vec<String>,

        /// Directory generated files are written to
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Stop after context preparation; no side effects
        #[arg(long)]
        dry_run: bool,

        /// Skip the live connectivity checks
        #[arg(long)]
        skip_validation: bool,

        /// Don't commit generated files
        #[arg(long)]
        no_commit: bool,

        /// Don't push the branch
        #[arg(long)]
        no_push: bool,

        /// Don't open a pull request
        #[arg(long)]
        no_pr: bool,

        /// Don't assign the pull request
        #[arg(long)]
        no_assign: bool,

        /// Don't label the pull request
        #[arg(long)]
        no_labels: bool,

        /// Don't link the pull request back to the task
        #[arg(long)]
        no_link: bool,

        /// Keep the created branch when a later step fails
        #[arg(long)]
        no_cleanup: bool,
    },

    /// Show engine reputation and availability
    Engines,

    /// Smoke-test every available engine
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Workflow {
            project_id,
            task_id,
            repository,
            branch_prefix,
            base_branch,
            language,
            framework,
            style,
            tests,
            comments,
            engine,
            fallback_engines,
            output_dir,
            dry_run,
            skip_validation,
            no_commit,
            no_push,
            no_pr,
            no_assign,
            no_labels,
            no_link,
            no_cleanup,
        } => {
            let config = WorkflowConfig {
                repository,
                branch_prefix,
                base_branch,
                auto_commit: !no_commit,
                auto_push: !no_push,
                create_pr: !no_pr,
                auto_assign: !no_assign,
                add_labels: !no_labels,
                link_to_task: !no_link,
                output_directory: output_dir,
                cleanup_on_failure: !no_cleanup,
            };
            let options = GenerationOptions {
                language,
                framework,
                style,
                include_tests: tests,
                include_comments: comments,
                preferred_engine: engine,
                fallback_engines,
            };
            cmd_workflow(
                &project_id,
                &task_id,
                config,
                options,
                RunOptions {
                    dry_run,
                    skip_validation,
                },
            )
            .await?;
        }
        Commands::Engines => cmd_engines().await?,
        Commands::Health => cmd_health().await?,
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Engine wiring
// ---------------------------------------------------------------------------

fn build_engines(
    preferred: Option<String>,
) -> anyhow::Result<(Arc<EngineSelector>, Arc<FallbackExecutor>)> {
    let mut registry = EngineRegistry::new();
    registry.register(AnthropicEngine::from_env()?);
    let registry = Arc::new(registry);

    let criteria = SelectionCriteria {
        preferred_engine: preferred,
        ..SelectionCriteria::default()
    };
    let selector = Arc::new(EngineSelector::new(registry.clone(), criteria));
    let executor = Arc::new(FallbackExecutor::new(
        registry,
        selector.clone(),
        FallbackPolicy::default(),
    ));
    Ok((selector, executor))
}

// ---------------------------------------------------------------------------
// workflow
// ---------------------------------------------------------------------------

async fn cmd_workflow(
    project_id: &str,
    task_id: &str,
    config: WorkflowConfig,
    options: GenerationOptions,
    run_opts: RunOptions,
) -> anyhow::Result<()> {
    let tracker = Arc::new(HttpTaskTracker::from_env()?);
    let vcs = Arc::new(GitCli::new(std::env::current_dir()?));
    let code_host = Arc::new(if config.create_pr && !run_opts.dry_run {
        HttpCodeHost::from_env()?
    } else {
        HttpCodeHost::new(String::new())
    });
    let (selector, executor) = build_engines(options.preferred_engine.clone())?;

    let pipeline = TaskPipeline::new(
        tracker,
        vcs,
        code_host,
        selector,
        executor,
        config,
        options,
    )
    .with_progress(render_progress);

    println!("Running workflow for task {task_id} in project {project_id}");
    if run_opts.dry_run {
        println!("(dry run -- no side effects)");
    }

    let result = pipeline
        .run(&TaskRef::new(project_id, task_id), &run_opts)
        .await;
    println!();
    print_steps(&result.steps);

    if result.success {
        println!("\nWorkflow completed in {}ms", result.duration_ms);
        if !result.generated_files.is_empty() {
            println!("Generated files: {}", result.generated_files.len());
        }
        if let Some(vcs) = result.vcs {
            println!("Branch: {}", vcs.branch);
        }
        if let Some(pr) = result.pull_request {
            println!("Pull request #{}: {}", pr.number, pr.html_url);
        }
        Ok(())
    } else {
        eprintln!(
            "\nWorkflow failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }
}

/// Redraw the progress bar in place on every step transition.
fn render_progress(progress: &Progress) {
    const WIDTH: usize = 24;
    let filled = (progress.percent as usize * WIDTH) / 100;
    print!(
        "\r[{}{}] {:>3}% ({}/{}) {:<24}",
        "#".repeat(filled),
        "-".repeat(WIDTH - filled),
        progress.percent,
        progress.completed_steps,
        progress.total_steps,
        progress.current_step_name,
    );
    let _ = std::io::stdout().flush();
}

fn print_steps(steps: &[StepRecord]) {
    for step in steps {
        let mark = match step.status {
            StepStatus::Completed => "✓",
            StepStatus::Failed => "✗",
            StepStatus::Skipped => "~",
            StepStatus::Running => ">",
            StepStatus::Pending => "·",
        };
        match step.error {
            Some(ref error) => println!("  {mark} {} -- {error}", step.name),
            None => println!("  {mark} {}", step.name),
        }
    }
}

// ---------------------------------------------------------------------------
// engines / health
// ---------------------------------------------------------------------------

async fn cmd_engines() -> anyhow::Result<()> {
    let (selector, _) = build_engines(None)?;
    // select_best probes every engine, so the statuses reflect live state.
    let best = selector.select_best().await?;
    println!(
        "{:<12} {:<10} {:<14} {:<7} {:<6} {:<6}",
        "engine", "available", "authenticated", "errors", "perf", "cost"
    );
    for status in selector.statuses().await {
        println!(
            "{:<12} {:<10} {:<14} {:<7} {:<6} {:<6}",
            status.engine_id,
            status.available,
            status.authenticated,
            status.error_count,
            status.performance_score,
            status.cost_score,
        );
    }
    println!("\nSelected: {best}");
    Ok(())
}

async fn cmd_health() -> anyhow::Result<()> {
    let (_, executor) = build_engines(None)?;
    let results = executor.health_check().await;

    if results.is_empty() {
        eprintln!("No available engines to check");
        std::process::exit(1);
    }

    let mut any_healthy = false;
    for result in &results {
        if result.healthy {
            any_healthy = true;
            println!("✓ {} ({}ms)", result.engine_id, result.response_time_ms);
        } else {
            println!(
                "✗ {} -- {}",
                result.engine_id,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    if !any_healthy {
        std::process::exit(1);
    }
    Ok(())
}
