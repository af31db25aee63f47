//! The task pipeline: a generic driver over the typed step plan.
//!
//! Collaborators are injected at construction; the driver owns all step
//! sequencing, progress reporting, and the failure cleanup policy. At most
//! one step is ever running; a failure halts the run immediately and later
//! steps stay pending.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;

use taskpilot_clients::{CodeHostClient, PullRequestOptions, TaskSource, VcsClient};
use taskpilot_engines::{EngineSelector, FallbackExecutor, GenerationRequest, GenerationResponse};
use taskpilot_types::{
    GeneratedFile, GenerationOptions, PilotError, PullRequest, Result, StepRecord, StepStatus,
    Task, TaskAnalysis, TaskPatch, VcsSummary, WorkflowConfig, WorkflowResult,
};

use crate::progress::{Progress, ProgressCallback};
use crate::steps::{derive_branch_name, StepId};
use crate::validation::validate_workflow;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Identifies one task in the tracker.
#[derive(Debug, Clone)]
pub struct TaskRef {
    pub project_id: String,
    pub task_id: String,
}

impl TaskRef {
    pub fn new(project_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            task_id: task_id.into(),
        }
    }
}

/// Per-run switches, separate from the closed [`WorkflowConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub skip_validation: bool,
}

// ---------------------------------------------------------------------------
// TaskPipeline
// ---------------------------------------------------------------------------

pub struct TaskPipeline {
    tracker: Arc<dyn TaskSource>,
    vcs: Arc<dyn VcsClient>,
    code_host: Arc<dyn CodeHostClient>,
    selector: Arc<EngineSelector>,
    executor: Arc<FallbackExecutor>,
    config: WorkflowConfig,
    options: GenerationOptions,
    progress: Option<ProgressCallback>,
}

/// Everything accumulated while steps run.
#[derive(Default)]
struct RunState {
    task: Option<Task>,
    analysis: Option<TaskAnalysis>,
    request: Option<GenerationRequest>,
    files: Vec<GeneratedFile>,
    persisted: Vec<String>,
    created_branch: Option<String>,
    vcs_summary: Option<VcsSummary>,
    pull_request: Option<PullRequest>,
}

enum StepOutcome {
    Completed(Option<serde_json::Value>),
    Skipped(String),
}

impl TaskPipeline {
    pub fn new(
        tracker: Arc<dyn TaskSource>,
        vcs: Arc<dyn VcsClient>,
        code_host: Arc<dyn CodeHostClient>,
        selector: Arc<EngineSelector>,
        executor: Arc<FallbackExecutor>,
        config: WorkflowConfig,
        options: GenerationOptions,
    ) -> Self {
        Self {
            tracker,
            vcs,
            code_host,
            selector,
            executor,
            config,
            options,
            progress: None,
        }
    }

    /// Register the synchronous progress callback.
    pub fn with_progress(
        mut self,
        callback: impl Fn(&Progress) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Drive the full step plan for one task.
    ///
    /// Never panics out of a step: a failing step halts the run, triggers
    /// best-effort cleanup, and surfaces as `success = false` with the step
    /// error preserved verbatim in `error`.
    pub async fn run(&self, task_ref: &TaskRef, opts: &RunOptions) -> WorkflowResult {
        let started = Instant::now();
        let plan = StepId::plan(opts.dry_run);
        let mut steps: Vec<StepRecord> = plan
            .iter()
            .map(|s| StepRecord::pending(s.id(), s.name()))
            .collect();
        let mut state = RunState::default();

        tracing::info!(
            project = %task_ref.project_id,
            task = %task_ref.task_id,
            steps = plan.len(),
            dry_run = opts.dry_run,
            "starting workflow"
        );

        for (index, step) in plan.iter().copied().enumerate() {
            steps[index].start();
            self.emit(&steps, step, format!("Running {}", step.name()));

            match self.execute_step(step, task_ref, opts, &mut state).await {
                Ok(StepOutcome::Completed(result)) => {
                    steps[index].complete(result);
                    self.emit(&steps, step, format!("{} completed", step.name()));
                }
                Ok(StepOutcome::Skipped(reason)) => {
                    steps[index].skip(reason.clone());
                    self.emit(&steps, step, format!("{} skipped: {reason}", step.name()));
                }
                Err(err) => {
                    steps[index].fail(err.to_string());
                    self.emit(&steps, step, format!("{} failed: {err}", step.name()));
                    let step_error = PilotError::Step {
                        step: step.id().to_string(),
                        source: Box::new(err),
                    };
                    tracing::error!(step = step.id(), error = %step_error, "workflow halted");
                    self.cleanup(&state).await;
                    return build_result(state, steps, started, Some(step_error));
                }
            }
        }

        tracing::info!(
            duration_ms = started.elapsed().as_millis() as u64,
            "workflow completed"
        );
        build_result(state, steps, started, None)
    }

    async fn execute_step(
        &self,
        step: StepId,
        task_ref: &TaskRef,
        opts: &RunOptions,
        state: &mut RunState,
    ) -> Result<StepOutcome> {
        match step {
            StepId::Validate => {
                validate_workflow(
                    &task_ref.project_id,
                    &task_ref.task_id,
                    &self.config,
                    self.tracker.as_ref(),
                    self.code_host.as_ref(),
                    self.vcs.as_ref(),
                    opts.skip_validation,
                    opts.dry_run,
                )
                .await?;
                Ok(StepOutcome::Completed(None))
            }

            StepId::FetchTask => {
                let task = self
                    .tracker
                    .get_task(&task_ref.project_id, &task_ref.task_id)
                    .await?;
                let summary = json!({ "id": task.id, "subject": task.subject });
                state.task = Some(task);
                Ok(StepOutcome::Completed(Some(summary)))
            }

            StepId::AnalyzeTask => {
                let analysis = self
                    .tracker
                    .analyze_task(&task_ref.project_id, &task_ref.task_id)
                    .await?;
                let summary = json!({
                    "requirements": analysis.requirements.len(),
                    "complexity": analysis.estimated_complexity,
                });
                state.analysis = Some(analysis);
                Ok(StepOutcome::Completed(Some(summary)))
            }

            StepId::PrepareContext => {
                let task = require(&state.task, "task was not fetched")?;
                let analysis = require(&state.analysis, "task was not analyzed")?;
                let request = build_generation_request(task, analysis, &self.options);
                let summary = json!({
                    "prompt_bytes": request.prompt.len(),
                    "language": request.language,
                });
                state.request = Some(request);
                Ok(StepOutcome::Completed(Some(summary)))
            }

            StepId::GenerateCode => {
                let request = require(&state.request, "context was not prepared")?.clone();
                let primary = match self.options.preferred_engine {
                    Some(ref engine) => engine.clone(),
                    None => self.selector.select_best().await?,
                };
                let response = self
                    .executor
                    .execute_with_fallback(&request, &primary, &self.options.fallback_engines)
                    .await?;
                let files = split_generated_files(
                    &response,
                    &task_ref.task_id,
                    self.options.language.as_deref(),
                );
                let summary = json!({
                    "files": files.len(),
                    "attempts": response.metadata.attempts.len(),
                    "request_id": response.metadata.request_id,
                });
                state.files = files;
                Ok(StepOutcome::Completed(Some(summary)))
            }

            StepId::PersistFiles => {
                let dir = self
                    .config
                    .output_directory
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("."));
                for file in &state.files {
                    let path = dir.join(&file.path);
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &file.content)?;
                    state.persisted.push(path.display().to_string());
                }
                Ok(StepOutcome::Completed(Some(
                    json!({ "written": state.persisted.len() }),
                )))
            }

            StepId::VersionControl => {
                let branch = derive_branch_name(&self.config.branch_prefix, &task_ref.task_id);
                self.vcs
                    .create_branch(&branch, &self.config.base_branch, false)
                    .await?;
                state.created_branch = Some(branch.clone());

                let mut commit = None;
                if self.config.auto_commit {
                    let task = require(&state.task, "task was not fetched")?;
                    let message = format!("{}: {}", task.id, task.subject);
                    commit = Some(self.vcs.commit(&message, &state.persisted).await?);
                }
                let mut pushed = false;
                if self.config.auto_push {
                    self.vcs.push(&branch).await?;
                    pushed = true;
                }
                state.vcs_summary = Some(VcsSummary {
                    branch: branch.clone(),
                    commit,
                    pushed,
                });
                Ok(StepOutcome::Completed(Some(json!({ "branch": branch }))))
            }

            StepId::OpenPullRequest => {
                if !self.config.create_pr {
                    return Ok(StepOutcome::Skipped(
                        "pull request creation disabled".into(),
                    ));
                }
                let task = require(&state.task, "task was not fetched")?;
                let branch = require(&state.created_branch, "no branch was created")?.clone();

                let title = format!("{}: {}", task.id, task.subject);
                let mut body = format!("Automated change for task {}.\n", task.id);
                if !state.files.is_empty() {
                    body.push_str("\nFiles:\n");
                    for file in &state.files {
                        body.push_str(&format!("- `{}`\n", file.path));
                    }
                }
                let options = PullRequestOptions {
                    repository: self.config.repository.clone(),
                    base_branch: self.config.base_branch.clone(),
                    auto_assign: self.config.auto_assign,
                    auto_label: self.config.add_labels,
                    link_to_task: self.config.link_to_task,
                    task_url: None,
                };
                let pr = self
                    .code_host
                    .create_task_pull_request(&task.id, &title, &body, &branch, &options)
                    .await?;
                let summary = json!({ "number": pr.number, "url": pr.html_url });
                state.pull_request = Some(pr);
                Ok(StepOutcome::Completed(Some(summary)))
            }

            StepId::UpdateTask => {
                let comment = match (&state.pull_request, &state.created_branch) {
                    (Some(pr), _) => format!("Opened pull request {}", pr.html_url),
                    (None, Some(branch)) => format!("Pushed branch {branch}"),
                    (None, None) => "Workflow completed".to_string(),
                };
                let patch = TaskPatch {
                    status: Some("in_review".into()),
                    comment: Some(comment),
                };
                self.tracker
                    .update_task(&task_ref.project_id, &task_ref.task_id, &patch)
                    .await?;
                Ok(StepOutcome::Completed(None))
            }
        }
    }

    /// Best-effort rollback: only when a branch exists and the config asks
    /// for it. Errors here are logged and swallowed so they never mask the
    /// original step failure.
    async fn cleanup(&self, state: &RunState) {
        let Some(ref branch) = state.created_branch else {
            return;
        };
        if !self.config.cleanup_on_failure {
            return;
        }
        tracing::info!(branch = %branch, "cleaning up after failure");
        if let Err(e) = self.vcs.checkout(&self.config.base_branch).await {
            tracing::warn!(error = %e, "cleanup checkout failed");
        }
        if let Err(e) = self.vcs.delete_branch(branch, true).await {
            tracing::warn!(branch = %branch, error = %e, "cleanup branch delete failed");
        }
    }

    fn emit(&self, steps: &[StepRecord], current: StepId, message: String) {
        if let Some(ref callback) = self.progress {
            let completed = steps
                .iter()
                .filter(|s| matches!(s.status, StepStatus::Completed | StepStatus::Skipped))
                .count();
            callback(&Progress::new(
                current.name(),
                steps.len(),
                completed,
                message,
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn require<'a, T>(value: &'a Option<T>, what: &str) -> Result<&'a T> {
    value
        .as_ref()
        .ok_or_else(|| PilotError::Other(what.to_string()))
}

fn build_result(
    state: RunState,
    steps: Vec<StepRecord>,
    started: Instant,
    error: Option<PilotError>,
) -> WorkflowResult {
    let success = error.is_none()
        && steps
            .iter()
            .all(|s| matches!(s.status, StepStatus::Completed | StepStatus::Skipped));
    WorkflowResult {
        success,
        task: state.task,
        analysis: state.analysis,
        generated_files: state.files,
        vcs: state.vcs_summary,
        pull_request: state.pull_request,
        steps,
        duration_ms: started.elapsed().as_millis() as u64,
        error: error.map(|e| e.to_string()),
    }
}

fn build_generation_request(
    task: &Task,
    analysis: &TaskAnalysis,
    options: &GenerationOptions,
) -> GenerationRequest {
    let mut prompt = format!(
        "Implement the following task.\n\nTask {}: {}\n\n{}",
        task.id, task.subject, task.body
    );
    if options.include_tests {
        prompt.push_str("\n\nInclude unit tests.");
    }
    if options.include_comments {
        prompt.push_str("\nComment non-obvious decisions.");
    }
    if let Some(ref style) = options.style {
        prompt.push_str(&format!("\nCode style: {style}."));
    }

    let mut context = String::new();
    push_section(&mut context, "Requirements", &analysis.requirements);
    push_section(&mut context, "Technical specs", &analysis.technical_specs);
    push_section(
        &mut context,
        "Acceptance criteria",
        &analysis.acceptance_criteria,
    );
    if !analysis.suggested_approach.is_empty() {
        context.push_str(&format!("Approach: {}\n", analysis.suggested_approach));
    }
    let framework = options
        .framework
        .clone()
        .or_else(|| analysis.recommended_framework.clone());
    if let Some(framework) = framework {
        context.push_str(&format!("Framework: {framework}\n"));
    }

    let language = options
        .language
        .clone()
        .or_else(|| analysis.recommended_language.clone());

    GenerationRequest {
        prompt,
        language,
        context: (!context.is_empty()).then_some(context),
        max_tokens: None,
        temperature: None,
    }
}

fn push_section(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(title);
    out.push_str(":\n");
    for item in items {
        out.push_str(&format!("- {item}\n"));
    }
}

/// Split an engine reply into files. Multi-file replies mark boundaries with
/// `// file: path` (or `# file: path`) lines; a reply without markers becomes
/// one file named after the task.
fn split_generated_files(
    response: &GenerationResponse,
    task_id: &str,
    language: Option<&str>,
) -> Vec<GeneratedFile> {
    let code = response.code.trim_end();
    if code.trim().is_empty() {
        return Vec::new();
    }

    let mut files: Vec<GeneratedFile> = Vec::new();
    let mut current_path: Option<String> = None;
    let mut current: Vec<&str> = Vec::new();
    let lang = language.map(str::to_string);

    let flush =
        |path: Option<String>, lines: &mut Vec<&str>, files: &mut Vec<GeneratedFile>| {
            let content = lines.join("\n");
            lines.clear();
            if content.trim().is_empty() {
                return;
            }
            files.push(GeneratedFile {
                path: path.unwrap_or_else(|| default_file_name(task_id, language)),
                content,
                language: lang.clone(),
            });
        };

    for line in code.lines() {
        if let Some(path) = file_marker(line) {
            flush(current_path.take(), &mut current, &mut files);
            current_path = Some(path);
        } else {
            current.push(line);
        }
    }
    flush(current_path.take(), &mut current, &mut files);

    files
}

fn file_marker(line: &str) -> Option<String> {
    let trimmed = line.trim();
    for prefix in ["// file:", "// File:", "# file:", "# File:"] {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            let path = rest.trim();
            if !path.is_empty() {
                return Some(path.to_string());
            }
        }
    }
    None
}

fn default_file_name(task_id: &str, language: Option<&str>) -> String {
    let stem: String = task_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{stem}.{}", extension_for(language))
}

fn extension_for(language: Option<&str>) -> &'static str {
    match language.map(str::to_ascii_lowercase).as_deref() {
        Some("rust") => "rs",
        Some("python") => "py",
        Some("typescript") => "ts",
        Some("javascript") => "js",
        Some("go") => "go",
        Some("java") => "java",
        Some("ruby") => "rb",
        _ => "txt",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
