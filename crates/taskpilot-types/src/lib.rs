//! Shared types, errors, and records for the taskpilot workflow engine.
//!
//! This crate provides the foundational types used across all other taskpilot
//! crates:
//! - `PilotError` — unified error taxonomy
//! - `Task` / `TaskAnalysis` — tracker-side records
//! - `StepRecord` / `WorkflowResult` — pipeline bookkeeping
//! - `EngineStatus` / `FallbackAttempt` — engine reputation records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// PilotError
// ---------------------------------------------------------------------------

/// Unified error type for all taskpilot subsystems.
#[derive(Debug, thiserror::Error)]
pub enum PilotError {
    // === Engine errors ===
    #[error("Engine {engine} failed: {message}")]
    Engine {
        engine: String,
        message: String,
        retryable: bool,
    },

    #[error("Rate limited by engine {engine}, retry after {retry_after_ms}ms")]
    RateLimited { engine: String, retry_after_ms: u64 },

    #[error("Authentication failed for {service}")]
    Auth { service: String },

    #[error("Attempt on engine {engine} timed out after {timeout_ms}ms")]
    AttemptTimeout { engine: String, timeout_ms: u64 },

    #[error("All engines failed (primary '{}', {} attempts)", primary, attempts.len())]
    AllEnginesFailed {
        primary: String,
        attempts: Vec<FallbackAttempt>,
    },

    // === Pipeline errors ===
    #[error("Workflow validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<PilotError>,
    },

    // === Collaborator errors ===
    #[error("Task tracker returned HTTP {status}: {message}")]
    Tracker { status: u16, message: String },

    #[error("git {command} failed: {message}")]
    Vcs { command: String, message: String },

    #[error("Code host returned HTTP {status}: {message}")]
    CodeHost { status: u16, message: String },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl PilotError {
    /// Returns `true` if the error is transient and the operation may succeed
    /// on another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PilotError::RateLimited { .. }
                | PilotError::AttemptTimeout { .. }
                | PilotError::Engine { retryable: true, .. }
        )
    }

    /// Returns `true` if the error is permanent and retrying will not help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PilotError::Auth { .. }
                | PilotError::Validation(_)
                | PilotError::AllEnginesFailed { .. }
        )
    }

    /// Unwrap a step error down to its underlying cause, recursively.
    pub fn root_cause(&self) -> &PilotError {
        match self {
            PilotError::Step { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// A convenience alias for `Result<T, PilotError>`.
pub type Result<T> = std::result::Result<T, PilotError>;

// ---------------------------------------------------------------------------
// Task and analysis records
// ---------------------------------------------------------------------------

/// A task fetched from the tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub subject: String,
    pub body: String,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// The tracker's structured breakdown of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAnalysis {
    pub requirements: Vec<String>,
    pub technical_specs: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub suggested_approach: String,
    pub estimated_complexity: Complexity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_framework: Option<String>,
}

/// Fields to change on a task after the workflow completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

// ---------------------------------------------------------------------------
// Step records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Bookkeeping for one named unit of pipeline work.
///
/// Created `Pending` at pipeline init and mutated only by the driver; a
/// record never re-enters an earlier status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: String,
    pub name: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl StepRecord {
    pub fn pending(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: StepStatus::Pending,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        }
    }

    pub fn start(&mut self) {
        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self, result: Option<serde_json::Value>) {
        self.status = StepStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.result = result;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error.into());
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = StepStatus::Skipped;
        self.finished_at = Some(Utc::now());
        self.result = Some(serde_json::Value::String(reason.into()));
    }

    /// A step counts as terminal once it can no longer change status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

// ---------------------------------------------------------------------------
// Workflow configuration
// ---------------------------------------------------------------------------

/// Closed, validated configuration for one workflow run.
///
/// Built once at pipeline construction and immutable during execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub repository: String,
    pub branch_prefix: String,
    pub base_branch: String,
    pub auto_commit: bool,
    pub auto_push: bool,
    pub create_pr: bool,
    pub auto_assign: bool,
    pub add_labels: bool,
    pub link_to_task: bool,
    pub output_directory: Option<PathBuf>,
    pub cleanup_on_failure: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            repository: String::new(),
            branch_prefix: "feature".into(),
            base_branch: "main".into(),
            auto_commit: true,
            auto_push: true,
            create_pr: true,
            auto_assign: true,
            add_labels: true,
            link_to_task: true,
            output_directory: None,
            cleanup_on_failure: true,
        }
    }
}

/// Flags shaping the generated code itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub language: Option<String>,
    pub framework: Option<String>,
    pub style: Option<String>,
    pub include_tests: bool,
    pub include_comments: bool,
    pub preferred_engine: Option<String>,
    pub fallback_engines: Vec<String>,
}

// ---------------------------------------------------------------------------
// Workflow result
// ---------------------------------------------------------------------------

/// A file produced by the generation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// What the version-control step produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcsSummary {
    pub branch: String,
    pub commit: Option<String>,
    pub pushed: bool,
}

/// A pull request opened on the code host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
    pub title: String,
}

/// The outcome of one pipeline run. Built incrementally as steps complete;
/// immutable once returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub success: bool,
    pub task: Option<Task>,
    pub analysis: Option<TaskAnalysis>,
    pub generated_files: Vec<GeneratedFile>,
    pub vcs: Option<VcsSummary>,
    pub pull_request: Option<PullRequest>,
    pub steps: Vec<StepRecord>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Engine reputation records
// ---------------------------------------------------------------------------

/// Health and reputation record for one registered engine.
///
/// One record per known engine, created at selector construction and mutated
/// for the registry's lifetime; never deleted, only toggled available or
/// unavailable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub engine_id: String,
    pub available: bool,
    pub authenticated: bool,
    pub performance_score: f64,
    pub cost_score: f64,
    pub error_count: u32,
    pub last_used: Option<DateTime<Utc>>,
}

impl EngineStatus {
    pub fn new(engine_id: impl Into<String>) -> Self {
        Self {
            engine_id: engine_id.into(),
            available: true,
            authenticated: false,
            performance_score: 50.0,
            cost_score: 50.0,
            error_count: 0,
            last_used: None,
        }
    }
}

/// One bounded, timed invocation of an engine's generation operation.
/// Append-only log entry, immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackAttempt {
    pub engine_id: String,
    pub attempt_number: u32,
    pub success: bool,
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FallbackAttempt {
    pub fn succeeded(engine_id: impl Into<String>, attempt_number: u32, ms: u64) -> Self {
        Self {
            engine_id: engine_id.into(),
            attempt_number,
            success: true,
            response_time_ms: ms,
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn failed(
        engine_id: impl Into<String>,
        attempt_number: u32,
        ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            engine_id: engine_id.into(),
            attempt_number,
            success: false,
            response_time_ms: ms,
            timestamp: Utc::now(),
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
