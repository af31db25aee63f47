//! The step plan: order and dependencies as data, not control flow.

// ---------------------------------------------------------------------------
// StepId
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepId {
    Validate,
    FetchTask,
    AnalyzeTask,
    PrepareContext,
    GenerateCode,
    PersistFiles,
    VersionControl,
    OpenPullRequest,
    UpdateTask,
}

impl StepId {
    pub fn id(self) -> &'static str {
        match self {
            StepId::Validate => "validate",
            StepId::FetchTask => "fetch-task",
            StepId::AnalyzeTask => "analyze-task",
            StepId::PrepareContext => "prepare-context",
            StepId::GenerateCode => "generate-code",
            StepId::PersistFiles => "persist-files",
            StepId::VersionControl => "version-control",
            StepId::OpenPullRequest => "open-pull-request",
            StepId::UpdateTask => "update-task",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StepId::Validate => "Validate",
            StepId::FetchTask => "Fetch task",
            StepId::AnalyzeTask => "Analyze task",
            StepId::PrepareContext => "Prepare context",
            StepId::GenerateCode => "Generate code",
            StepId::PersistFiles => "Persist files",
            StepId::VersionControl => "Version control",
            StepId::OpenPullRequest => "Open pull request",
            StepId::UpdateTask => "Update task",
        }
    }

    /// The ordered, dependency-respecting plan for one run. Dry runs stop
    /// after context preparation; the side-effecting steps are never part of
    /// the plan at all.
    pub fn plan(dry_run: bool) -> Vec<StepId> {
        let mut plan = vec![
            StepId::Validate,
            StepId::FetchTask,
            StepId::AnalyzeTask,
            StepId::PrepareContext,
        ];
        if !dry_run {
            plan.extend([
                StepId::GenerateCode,
                StepId::PersistFiles,
                StepId::VersionControl,
                StepId::OpenPullRequest,
                StepId::UpdateTask,
            ]);
        }
        plan
    }
}

// ---------------------------------------------------------------------------
// Branch naming
// ---------------------------------------------------------------------------

/// `"{prefix}/{task_id}"` with every non-alphanumeric task-id character
/// replaced by `-`.
pub fn derive_branch_name(prefix: &str, task_id: &str) -> String {
    let sanitized: String = task_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("{prefix}/{sanitized}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
