//! Aggregated pre-flight validation.
//!
//! Every applicable check runs before the step fails; the result is the
//! union of violations, never just the first one. Connectivity probes are
//! the only concurrent fan-out in the system and join as all-or-nothing.

use regex::Regex;

use taskpilot_clients::{CodeHostClient, TaskSource, VcsClient};
use taskpilot_types::{PilotError, Result, WorkflowConfig};

/// Run all applicable checks and return the union of violations as a single
/// [`PilotError::Validation`].
///
/// `skip_connectivity` suppresses the live tracker/code-host probes only;
/// structural checks always run. In dry-run mode the VCS and code-host are
/// never touched.
#[allow(clippy::too_many_arguments)]
pub async fn validate_workflow(
    project_id: &str,
    task_id: &str,
    config: &WorkflowConfig,
    tracker: &dyn TaskSource,
    code_host: &dyn CodeHostClient,
    vcs: &dyn VcsClient,
    skip_connectivity: bool,
    dry_run: bool,
) -> Result<()> {
    let mut violations: Vec<String> = Vec::new();

    if project_id.trim().is_empty() {
        violations.push("project id is required".into());
    }
    if task_id.trim().is_empty() {
        violations.push("task id is required".into());
    }

    if config.create_pr {
        let repo_re = Regex::new(r"^[\w.-]+/[\w.-]+$").unwrap();
        if !repo_re.is_match(&config.repository) {
            violations.push(format!(
                "repository '{}' must be in owner/repo form when pull request creation is enabled",
                config.repository
            ));
        }
    }

    if config.auto_commit && !dry_run {
        match vcs.is_repository().await {
            Ok(true) => {}
            Ok(false) => {
                violations.push("working directory is not a git repository".into())
            }
            Err(e) => violations.push(format!("git repository check failed: {e}")),
        }
    }

    if !skip_connectivity {
        let check_code_host = config.create_pr && !dry_run;
        if check_code_host {
            let (tracker_ok, host_ok) = tokio::join!(
                tracker.validate_connection(),
                code_host.validate_connection()
            );
            record_probe(&mut violations, "task tracker", tracker_ok);
            record_probe(&mut violations, "code host", host_ok);
        } else {
            record_probe(
                &mut violations,
                "task tracker",
                tracker.validate_connection().await,
            );
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        tracing::warn!(count = violations.len(), "validation found violations");
        Err(PilotError::Validation(violations))
    }
}

fn record_probe(violations: &mut Vec<String>, service: &str, probe: Result<bool>) {
    match probe {
        Ok(true) => {}
        Ok(false) => violations.push(format!("{service} rejected the connection check")),
        Err(e) => violations.push(format!("{service} is unreachable: {e}")),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use taskpilot_clients::PullRequestOptions;
    use taskpilot_types::{PullRequest, Task, TaskAnalysis, TaskPatch};

    struct StubTracker {
        connected: bool,
    }

    #[async_trait]
    impl TaskSource for StubTracker {
        async fn validate_connection(&self) -> Result<bool> {
            Ok(self.connected)
        }
        async fn get_task(&self, _p: &str, _t: &str) -> Result<Task> {
            unreachable!("validation never fetches tasks")
        }
        async fn analyze_task(&self, _p: &str, _t: &str) -> Result<TaskAnalysis> {
            unreachable!()
        }
        async fn update_task(&self, _p: &str, _t: &str, _patch: &TaskPatch) -> Result<()> {
            unreachable!()
        }
    }

    struct StubCodeHost {
        connected: bool,
        reachable: bool,
    }

    #[async_trait]
    impl CodeHostClient for StubCodeHost {
        async fn validate_connection(&self) -> Result<bool> {
            if !self.reachable {
                return Err(PilotError::CodeHost {
                    status: 0,
                    message: "connection refused".into(),
                });
            }
            Ok(self.connected)
        }
        async fn create_task_pull_request(
            &self,
            _task_id: &str,
            _title: &str,
            _body: &str,
            _branch: &str,
            _options: &PullRequestOptions,
        ) -> Result<PullRequest> {
            unreachable!("validation never opens pull requests")
        }
    }

    struct StubVcs {
        is_repo: bool,
    }

    #[async_trait]
    impl VcsClient for StubVcs {
        async fn is_repository(&self) -> Result<bool> {
            Ok(self.is_repo)
        }
        async fn current_branch(&self) -> Result<String> {
            unreachable!()
        }
        async fn create_branch(&self, _n: &str, _b: &str, _p: bool) -> Result<String> {
            unreachable!()
        }
        async fn commit(&self, _m: &str, _f: &[String]) -> Result<String> {
            unreachable!()
        }
        async fn push(&self, _b: &str) -> Result<()> {
            unreachable!()
        }
        async fn checkout(&self, _b: &str) -> Result<()> {
            unreachable!()
        }
        async fn delete_branch(&self, _n: &str, _f: bool) -> Result<()> {
            unreachable!()
        }
    }

    fn config(repository: &str) -> WorkflowConfig {
        WorkflowConfig {
            repository: repository.into(),
            ..WorkflowConfig::default()
        }
    }

    fn violations_of(err: PilotError) -> Vec<String> {
        match err {
            PilotError::Validation(v) => v,
            other => panic!("expected Validation, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn valid_inputs_pass() {
        let result = validate_workflow(
            "P1",
            "T1",
            &config("acme/widgets"),
            &StubTracker { connected: true },
            &StubCodeHost {
                connected: true,
                reachable: true,
            },
            &StubVcs { is_repo: true },
            false,
            false,
        )
        .await;
        assert!(result.is_ok(), "expected Ok, got: {result:?}");
    }

    #[tokio::test]
    async fn all_violations_are_aggregated() {
        let err = validate_workflow(
            "",
            "",
            &config("not-a-repo"),
            &StubTracker { connected: true },
            &StubCodeHost {
                connected: true,
                reachable: true,
            },
            &StubVcs { is_repo: false },
            true,
            false,
        )
        .await
        .unwrap_err();

        let violations = violations_of(err);
        assert_eq!(violations.len(), 4);
        assert!(violations[0].contains("project id"));
        assert!(violations[1].contains("task id"));
        assert!(violations[2].contains("owner/repo"));
        assert!(violations[3].contains("not a git repository"));
    }

    #[tokio::test]
    async fn repository_shape_only_checked_when_pr_enabled() {
        let mut cfg = config("garbage");
        cfg.create_pr = false;
        cfg.auto_commit = false;
        let result = validate_workflow(
            "P1",
            "T1",
            &cfg,
            &StubTracker { connected: true },
            &StubCodeHost {
                connected: true,
                reachable: true,
            },
            &StubVcs { is_repo: false },
            true,
            false,
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn connectivity_failures_join_static_violations() {
        let err = validate_workflow(
            "P1",
            "",
            &config("acme/widgets"),
            &StubTracker { connected: false },
            &StubCodeHost {
                connected: true,
                reachable: false,
            },
            &StubVcs { is_repo: true },
            false,
            false,
        )
        .await
        .unwrap_err();

        let violations = violations_of(err);
        assert_eq!(violations.len(), 3);
        assert!(violations.iter().any(|v| v.contains("task id")));
        assert!(violations
            .iter()
            .any(|v| v.contains("task tracker rejected")));
        assert!(violations
            .iter()
            .any(|v| v.contains("code host is unreachable")));
    }

    #[tokio::test]
    async fn dry_run_never_touches_vcs_or_code_host() {
        struct PanickingCodeHost;

        #[async_trait]
        impl CodeHostClient for PanickingCodeHost {
            async fn validate_connection(&self) -> Result<bool> {
                panic!("code host must not be probed in dry run")
            }
            async fn create_task_pull_request(
                &self,
                _task_id: &str,
                _title: &str,
                _body: &str,
                _branch: &str,
                _options: &PullRequestOptions,
            ) -> Result<PullRequest> {
                panic!("code host must not be used in dry run")
            }
        }

        struct PanickingVcs;

        #[async_trait]
        impl VcsClient for PanickingVcs {
            async fn is_repository(&self) -> Result<bool> {
                panic!("vcs must not be probed in dry run")
            }
            async fn current_branch(&self) -> Result<String> {
                panic!()
            }
            async fn create_branch(&self, _n: &str, _b: &str, _p: bool) -> Result<String> {
                panic!()
            }
            async fn commit(&self, _m: &str, _f: &[String]) -> Result<String> {
                panic!()
            }
            async fn push(&self, _b: &str) -> Result<()> {
                panic!()
            }
            async fn checkout(&self, _b: &str) -> Result<()> {
                panic!()
            }
            async fn delete_branch(&self, _n: &str, _f: bool) -> Result<()> {
                panic!()
            }
        }

        let result = validate_workflow(
            "P1",
            "T1",
            &config("acme/widgets"),
            &StubTracker { connected: true },
            &PanickingCodeHost,
            &PanickingVcs,
            false,
            true,
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn skip_connectivity_suppresses_probes_only() {
        let err = validate_workflow(
            "P1",
            "T1",
            &config(""),
            &StubTracker { connected: false },
            &StubCodeHost {
                connected: false,
                reachable: false,
            },
            &StubVcs { is_repo: true },
            true,
            false,
        )
        .await
        .unwrap_err();

        // Only the static repository violation; no probe results.
        let violations = violations_of(err);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("owner/repo"));
    }
}
