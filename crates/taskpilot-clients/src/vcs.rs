//! Version-control contract and `git` subprocess wrapper.
//!
//! The workflow creates branches and commits deterministically, so the
//! wrapper stays small and explicit about every `git` invocation.

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;

use taskpilot_types::{PilotError, Result};

// ---------------------------------------------------------------------------
// VcsClient trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait VcsClient: Send + Sync {
    /// Whether the working directory is inside a repository.
    async fn is_repository(&self) -> Result<bool>;

    async fn current_branch(&self) -> Result<String>;

    /// Create `name` from `base` and check it out; optionally push upstream.
    /// Returns the branch name.
    async fn create_branch(&self, name: &str, base: &str, push: bool) -> Result<String>;

    /// Stage `files` (all changes when empty) and commit. Returns the hash.
    async fn commit(&self, message: &str, files: &[String]) -> Result<String>;

    async fn push(&self, branch: &str) -> Result<()>;

    async fn checkout(&self, branch: &str) -> Result<()>;

    async fn delete_branch(&self, name: &str, force: bool) -> Result<()>;
}

// ---------------------------------------------------------------------------
// GitCli
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GitCli {
    workdir: PathBuf,
}

impl GitCli {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        tracing::debug!(args = %args.join(" "), "running git");
        tokio::process::Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .await
            .map_err(|e| PilotError::Vcs {
                command: args.join(" "),
                message: e.to_string(),
            })
    }

    async fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PilotError::Vcs {
                command: args.join(" "),
                message: stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    async fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl VcsClient for GitCli {
    async fn is_repository(&self) -> Result<bool> {
        let output = self.run(&["rev-parse", "--is-inside-work-tree"]).await?;
        Ok(output.status.success()
            && String::from_utf8_lossy(&output.stdout).trim() == "true")
    }

    async fn current_branch(&self) -> Result<String> {
        self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    async fn create_branch(&self, name: &str, base: &str, push: bool) -> Result<String> {
        self.run_checked(&["checkout", base]).await?;
        self.run_checked(&["checkout", "-b", name]).await?;
        if push {
            self.run_checked(&["push", "-u", "origin", name]).await?;
        }
        tracing::info!(branch = %name, base = %base, "created branch");
        Ok(name.to_string())
    }

    async fn commit(&self, message: &str, files: &[String]) -> Result<String> {
        if files.is_empty() {
            self.run_checked(&["add", "-A"]).await?;
        } else {
            let mut args = vec!["add", "--"];
            args.extend(files.iter().map(String::as_str));
            self.run_checked(&args).await?;
        }
        self.run_checked(&["commit", "-m", message]).await?;
        let hash = self.run_capture(&["rev-parse", "HEAD"]).await?;
        tracing::info!(commit = %hash, "committed changes");
        Ok(hash)
    }

    async fn push(&self, branch: &str) -> Result<()> {
        self.run_checked(&["push", "origin", branch]).await?;
        Ok(())
    }

    async fn checkout(&self, branch: &str) -> Result<()> {
        self.run_checked(&["checkout", branch]).await?;
        Ok(())
    }

    async fn delete_branch(&self, name: &str, force: bool) -> Result<()> {
        let flag = if force { "-D" } else { "-d" };
        self.run_checked(&["branch", flag, name]).await?;
        tracing::info!(branch = %name, force, "deleted branch");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
