//! Collaborator contracts consumed by the workflow core, plus thin
//! implementations: a REST task tracker, a `git` subprocess wrapper, and a
//! REST code-host client.
//!
//! The pipeline only ever sees the traits; concrete clients are wired in at
//! startup by the CLI.

pub mod code_host;
pub mod tracker;
pub mod vcs;

pub use code_host::{CodeHostClient, HttpCodeHost, PullRequestOptions};
pub use tracker::{HttpTaskTracker, TaskSource};
pub use vcs::{GitCli, VcsClient};
