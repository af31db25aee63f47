//! Code host contract and REST client for opening pull requests.

use async_trait::async_trait;
use serde_json::json;

use taskpilot_types::{PilotError, PullRequest, Result};

// ---------------------------------------------------------------------------
// CodeHostClient trait
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PullRequestOptions {
    /// "owner/repo"
    pub repository: String,
    pub base_branch: String,
    pub auto_assign: bool,
    pub auto_label: bool,
    pub link_to_task: bool,
    pub task_url: Option<String>,
}

#[async_trait]
pub trait CodeHostClient: Send + Sync {
    async fn validate_connection(&self) -> Result<bool>;

    async fn create_task_pull_request(
        &self,
        task_id: &str,
        title: &str,
        body: &str,
        branch: &str,
        options: &PullRequestOptions,
    ) -> Result<PullRequest>;
}

// ---------------------------------------------------------------------------
// HttpCodeHost
// ---------------------------------------------------------------------------

pub struct HttpCodeHost {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

const USER_AGENT: &str = "taskpilot";

impl HttpCodeHost {
    pub fn new(token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "https://api.github.com".to_string(),
            token,
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn from_env() -> Result<Self> {
        let token = std::env::var("TASKPILOT_CODE_HOST_TOKEN")
            .or_else(|_| std::env::var("GITHUB_TOKEN"))
            .map_err(|_| PilotError::Auth {
                service: "code host".into(),
            })?;
        Ok(Self::new(token))
    }

    /// Best-effort labels/assignee after creation; failures are logged, the
    /// pull request itself stands.
    async fn apply_extras(
        &self,
        repository: &str,
        number: u64,
        options: &PullRequestOptions,
    ) {
        if options.auto_label {
            let result = self
                .client
                .post(format!(
                    "{}/repos/{repository}/issues/{number}/labels",
                    self.base_url
                ))
                .bearer_auth(&self.token)
                .header("user-agent", USER_AGENT)
                .json(&json!({ "labels": ["automated", "taskpilot"] }))
                .send()
                .await;
            if let Err(e) = result {
                tracing::warn!(pr = number, error = %e, "failed to add labels");
            }
        }
        if options.auto_assign {
            match self.authenticated_login().await {
                Some(login) => {
                    let result = self
                        .client
                        .post(format!(
                            "{}/repos/{repository}/issues/{number}/assignees",
                            self.base_url
                        ))
                        .bearer_auth(&self.token)
                        .header("user-agent", USER_AGENT)
                        .json(&json!({ "assignees": [login] }))
                        .send()
                        .await;
                    if let Err(e) = result {
                        tracing::warn!(pr = number, error = %e, "failed to self-assign");
                    }
                }
                None => tracing::warn!(pr = number, "could not resolve login for self-assign"),
            }
        }
    }

    async fn authenticated_login(&self) -> Option<String> {
        let resp = self
            .client
            .get(format!("{}/user", self.base_url))
            .bearer_auth(&self.token)
            .header("user-agent", USER_AGENT)
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let v: serde_json::Value = resp.json().await.ok()?;
        v["login"].as_str().map(String::from)
    }
}

fn build_pr_body(body: &str, task_id: &str, options: &PullRequestOptions) -> String {
    let mut out = body.to_string();
    if options.link_to_task {
        if let Some(ref url) = options.task_url {
            out.push_str(&format!("\n\n---\nResolves task [{task_id}]({url})"));
        } else {
            out.push_str(&format!("\n\n---\nResolves task {task_id}"));
        }
    }
    out
}

fn parse_pull_request(v: &serde_json::Value) -> PullRequest {
    PullRequest {
        number: v["number"].as_u64().unwrap_or(0),
        html_url: v["html_url"].as_str().unwrap_or_default().to_string(),
        title: v["title"].as_str().unwrap_or_default().to_string(),
    }
}

fn map_error(status: reqwest::StatusCode, body: &str) -> PilotError {
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return PilotError::Auth {
            service: "code host".into(),
        };
    }
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string());
    PilotError::CodeHost {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl CodeHostClient for HttpCodeHost {
    async fn validate_connection(&self) -> Result<bool> {
        let resp = self
            .client
            .get(format!("{}/user", self.base_url))
            .bearer_auth(&self.token)
            .header("user-agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| PilotError::CodeHost {
                status: 0,
                message: e.to_string(),
            })?;
        Ok(resp.status().is_success())
    }

    async fn create_task_pull_request(
        &self,
        task_id: &str,
        title: &str,
        body: &str,
        branch: &str,
        options: &PullRequestOptions,
    ) -> Result<PullRequest> {
        let payload = json!({
            "title": title,
            "body": build_pr_body(body, task_id, options),
            "head": branch,
            "base": options.base_branch,
        });

        let resp = self
            .client
            .post(format!("{}/repos/{}/pulls", self.base_url, options.repository))
            .bearer_auth(&self.token)
            .header("user-agent", USER_AGENT)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PilotError::CodeHost {
                status: 0,
                message: e.to_string(),
            })?;

        let status = resp.status();
        let response_body = resp.text().await.map_err(|e| PilotError::CodeHost {
            status: 0,
            message: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(map_error(status, &response_body));
        }

        let v: serde_json::Value = serde_json::from_str(&response_body)?;
        let pr = parse_pull_request(&v);
        tracing::info!(pr = pr.number, url = %pr.html_url, "opened pull request");

        self.apply_extras(&options.repository, pr.number, options).await;
        Ok(pr)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
