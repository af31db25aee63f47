//! Task tracker contract and REST client.

use async_trait::async_trait;

use taskpilot_types::{Complexity, PilotError, Result, Task, TaskAnalysis, TaskPatch};

// ---------------------------------------------------------------------------
// TaskSource trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn validate_connection(&self) -> Result<bool>;

    async fn get_task(&self, project_id: &str, task_id: &str) -> Result<Task>;

    async fn analyze_task(&self, project_id: &str, task_id: &str) -> Result<TaskAnalysis>;

    async fn update_task(&self, project_id: &str, task_id: &str, patch: &TaskPatch)
        -> Result<()>;
}

// ---------------------------------------------------------------------------
// HttpTaskTracker
// ---------------------------------------------------------------------------

pub struct HttpTaskTracker {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpTaskTracker {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("TASKPILOT_TRACKER_URL").map_err(|_| {
            PilotError::Other("TASKPILOT_TRACKER_URL is not set".into())
        })?;
        let token = std::env::var("TASKPILOT_TRACKER_TOKEN").map_err(|_| PilotError::Auth {
            service: "tracker".into(),
        })?;
        Ok(Self::new(base_url, token))
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| PilotError::Tracker {
                status: 0,
                message: e.to_string(),
            })?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| PilotError::Tracker {
            status: 0,
            message: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(map_error(status, &body));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

fn map_error(status: reqwest::StatusCode, body: &str) -> PilotError {
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return PilotError::Auth {
            service: "tracker".into(),
        };
    }
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string());
    PilotError::Tracker {
        status: status.as_u16(),
        message,
    }
}

fn parse_task(v: &serde_json::Value) -> Task {
    Task {
        id: v["id"].as_str().unwrap_or_default().to_string(),
        subject: v["subject"].as_str().unwrap_or_default().to_string(),
        body: v["body"].as_str().unwrap_or_default().to_string(),
        status: v["status"].as_str().unwrap_or("open").to_string(),
    }
}

fn parse_analysis(v: &serde_json::Value) -> TaskAnalysis {
    let strings = |key: &str| -> Vec<String> {
        v[key]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|s| s.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    };
    TaskAnalysis {
        requirements: strings("requirements"),
        technical_specs: strings("technical_specs"),
        acceptance_criteria: strings("acceptance_criteria"),
        suggested_approach: v["suggested_approach"].as_str().unwrap_or_default().to_string(),
        estimated_complexity: match v["estimated_complexity"].as_str() {
            Some("low") => Complexity::Low,
            Some("high") => Complexity::High,
            _ => Complexity::Medium,
        },
        recommended_language: v["recommended_language"].as_str().map(String::from),
        recommended_framework: v["recommended_framework"].as_str().map(String::from),
    }
}

#[async_trait]
impl TaskSource for HttpTaskTracker {
    async fn validate_connection(&self) -> Result<bool> {
        let resp = self
            .client
            .get(format!("{}/ping", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| PilotError::Tracker {
                status: 0,
                message: e.to_string(),
            })?;
        Ok(resp.status().is_success())
    }

    async fn get_task(&self, project_id: &str, task_id: &str) -> Result<Task> {
        let v = self
            .get_json(&format!("/projects/{project_id}/tasks/{task_id}"))
            .await?;
        tracing::debug!(project = %project_id, task = %task_id, "fetched task");
        Ok(parse_task(&v))
    }

    async fn analyze_task(&self, project_id: &str, task_id: &str) -> Result<TaskAnalysis> {
        let v = self
            .get_json(&format!("/projects/{project_id}/tasks/{task_id}/analysis"))
            .await?;
        Ok(parse_analysis(&v))
    }

    async fn update_task(
        &self,
        project_id: &str,
        task_id: &str,
        patch: &TaskPatch,
    ) -> Result<()> {
        let resp = self
            .client
            .patch(format!(
                "{}/projects/{project_id}/tasks/{task_id}",
                self.base_url
            ))
            .bearer_auth(&self.token)
            .json(patch)
            .send()
            .await
            .map_err(|e| PilotError::Tracker {
                status: 0,
                message: e.to_string(),
            })?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_error(status, &body));
        }
        tracing::debug!(project = %project_id, task = %task_id, "updated task");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
