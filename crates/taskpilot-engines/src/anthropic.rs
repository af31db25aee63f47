//! Anthropic-backed code-generation engine.
//!
//! Talks to the Messages API over HTTP, shapes the prompt for code output,
//! and extracts fenced code plus the surrounding explanation from the reply.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use taskpilot_types::{PilotError, Result};

use crate::{
    EngineClient, GenerationRequest, GenerationResponse, ResponseMetadata, UsageStats,
};

const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
const INPUT_PRICE_PER_MTOK: f64 = 3.0;
const OUTPUT_PRICE_PER_MTOK: f64 = 15.0;

// ---------------------------------------------------------------------------
// AnthropicEngine
// ---------------------------------------------------------------------------

pub struct AnthropicEngine {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    requests: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

impl AnthropicEngine {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.anthropic.com".to_string(),
            model: DEFAULT_MODEL.to_string(),
            requests: AtomicU64::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    pub fn from_env() -> Result<Self> {
        let key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| PilotError::Auth {
            service: "anthropic".into(),
        })?;
        Ok(Self::new(key))
    }
}

// ---------------------------------------------------------------------------
// Request translation
// ---------------------------------------------------------------------------

fn build_request_body(request: &GenerationRequest, model: &str) -> serde_json::Value {
    let mut system = String::from(
        "You are a code generation engine. Produce complete, working code for \
         the task. Put every file in a fenced code block and keep prose outside \
         the fences brief.",
    );
    if let Some(ref language) = request.language {
        system.push_str(&format!(" Write the code in {language}."));
    }

    let mut user = request.prompt.clone();
    if let Some(ref context) = request.context {
        user.push_str("\n\nContext:\n");
        user.push_str(context);
    }

    let mut body = json!({
        "model": model,
        "max_tokens": request.max_tokens.unwrap_or(4096),
        "system": system,
        "messages": [{ "role": "user", "content": user }],
    });

    if let Some(temp) = request.temperature {
        body["temperature"] = json!(temp);
    }

    body
}

// ---------------------------------------------------------------------------
// Response translation
// ---------------------------------------------------------------------------

/// Split a completion into fenced code and the surrounding explanation.
///
/// Replies with no fences are treated as all code.
fn extract_code(text: &str) -> (String, Option<String>) {
    if !text.contains("```") {
        return (text.trim().to_string(), None);
    }

    let mut code_parts: Vec<String> = Vec::new();
    let mut prose_parts: Vec<String> = Vec::new();
    let mut in_fence = false;

    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            code_parts.push(line.to_string());
        } else if !line.trim().is_empty() {
            prose_parts.push(line.to_string());
        }
    }

    let code = code_parts.join("\n");
    let explanation = if prose_parts.is_empty() {
        None
    } else {
        Some(prose_parts.join("\n"))
    };
    (code, explanation)
}

fn map_error(status: reqwest::StatusCode, body: &str, request_id: &Uuid) -> PilotError {
    let status_u16 = status.as_u16();
    match status_u16 {
        429 => {
            let retry_ms = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v["error"]["retry_after"].as_f64())
                .map(|s| (s * 1000.0) as u64)
                .unwrap_or(1000);
            PilotError::RateLimited {
                engine: "anthropic".into(),
                retry_after_ms: retry_ms,
            }
        }
        401 | 403 => PilotError::Auth {
            service: "anthropic".into(),
        },
        500 | 529 => PilotError::Engine {
            engine: "anthropic".into(),
            message: format!("request {request_id}: {}", extract_error_message(body)),
            retryable: true,
        },
        _ => PilotError::Engine {
            engine: "anthropic".into(),
            message: format!(
                "request {request_id}: HTTP {status_u16}: {}",
                extract_error_message(body)
            ),
            retryable: false,
        },
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

// ---------------------------------------------------------------------------
// EngineClient implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl EngineClient for AnthropicEngine {
    fn id(&self) -> &str {
        "anthropic"
    }

    async fn validate_connection(&self) -> Result<bool> {
        let resp = self
            .client
            .get(format!("{}/v1/models?limit=1", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .send()
            .await
            .map_err(|e| PilotError::Engine {
                engine: "anthropic".into(),
                message: e.to_string(),
                retryable: true,
            })?;
        Ok(resp.status().is_success())
    }

    async fn generate_code(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        let request_id = Uuid::new_v4();
        let body = build_request_body(request, &self.model);
        let started = std::time::Instant::now();

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| PilotError::Engine {
                engine: "anthropic".into(),
                message: format!("request {request_id}: {e}"),
                retryable: true,
            })?;

        let status = resp.status();
        let response_body = resp.text().await.map_err(|e| PilotError::Engine {
            engine: "anthropic".into(),
            message: format!("request {request_id}: {e}"),
            retryable: true,
        })?;

        if !status.is_success() {
            return Err(map_error(status, &response_body, &request_id));
        }

        let parsed: serde_json::Value =
            serde_json::from_str(&response_body).map_err(|e| PilotError::Engine {
                engine: "anthropic".into(),
                message: format!("request {request_id}: malformed response JSON: {e}"),
                retryable: false,
            })?;

        let text: String = parsed["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        let (code, explanation) = extract_code(&text);

        let input_tokens = parsed["usage"]["input_tokens"].as_u64().unwrap_or(0);
        let output_tokens = parsed["usage"]["output_tokens"].as_u64().unwrap_or(0);
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.input_tokens.fetch_add(input_tokens, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(output_tokens, Ordering::Relaxed);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let mut metadata = ResponseMetadata::new(
            parsed["id"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| request_id.to_string()),
            elapsed_ms,
        );
        metadata.tokens_used = Some(input_tokens + output_tokens);
        metadata.cost_usd = Some(
            input_tokens as f64 / 1_000_000.0 * INPUT_PRICE_PER_MTOK
                + output_tokens as f64 / 1_000_000.0 * OUTPUT_PRICE_PER_MTOK,
        );

        Ok(GenerationResponse {
            code,
            explanation,
            suggestions: Vec::new(),
            metadata,
        })
    }

    async fn usage_stats(&self) -> Result<UsageStats> {
        let input = self.input_tokens.load(Ordering::Relaxed);
        let output = self.output_tokens.load(Ordering::Relaxed);
        Ok(UsageStats {
            requests: self.requests.load(Ordering::Relaxed),
            input_tokens: input,
            output_tokens: output,
            cost_usd: input as f64 / 1_000_000.0 * INPUT_PRICE_PER_MTOK
                + output as f64 / 1_000_000.0 * OUTPUT_PRICE_PER_MTOK,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
