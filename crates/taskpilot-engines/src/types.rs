use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taskpilot_types::FallbackAttempt;

// ---------------------------------------------------------------------------
// GenerationRequest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub language: Option<String>,
    pub context: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            language: None,
            context: None,
            max_tokens: None,
            temperature: None,
        }
    }

    /// Minimal request used by the executor's health check.
    pub fn smoke_test() -> Self {
        Self {
            prompt: "Reply with the single word OK.".into(),
            language: None,
            context: None,
            max_tokens: Some(16),
            temperature: Some(0.0),
        }
    }
}

// ---------------------------------------------------------------------------
// GenerationResponse
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: u64,
    pub tokens_used: Option<u64>,
    pub cost_usd: Option<f64>,
    /// Filled in by the fallback executor: the full attempts log that led to
    /// this response.
    #[serde(default)]
    pub attempts: Vec<FallbackAttempt>,
}

impl ResponseMetadata {
    pub fn new(request_id: impl Into<String>, response_time_ms: u64) -> Self {
        Self {
            request_id: request_id.into(),
            timestamp: Utc::now(),
            response_time_ms,
            tokens_used: None,
            cost_usd: None,
            attempts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub code: String,
    pub explanation: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    pub metadata: ResponseMetadata,
}

// ---------------------------------------------------------------------------
// UsageStats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
