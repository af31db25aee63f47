//! Engine capability contract, dynamic dispatch wrapper, and registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use taskpilot_types::Result;

use crate::{GenerationRequest, GenerationResponse, UsageStats};

// ---------------------------------------------------------------------------
// EngineClient trait
// ---------------------------------------------------------------------------

/// Capability contract implemented per code-generation backend.
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Stable identifier (e.g. "anthropic").
    fn id(&self) -> &str;

    /// Cheap liveness/credentials probe. `Ok(true)` means the engine is
    /// reachable and authenticated.
    async fn validate_connection(&self) -> Result<bool>;

    /// Run one generation request to completion.
    async fn generate_code(&self, request: &GenerationRequest) -> Result<GenerationResponse>;

    /// Cumulative usage since this client was constructed.
    async fn usage_stats(&self) -> Result<UsageStats>;
}

// ---------------------------------------------------------------------------
// DynEngine — object-safe wrapper
// ---------------------------------------------------------------------------

pub struct DynEngine(Box<dyn EngineClient>);

impl DynEngine {
    pub fn new(engine: impl EngineClient + 'static) -> Self {
        Self(Box::new(engine))
    }

    pub fn id(&self) -> &str {
        self.0.id()
    }

    pub async fn validate_connection(&self) -> Result<bool> {
        self.0.validate_connection().await
    }

    pub async fn generate_code(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        self.0.generate_code(request).await
    }

    pub async fn usage_stats(&self) -> Result<UsageStats> {
        self.0.usage_stats().await
    }
}

// ---------------------------------------------------------------------------
// EngineRegistry
// ---------------------------------------------------------------------------

/// Owns one client instance per known engine, keyed by engine id.
///
/// The registry is populated once at startup and shared read-only between
/// the selector and the fallback executor.
#[derive(Default)]
pub struct EngineRegistry {
    engines: HashMap<String, Arc<DynEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, engine: impl EngineClient + 'static) {
        let id = engine.id().to_string();
        self.engines.insert(id, Arc::new(DynEngine::new(engine)));
    }

    pub fn get(&self, engine_id: &str) -> Option<Arc<DynEngine>> {
        self.engines.get(engine_id).cloned()
    }

    pub fn has(&self, engine_id: &str) -> bool {
        self.engines.contains_key(engine_id)
    }

    /// Registered engine ids in stable (sorted) order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.engines.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
