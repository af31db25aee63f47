//! Code-generation engine contract, reputation-based selection, and the
//! retry/fallback executor.
//!
//! This crate implements the adaptive half of the taskpilot core: the
//! `EngineClient` capability contract with its registry, the reputation
//! tracker that scores and picks among backends, and the executor that runs
//! a generation request across an ordered candidate list under per-attempt
//! timeouts.

pub mod anthropic;
pub mod engine;
pub mod fallback;
pub mod selector;
pub mod types;

pub use anthropic::AnthropicEngine;
pub use engine::{DynEngine, EngineClient, EngineRegistry};
pub use fallback::{FallbackExecutor, FallbackPolicy, HealthCheckResult};
pub use selector::{EngineSelector, SelectionCriteria, ERROR_DISABLE_THRESHOLD};
pub use types::{GenerationRequest, GenerationResponse, ResponseMetadata, UsageStats};
