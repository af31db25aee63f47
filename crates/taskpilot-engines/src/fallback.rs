//! Retry/fallback execution of generation requests.
//!
//! Runs a request against an ordered candidate list: up to
//! `policy.max_retries` attempts for the primary engine, exactly one for
//! every fallback. Each attempt races the engine call against a timeout;
//! the losing future is dropped, so a timed-out attempt's underlying work
//! is aborted. Every outcome is fed back into the selector's reputation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use taskpilot_types::{FallbackAttempt, PilotError, Result};

use crate::{EngineRegistry, EngineSelector, GenerationRequest, GenerationResponse};

// ---------------------------------------------------------------------------
// FallbackPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    /// Attempt budget for the primary engine. Fallbacks always get one.
    pub max_retries: u32,
    /// Per-attempt deadline.
    pub timeout_ms: u64,
    /// Pause between consecutive attempts.
    pub retry_delay_ms: u64,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout_ms: 120_000,
            retry_delay_ms: 1_000,
        }
    }
}

// ---------------------------------------------------------------------------
// FallbackExecutor
// ---------------------------------------------------------------------------

pub struct FallbackExecutor {
    registry: Arc<EngineRegistry>,
    selector: Arc<EngineSelector>,
    policy: FallbackPolicy,
}

/// Outcome of one engine's smoke test during a health check.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub engine_id: String,
    pub healthy: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

const SMOKE_TIMEOUT_MS: u64 = 10_000;

impl FallbackExecutor {
    pub fn new(
        registry: Arc<EngineRegistry>,
        selector: Arc<EngineSelector>,
        policy: FallbackPolicy,
    ) -> Self {
        Self {
            registry,
            selector,
            policy,
        }
    }

    /// Run `request` against `primary` then `fallbacks` until one attempt
    /// succeeds or every candidate is exhausted.
    ///
    /// The winning response carries the full attempts log in its metadata.
    /// Exhaustion raises [`PilotError::AllEnginesFailed`] with the same log.
    pub async fn execute_with_fallback(
        &self,
        request: &GenerationRequest,
        primary: &str,
        fallbacks: &[String],
    ) -> Result<GenerationResponse> {
        let candidates = dedupe_candidates(primary, fallbacks);
        let mut attempts: Vec<FallbackAttempt> = Vec::new();

        for (index, engine_id) in candidates.iter().enumerate() {
            let budget = if index == 0 {
                self.policy.max_retries.max(1)
            } else {
                1
            };

            for attempt_number in 1..=budget {
                let last_overall =
                    index == candidates.len() - 1 && attempt_number == budget;
                let started = Instant::now();
                let outcome = self.attempt(engine_id, request).await;
                let elapsed_ms = started.elapsed().as_millis() as u64;

                match outcome {
                    Ok(mut response) => {
                        self.selector.report_success(engine_id).await;
                        attempts.push(FallbackAttempt::succeeded(
                            engine_id.as_str(),
                            attempt_number,
                            elapsed_ms,
                        ));
                        tracing::info!(
                            engine = %engine_id,
                            attempt = attempt_number,
                            attempts_total = attempts.len(),
                            response_ms = elapsed_ms,
                            "generation succeeded"
                        );
                        response.metadata.attempts = attempts;
                        return Ok(response);
                    }
                    Err(err) => {
                        self.selector.report_error(engine_id, &err).await;
                        attempts.push(FallbackAttempt::failed(
                            engine_id.as_str(),
                            attempt_number,
                            elapsed_ms,
                            err.to_string(),
                        ));
                        tracing::warn!(
                            engine = %engine_id,
                            attempt = attempt_number,
                            error = %err,
                            "generation attempt failed"
                        );
                        if !last_overall && self.policy.retry_delay_ms > 0 {
                            tokio::time::sleep(Duration::from_millis(
                                self.policy.retry_delay_ms,
                            ))
                            .await;
                        }
                    }
                }
            }
        }

        Err(PilotError::AllEnginesFailed {
            primary: primary.to_string(),
            attempts,
        })
    }

    /// Smoke-test every currently-available engine, one at a time, and feed
    /// pass/fail back into the selector's reputation.
    pub async fn health_check(&self) -> Vec<HealthCheckResult> {
        let mut results = Vec::new();

        for status in self.selector.statuses().await {
            if !status.available {
                continue;
            }
            let engine_id = status.engine_id;
            let Some(engine) = self.registry.get(&engine_id) else {
                continue;
            };

            let request = GenerationRequest::smoke_test();
            let started = Instant::now();
            let outcome = tokio::time::timeout(
                Duration::from_millis(SMOKE_TIMEOUT_MS),
                engine.generate_code(&request),
            )
            .await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let result = match outcome {
                Ok(Ok(_)) => {
                    self.selector.report_success(&engine_id).await;
                    HealthCheckResult {
                        engine_id: engine_id.clone(),
                        healthy: true,
                        response_time_ms: elapsed_ms,
                        error: None,
                    }
                }
                Ok(Err(err)) => {
                    self.selector.report_error(&engine_id, &err).await;
                    HealthCheckResult {
                        engine_id: engine_id.clone(),
                        healthy: false,
                        response_time_ms: elapsed_ms,
                        error: Some(err.to_string()),
                    }
                }
                Err(_) => {
                    let err = PilotError::AttemptTimeout {
                        engine: engine_id.clone(),
                        timeout_ms: SMOKE_TIMEOUT_MS,
                    };
                    self.selector.report_error(&engine_id, &err).await;
                    HealthCheckResult {
                        engine_id: engine_id.clone(),
                        healthy: false,
                        response_time_ms: elapsed_ms,
                        error: Some(err.to_string()),
                    }
                }
            };
            tracing::info!(
                engine = %result.engine_id,
                healthy = result.healthy,
                response_ms = result.response_time_ms,
                "health check probe"
            );
            results.push(result);
        }

        results
    }

    async fn attempt(
        &self,
        engine_id: &str,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse> {
        let engine = self.registry.get(engine_id).ok_or_else(|| PilotError::Engine {
            engine: engine_id.to_string(),
            message: "engine is not registered".into(),
            retryable: false,
        })?;

        match tokio::time::timeout(
            Duration::from_millis(self.policy.timeout_ms),
            engine.generate_code(request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PilotError::AttemptTimeout {
                engine: engine_id.to_string(),
                timeout_ms: self.policy.timeout_ms,
            }),
        }
    }
}

/// `[primary] + fallbacks` with duplicates removed, order preserved.
fn dedupe_candidates(primary: &str, fallbacks: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for id in std::iter::once(primary).chain(fallbacks.iter().map(String::as_str)) {
        if seen.insert(id.to_string()) {
            out.push(id.to_string());
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        EngineClient, GenerationResponse, ResponseMetadata, SelectionCriteria, UsageStats,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Succeed,
        Fail,
        /// Succeed starting from the nth call (1-indexed).
        SucceedAfter(usize),
        Hang,
    }

    struct ScriptedEngine {
        id: &'static str,
        behavior: Behavior,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedEngine {
        fn new(id: &'static str, behavior: Behavior) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    id,
                    behavior,
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    fn ok_response(code: &str) -> GenerationResponse {
        GenerationResponse {
            code: code.into(),
            explanation: None,
            suggestions: vec![],
            metadata: ResponseMetadata::new("scripted", 1),
        }
    }

    #[async_trait]
    impl EngineClient for ScriptedEngine {
        fn id(&self) -> &str {
            self.id
        }

        async fn validate_connection(&self) -> taskpilot_types::Result<bool> {
            Ok(true)
        }

        async fn generate_code(
            &self,
            _request: &GenerationRequest,
        ) -> taskpilot_types::Result<GenerationResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.behavior {
                Behavior::Succeed => Ok(ok_response(&format!("// {}", self.id))),
                Behavior::Fail => Err(PilotError::Engine {
                    engine: self.id.to_string(),
                    message: "scripted failure".into(),
                    retryable: true,
                }),
                Behavior::SucceedAfter(n) => {
                    if call >= n {
                        Ok(ok_response(&format!("// {}", self.id)))
                    } else {
                        Err(PilotError::Engine {
                            engine: self.id.to_string(),
                            message: "not yet".into(),
                            retryable: true,
                        })
                    }
                }
                Behavior::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }

        async fn usage_stats(&self) -> taskpilot_types::Result<UsageStats> {
            Ok(UsageStats::default())
        }
    }

    fn executor_for(
        engines: Vec<ScriptedEngine>,
        policy: FallbackPolicy,
    ) -> (FallbackExecutor, Arc<EngineSelector>) {
        let mut registry = EngineRegistry::new();
        for engine in engines {
            registry.register(engine);
        }
        let registry = Arc::new(registry);
        let selector = Arc::new(EngineSelector::new(
            registry.clone(),
            SelectionCriteria::default(),
        ));
        (
            FallbackExecutor::new(registry, selector.clone(), policy),
            selector,
        )
    }

    fn fast_policy(max_retries: u32, timeout_ms: u64) -> FallbackPolicy {
        FallbackPolicy {
            max_retries,
            timeout_ms,
            retry_delay_ms: 0,
        }
    }

    // 1. Primary succeeds on first attempt: short-circuit, one log entry
    #[tokio::test]
    async fn primary_success_short_circuits() {
        let (primary, _) = ScriptedEngine::new("primary", Behavior::Succeed);
        let (fallback, fallback_calls) = ScriptedEngine::new("backup", Behavior::Succeed);
        let (executor, _) = executor_for(vec![primary, fallback], fast_policy(3, 1_000));

        let response = executor
            .execute_with_fallback(
                &GenerationRequest::new("do it"),
                "primary",
                &["backup".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(response.code, "// primary");
        assert_eq!(response.metadata.attempts.len(), 1);
        assert!(response.metadata.attempts[0].success);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    }

    // 2. Failing primary with three retries, fallback succeeds: 4 attempts
    #[tokio::test]
    async fn exhausted_primary_falls_back() {
        let (primary, primary_calls) = ScriptedEngine::new("primary", Behavior::Fail);
        let (fallback, _) = ScriptedEngine::new("backup", Behavior::Succeed);
        let (executor, _) = executor_for(vec![primary, fallback], fast_policy(3, 1_000));

        let response = executor
            .execute_with_fallback(
                &GenerationRequest::new("do it"),
                "primary",
                &["backup".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(response.code, "// backup");
        assert_eq!(primary_calls.load(Ordering::SeqCst), 3);

        let attempts = &response.metadata.attempts;
        assert_eq!(attempts.len(), 4, "3 failed + 1 success");
        assert!(attempts[..3].iter().all(|a| !a.success));
        assert!(attempts[3].success);
        assert_eq!(attempts[3].engine_id, "backup");
        assert_eq!(attempts[3].attempt_number, 1);
    }

    // 3. Primary recovers within its retry budget
    #[tokio::test]
    async fn primary_recovers_mid_budget() {
        let (primary, calls) = ScriptedEngine::new("primary", Behavior::SucceedAfter(2));
        let (executor, _) = executor_for(vec![primary], fast_policy(3, 1_000));

        let response = executor
            .execute_with_fallback(&GenerationRequest::new("do it"), "primary", &[])
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(response.metadata.attempts.len(), 2);
        assert_eq!(response.metadata.attempts[1].attempt_number, 2);
    }

    // 4. Exhaustion raises AllEnginesFailed carrying the full log
    #[tokio::test]
    async fn exhaustion_raises_terminal_error() {
        let (primary, _) = ScriptedEngine::new("primary", Behavior::Fail);
        let (fallback, _) = ScriptedEngine::new("backup", Behavior::Fail);
        let (executor, _) = executor_for(vec![primary, fallback], fast_policy(2, 1_000));

        let err = executor
            .execute_with_fallback(
                &GenerationRequest::new("do it"),
                "primary",
                &["backup".to_string()],
            )
            .await
            .unwrap_err();

        match err {
            PilotError::AllEnginesFailed { primary, attempts } => {
                assert_eq!(primary, "primary");
                assert_eq!(attempts.len(), 3, "2 primary + 1 fallback");
                assert!(attempts.iter().all(|a| !a.success));
            }
            other => panic!("expected AllEnginesFailed, got: {other:?}"),
        }
    }

    // 5. A hanging attempt is recorded as a timeout and execution proceeds
    #[tokio::test]
    async fn timeout_is_recorded_and_execution_proceeds() {
        let (primary, _) = ScriptedEngine::new("primary", Behavior::Hang);
        let (fallback, _) = ScriptedEngine::new("backup", Behavior::Succeed);
        let (executor, _) = executor_for(vec![primary, fallback], fast_policy(1, 50));

        let response = executor
            .execute_with_fallback(
                &GenerationRequest::new("do it"),
                "primary",
                &["backup".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(response.code, "// backup");
        let attempts = &response.metadata.attempts;
        assert_eq!(attempts.len(), 2);
        assert!(!attempts[0].success);
        assert!(attempts[0]
            .error
            .as_deref()
            .unwrap()
            .contains("timed out after 50ms"));
    }

    // 6. Candidate list is deduplicated, primary first
    #[test]
    fn candidates_are_deduplicated_in_order() {
        let fallbacks = vec![
            "backup".to_string(),
            "primary".to_string(),
            "backup".to_string(),
            "third".to_string(),
        ];
        assert_eq!(
            dedupe_candidates("primary", &fallbacks),
            vec!["primary", "backup", "third"]
        );
    }

    // 7. Outcomes feed the selector's reputation
    #[tokio::test]
    async fn attempts_update_reputation() {
        let (primary, _) = ScriptedEngine::new("primary", Behavior::Fail);
        let (fallback, _) = ScriptedEngine::new("backup", Behavior::Succeed);
        let (executor, selector) = executor_for(vec![primary, fallback], fast_policy(2, 1_000));

        executor
            .execute_with_fallback(
                &GenerationRequest::new("do it"),
                "primary",
                &["backup".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(selector.status("primary").await.unwrap().error_count, 2);
        assert!(selector.status("backup").await.unwrap().last_used.is_some());
    }

    // 8. An unregistered candidate fails its attempt but does not abort the run
    #[tokio::test]
    async fn unregistered_engine_counts_as_failed_attempt() {
        let (fallback, _) = ScriptedEngine::new("backup", Behavior::Succeed);
        let (executor, _) = executor_for(vec![fallback], fast_policy(1, 1_000));

        let response = executor
            .execute_with_fallback(
                &GenerationRequest::new("do it"),
                "ghost",
                &["backup".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(response.code, "// backup");
        assert!(!response.metadata.attempts[0].success);
        assert!(response.metadata.attempts[0]
            .error
            .as_deref()
            .unwrap()
            .contains("not registered"));
    }

    // 9. Health check records pass/fail and feeds reputation
    #[tokio::test]
    async fn health_check_updates_reputation() {
        let (healthy, _) = ScriptedEngine::new("healthy", Behavior::Succeed);
        let (sick, _) = ScriptedEngine::new("sick", Behavior::Fail);
        let (executor, selector) = executor_for(vec![healthy, sick], fast_policy(1, 1_000));

        let results = executor.health_check().await;

        assert_eq!(results.len(), 2);
        let healthy_result = results.iter().find(|r| r.engine_id == "healthy").unwrap();
        let sick_result = results.iter().find(|r| r.engine_id == "sick").unwrap();
        assert!(healthy_result.healthy);
        assert!(healthy_result.error.is_none());
        assert!(!sick_result.healthy);
        assert!(sick_result.error.is_some());

        assert_eq!(selector.status("sick").await.unwrap().error_count, 1);
        assert!(selector.status("healthy").await.unwrap().last_used.is_some());
    }

    // 10. Health check skips engines already marked unavailable
    #[tokio::test]
    async fn health_check_skips_unavailable_engines() {
        let (sick, sick_calls) = ScriptedEngine::new("sick", Behavior::Fail);
        let (executor, selector) = executor_for(vec![sick], fast_policy(1, 1_000));

        for _ in 0..5 {
            selector
                .report_error(
                    "sick",
                    &PilotError::Engine {
                        engine: "sick".into(),
                        message: "down".into(),
                        retryable: true,
                    },
                )
                .await;
        }

        let results = executor.health_check().await;
        assert!(results.is_empty());
        assert_eq!(sick_calls.load(Ordering::SeqCst), 0);
    }
}
