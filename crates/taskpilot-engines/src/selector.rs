//! Reputation-based engine selection.
//!
//! The selector owns one [`EngineStatus`] record per registered engine,
//! refreshes them with sequential liveness probes, and scores the survivors
//! to pick the best candidate. Success/error feedback from the fallback
//! executor flows back in through [`report_success`](EngineSelector::report_success)
//! and [`report_error`](EngineSelector::report_error).

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use taskpilot_types::{EngineStatus, PilotError, Result};

use crate::EngineRegistry;

/// An engine accumulating this many errors is taken out of rotation until
/// successes bring the count back to zero.
pub const ERROR_DISABLE_THRESHOLD: u32 = 5;

// ---------------------------------------------------------------------------
// SelectionCriteria
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SelectionCriteria {
    pub prioritize_availability: bool,
    pub prioritize_performance: bool,
    pub prioritize_cost: bool,
    pub preferred_engine: Option<String>,
    /// Last-resort engine returned when no candidate is available and
    /// authenticated.
    pub default_engine: String,
}

impl Default for SelectionCriteria {
    fn default() -> Self {
        Self {
            prioritize_availability: true,
            prioritize_performance: true,
            prioritize_cost: false,
            preferred_engine: None,
            default_engine: "anthropic".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// EngineSelector
// ---------------------------------------------------------------------------

pub struct EngineSelector {
    registry: Arc<EngineRegistry>,
    criteria: SelectionCriteria,
    // One mutex serializes all reputation updates; probes and reports are
    // sequential so each decision sees the previous update.
    statuses: Mutex<BTreeMap<String, EngineStatus>>,
}

impl EngineSelector {
    /// Create a selector with one status record per registered engine.
    pub fn new(registry: Arc<EngineRegistry>, criteria: SelectionCriteria) -> Self {
        let statuses = registry
            .ids()
            .into_iter()
            .map(|id| (id.clone(), EngineStatus::new(id)))
            .collect();
        Self {
            registry,
            criteria,
            statuses: Mutex::new(statuses),
        }
    }

    /// Override the static performance/cost profile for one engine.
    pub async fn set_profile(&self, engine_id: &str, performance_score: f64, cost_score: f64) {
        let mut statuses = self.statuses.lock().await;
        if let Some(status) = statuses.get_mut(engine_id) {
            status.performance_score = performance_score.clamp(0.0, 100.0);
            status.cost_score = cost_score.clamp(0.0, 100.0);
        }
    }

    /// Probe every registered engine, refresh the registry, and return the
    /// id of the best available, authenticated engine.
    ///
    /// When nothing survives the filter, the configured default engine is
    /// returned as an explicit last resort and a warning is logged.
    pub async fn select_best(&self) -> Result<String> {
        self.refresh().await;

        let statuses = self.statuses.lock().await;
        let mut candidates: Vec<&EngineStatus> = statuses
            .values()
            .filter(|s| s.available && s.authenticated)
            .collect();
        candidates.sort_by(|a, b| {
            self.score(b)
                .partial_cmp(&self.score(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        match candidates.first() {
            Some(best) => {
                tracing::debug!(
                    engine = %best.engine_id,
                    score = self.score(best),
                    "selected engine"
                );
                Ok(best.engine_id.clone())
            }
            None => {
                tracing::warn!(
                    default = %self.criteria.default_engine,
                    "no engine is available and authenticated, falling back to default"
                );
                Ok(self.criteria.default_engine.clone())
            }
        }
    }

    /// Status of a single engine.
    pub async fn status(&self, engine_id: &str) -> Option<EngineStatus> {
        self.statuses.lock().await.get(engine_id).cloned()
    }

    /// Statuses of all known engines, in stable id order.
    pub async fn statuses(&self) -> Vec<EngineStatus> {
        self.statuses.lock().await.values().cloned().collect()
    }

    /// Record a successful use: bump `last_used`, pay down one error, and
    /// re-enable the engine once the error count returns to zero.
    pub async fn report_success(&self, engine_id: &str) {
        let mut statuses = self.statuses.lock().await;
        let Some(status) = statuses.get_mut(engine_id) else {
            return;
        };
        status.last_used = Some(Utc::now());
        status.error_count = status.error_count.saturating_sub(1);
        if status.error_count == 0 {
            status.available = true;
        }
        tracing::debug!(
            engine = %engine_id,
            error_count = status.error_count,
            "engine success reported"
        );
    }

    /// Record a failed use: one more error, and disable the engine once the
    /// count reaches the threshold.
    pub async fn report_error(&self, engine_id: &str, err: &PilotError) {
        let mut statuses = self.statuses.lock().await;
        let Some(status) = statuses.get_mut(engine_id) else {
            return;
        };
        status.error_count += 1;
        if status.error_count >= ERROR_DISABLE_THRESHOLD {
            status.available = false;
        }
        tracing::warn!(
            engine = %engine_id,
            error_count = status.error_count,
            available = status.available,
            error = %err,
            "engine error reported"
        );
    }

    // Probe engines one at a time so reputation changes from one probe are
    // visible to the next within the same selection cycle.
    async fn refresh(&self) {
        for id in self.registry.ids() {
            let Some(engine) = self.registry.get(&id) else {
                continue;
            };
            let probe = engine.validate_connection().await;
            let mut statuses = self.statuses.lock().await;
            let Some(status) = statuses.get_mut(&id) else {
                continue;
            };
            match probe {
                Ok(ok) => {
                    status.authenticated = ok;
                    // A live probe never re-arms a tripped breaker.
                    status.available = ok && status.error_count < ERROR_DISABLE_THRESHOLD;
                }
                Err(err) => {
                    tracing::debug!(engine = %id, error = %err, "engine probe failed");
                    status.authenticated = false;
                    status.available = false;
                }
            }
        }
    }

    fn score(&self, status: &EngineStatus) -> f64 {
        let mut score = 0.0;
        if status.available {
            score += if self.criteria.prioritize_availability {
                40.0
            } else {
                20.0
            };
        }
        if status.authenticated {
            score += 20.0;
        }
        let perf_weight = if self.criteria.prioritize_performance {
            1.0
        } else {
            0.5
        };
        let cost_weight = if self.criteria.prioritize_cost { 1.0 } else { 0.5 };
        score += perf_weight * status.performance_score * 0.2;
        score += cost_weight * status.cost_score * 0.2;
        score -= f64::from(status.error_count) * 5.0;
        if self.criteria.preferred_engine.as_deref() == Some(status.engine_id.as_str()) {
            score += 10.0;
        }
        score.max(0.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        EngineClient, GenerationRequest, GenerationResponse, ResponseMetadata, UsageStats,
    };
    use async_trait::async_trait;

    struct ProbeEngine {
        id: &'static str,
        connected: bool,
    }

    #[async_trait]
    impl EngineClient for ProbeEngine {
        fn id(&self) -> &str {
            self.id
        }

        async fn validate_connection(&self) -> taskpilot_types::Result<bool> {
            Ok(self.connected)
        }

        async fn generate_code(
            &self,
            _request: &GenerationRequest,
        ) -> taskpilot_types::Result<GenerationResponse> {
            Ok(GenerationResponse {
                code: String::new(),
                explanation: None,
                suggestions: vec![],
                metadata: ResponseMetadata::new("r", 1),
            })
        }

        async fn usage_stats(&self) -> taskpilot_types::Result<UsageStats> {
            Ok(UsageStats::default())
        }
    }

    fn registry_of(engines: Vec<ProbeEngine>) -> Arc<EngineRegistry> {
        let mut registry = EngineRegistry::new();
        for engine in engines {
            registry.register(engine);
        }
        Arc::new(registry)
    }

    fn some_error() -> PilotError {
        PilotError::Engine {
            engine: "x".into(),
            message: "boom".into(),
            retryable: true,
        }
    }

    // 1. Five consecutive errors disable the engine
    #[tokio::test]
    async fn five_errors_disable_engine() {
        let registry = registry_of(vec![ProbeEngine {
            id: "alpha",
            connected: true,
        }]);
        let selector = EngineSelector::new(registry, SelectionCriteria::default());

        for _ in 0..5 {
            selector.report_error("alpha", &some_error()).await;
        }

        let status = selector.status("alpha").await.unwrap();
        assert_eq!(status.error_count, 5);
        assert!(!status.available);
    }

    // 2. Recovery is asymmetric: one success from error_count=1 re-enables
    #[tokio::test]
    async fn success_from_error_count_one_reenables() {
        let registry = registry_of(vec![ProbeEngine {
            id: "alpha",
            connected: true,
        }]);
        let selector = EngineSelector::new(registry, SelectionCriteria::default());

        // Force the record into {available: false, error_count: 1}
        {
            let mut statuses = selector.statuses.lock().await;
            let status = statuses.get_mut("alpha").unwrap();
            status.available = false;
            status.error_count = 1;
        }

        selector.report_success("alpha").await;

        let status = selector.status("alpha").await.unwrap();
        assert_eq!(status.error_count, 0);
        assert!(status.available);
        assert!(status.last_used.is_some());
    }

    // 3. A disabled engine needs the full climb back
    #[tokio::test]
    async fn recovery_requires_consecutive_successes() {
        let registry = registry_of(vec![ProbeEngine {
            id: "alpha",
            connected: true,
        }]);
        let selector = EngineSelector::new(registry, SelectionCriteria::default());

        for _ in 0..5 {
            selector.report_error("alpha", &some_error()).await;
        }
        for _ in 0..4 {
            selector.report_success("alpha").await;
            assert!(!selector.status("alpha").await.unwrap().available);
        }
        selector.report_success("alpha").await;
        assert!(selector.status("alpha").await.unwrap().available);
    }

    // 4. Unavailable engines are filtered regardless of score
    #[tokio::test]
    async fn select_best_skips_unavailable_engine() {
        let registry = registry_of(vec![
            ProbeEngine {
                id: "a",
                connected: true,
            },
            ProbeEngine {
                id: "b",
                connected: false,
            },
        ]);
        let selector = EngineSelector::new(registry, SelectionCriteria::default());
        // "b" would outscore "a" on raw profile, but its probe fails.
        selector.set_profile("a", 70.0, 70.0).await;
        selector.set_profile("b", 95.0, 95.0).await;

        assert_eq!(selector.select_best().await.unwrap(), "a");
    }

    // 5. Higher profile wins among healthy engines
    #[tokio::test]
    async fn select_best_prefers_higher_score() {
        let registry = registry_of(vec![
            ProbeEngine {
                id: "a",
                connected: true,
            },
            ProbeEngine {
                id: "b",
                connected: true,
            },
        ]);
        let selector = EngineSelector::new(registry, SelectionCriteria::default());
        selector.set_profile("a", 40.0, 40.0).await;
        selector.set_profile("b", 90.0, 90.0).await;

        assert_eq!(selector.select_best().await.unwrap(), "b");
    }

    // 6. Preferred-engine bonus tips an otherwise even race
    #[tokio::test]
    async fn preferred_engine_bonus_applies() {
        let registry = registry_of(vec![
            ProbeEngine {
                id: "a",
                connected: true,
            },
            ProbeEngine {
                id: "b",
                connected: true,
            },
        ]);
        let criteria = SelectionCriteria {
            preferred_engine: Some("b".into()),
            ..SelectionCriteria::default()
        };
        let selector = EngineSelector::new(registry, criteria);

        assert_eq!(selector.select_best().await.unwrap(), "b");
    }

    // 7. Empty candidate set falls back to the configured default
    #[tokio::test]
    async fn select_best_falls_back_to_default() {
        let registry = registry_of(vec![ProbeEngine {
            id: "a",
            connected: false,
        }]);
        let criteria = SelectionCriteria {
            default_engine: "a".into(),
            ..SelectionCriteria::default()
        };
        let selector = EngineSelector::new(registry, criteria);

        assert_eq!(selector.select_best().await.unwrap(), "a");
    }

    // 8. Probe refresh does not re-arm a tripped breaker
    #[tokio::test]
    async fn probe_does_not_rearm_tripped_engine() {
        let registry = registry_of(vec![ProbeEngine {
            id: "a",
            connected: true,
        }]);
        let criteria = SelectionCriteria {
            default_engine: "a".into(),
            ..SelectionCriteria::default()
        };
        let selector = EngineSelector::new(registry, criteria);

        for _ in 0..5 {
            selector.report_error("a", &some_error()).await;
        }

        // The probe succeeds, but error_count >= threshold keeps it out.
        let picked = selector.select_best().await.unwrap();
        assert_eq!(picked, "a", "default fallback, not a scored selection");
        let status = selector.status("a").await.unwrap();
        assert!(status.authenticated);
        assert!(!status.available);
    }

    // 9. Score floor at zero
    #[tokio::test]
    async fn score_is_floored_at_zero() {
        let registry = registry_of(vec![ProbeEngine {
            id: "a",
            connected: true,
        }]);
        let selector = EngineSelector::new(registry, SelectionCriteria::default());
        selector.set_profile("a", 0.0, 0.0).await;
        {
            let mut statuses = selector.statuses.lock().await;
            let status = statuses.get_mut("a").unwrap();
            status.available = false;
            status.authenticated = false;
            status.error_count = 20;
        }
        let statuses = selector.statuses.lock().await;
        assert_eq!(selector.score(statuses.get("a").unwrap()), 0.0);
    }

    // 10. statuses() lists every registered engine
    #[tokio::test]
    async fn statuses_lists_all_engines() {
        let registry = registry_of(vec![
            ProbeEngine {
                id: "a",
                connected: true,
            },
            ProbeEngine {
                id: "b",
                connected: true,
            },
        ]);
        let selector = EngineSelector::new(registry, SelectionCriteria::default());
        let all = selector.statuses().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].engine_id, "a");
        assert_eq!(all[1].engine_id, "b");
    }
}
