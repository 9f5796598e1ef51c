//! Engine configuration.
//!
//! Defaults are usable as-is. A config can be loaded from YAML or JSON and any
//! of the common knobs can then be overridden from `CAPMESH_*` environment
//! variables:
//!
//! - `CAPMESH_MAX_RETRIES` (default 3)
//! - `CAPMESH_RETRY_BASE_DELAY_MS` (default 100)
//! - `CAPMESH_RETRY_MAX_DELAY_MS` (default 5000)
//! - `CAPMESH_SIMILARITY_THRESHOLD` (default 0.7)
//! - `CAPMESH_PRIORITY_STRATEGY` (default `version_then_recency`)
//! - `CAPMESH_INTEGRATION_TIMEOUT_MS` (default 30000)
//! - `CAPMESH_MAX_CONCURRENT` (default 4)
//! - `CAPMESH_VALIDATION_STRICTNESS` (default `strict`)

use crate::conflict::{ConflictStrategy, PriorityStrategy};
use crate::manifest::ValidationStrictness;
use crate::matcher::SimilarityWeights;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_PREFIX: &str = "CAPMESH_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub similarity_threshold: f64,
    pub weights: SimilarityWeights,
    pub type_mismatch_cap: f64,
    pub priority_strategy: PriorityStrategy,
    /// Used by `declared_priority`; higher wins, unlisted modules count as 0.
    pub module_priorities: BTreeMap<String, i64>,
    /// Used by `manual`; module ids in preference order.
    pub manual_order: Vec<String>,
    pub conflict_strategies: Vec<ConflictStrategy>,
    pub integration_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
    pub max_concurrent: usize,
    pub validation_strictness: ValidationStrictness,
    pub cache_ttl_ms: u64,
    pub cache_staleness_ceiling_ms: u64,
    pub registry_failure_threshold: u32,
    pub registry_cooldown_ms: u64,
    pub max_plan_depth: usize,
    pub enable_fallbacks: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 5_000,
            similarity_threshold: 0.7,
            weights: SimilarityWeights::default(),
            type_mismatch_cap: 0.05,
            priority_strategy: PriorityStrategy::VersionThenRecency,
            module_priorities: BTreeMap::new(),
            manual_order: Vec::new(),
            conflict_strategies: vec![ConflictStrategy::Override],
            integration_timeout_ms: 30_000,
            shutdown_grace_ms: 2_000,
            max_concurrent: 4,
            validation_strictness: ValidationStrictness::Strict,
            cache_ttl_ms: 60_000,
            cache_staleness_ceiling_ms: 600_000,
            registry_failure_threshold: 5,
            registry_cooldown_ms: 30_000,
            max_plan_depth: 32,
            enable_fallbacks: true,
        }
    }
}

fn invalid(field: &str, details: impl Into<String>, source: &str) -> Error {
    Error::configuration_with_context(
        format!("invalid value for {}", field),
        ErrorContext::new()
            .with_field_path(format!("config.{}", field))
            .with_details(details)
            .with_source(source),
    )
}

fn parse_env<T: FromStr>(field: &str, key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| invalid(field, format!("{}={:?} does not parse", key, raw), "env"))
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply `CAPMESH_*` overrides read through `lookup`, then validate.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| {
            let key = format!("{}{}", ENV_PREFIX, name);
            lookup(&key).map(|value| (key, value))
        };

        if let Some((key, v)) = var("MAX_RETRIES") {
            self.max_retries = parse_env("max_retries", &key, &v)?;
        }
        if let Some((key, v)) = var("RETRY_BASE_DELAY_MS") {
            self.retry_base_delay_ms = parse_env("retry_base_delay_ms", &key, &v)?;
        }
        if let Some((key, v)) = var("RETRY_MAX_DELAY_MS") {
            self.retry_max_delay_ms = parse_env("retry_max_delay_ms", &key, &v)?;
        }
        if let Some((key, v)) = var("SIMILARITY_THRESHOLD") {
            self.similarity_threshold = parse_env("similarity_threshold", &key, &v)?;
        }
        if let Some((key, v)) = var("PRIORITY_STRATEGY") {
            self.priority_strategy = PriorityStrategy::parse(&v).ok_or_else(|| {
                invalid(
                    "priority_strategy",
                    format!("{}={:?}, expected version_then_recency|declared_priority|manual", key, v),
                    "env",
                )
            })?;
        }
        if let Some((key, v)) = var("INTEGRATION_TIMEOUT_MS") {
            self.integration_timeout_ms = parse_env("integration_timeout_ms", &key, &v)?;
        }
        if let Some((key, v)) = var("MAX_CONCURRENT") {
            self.max_concurrent = parse_env("max_concurrent", &key, &v)?;
        }
        if let Some((key, v)) = var("VALIDATION_STRICTNESS") {
            self.validation_strictness = match v.trim().to_ascii_lowercase().as_str() {
                "strict" => ValidationStrictness::Strict,
                "lenient" => ValidationStrictness::Lenient,
                _ => {
                    return Err(invalid(
                        "validation_strictness",
                        format!("{}={:?}, expected strict|lenient", key, v),
                        "env",
                    ))
                }
            };
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(invalid(
                "similarity_threshold",
                format!("{} is outside [0, 1]", self.similarity_threshold),
                "config",
            ));
        }
        if !(0.0..=1.0).contains(&self.type_mismatch_cap) {
            return Err(invalid(
                "type_mismatch_cap",
                format!("{} is outside [0, 1]", self.type_mismatch_cap),
                "config",
            ));
        }
        if !self.weights.is_usable() {
            return Err(invalid(
                "weights",
                "weights must be finite, non-negative and not all zero",
                "config",
            ));
        }
        if self.max_concurrent == 0 {
            return Err(invalid("max_concurrent", "must be at least 1", "config"));
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(invalid(
                "retry_max_delay_ms",
                format!(
                    "{} is below retry_base_delay_ms {}",
                    self.retry_max_delay_ms, self.retry_base_delay_ms
                ),
                "config",
            ));
        }
        if self.max_plan_depth == 0 {
            return Err(invalid("max_plan_depth", "must be at least 1", "config"));
        }
        if self.conflict_strategies.is_empty() {
            return Err(invalid(
                "conflict_strategies",
                "at least one strategy is required",
                "config",
            ));
        }
        Ok(())
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay_ms = base.as_millis() as u64;
        self.retry_max_delay_ms = max.as_millis() as u64;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_weights(mut self, weights: SimilarityWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_priority_strategy(mut self, strategy: PriorityStrategy) -> Self {
        self.priority_strategy = strategy;
        self
    }

    pub fn with_module_priority(mut self, module_id: impl Into<String>, priority: i64) -> Self {
        self.module_priorities.insert(module_id.into(), priority);
        self
    }

    pub fn with_manual_order(mut self, order: Vec<String>) -> Self {
        self.manual_order = order;
        self
    }

    pub fn with_conflict_strategies(mut self, strategies: Vec<ConflictStrategy>) -> Self {
        self.conflict_strategies = strategies;
        self
    }

    pub fn with_integration_timeout(mut self, timeout: Duration) -> Self {
        self.integration_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_validation_strictness(mut self, strictness: ValidationStrictness) -> Self {
        self.validation_strictness = strictness;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn with_max_plan_depth(mut self, depth: usize) -> Self {
        self.max_plan_depth = depth;
        self
    }

    pub fn with_fallbacks(mut self, enabled: bool) -> Self {
        self.enable_fallbacks = enabled;
        self
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn integration_timeout(&self) -> Duration {
        Duration::from_millis(self.integration_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn cache_staleness_ceiling(&self) -> Duration {
        Duration::from_millis(self.cache_staleness_ceiling_ms)
    }

    pub fn registry_cooldown(&self) -> Duration {
        Duration::from_millis(self.registry_cooldown_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.integration_timeout(), Duration::from_secs(30));
        assert_eq!(config.conflict_strategies, vec![ConflictStrategy::Override]);
    }

    #[test]
    fn test_yaml_partial_config() {
        let config = EngineConfig::from_yaml(
            r#"
similarity_threshold: 0.8
priority_strategy: declared_priority
module_priorities:
  vision-pro: 10
conflict_strategies: [merge, override]
weights:
  type_match: 1.0
"#,
        )
        .unwrap();
        assert_eq!(config.similarity_threshold, 0.8);
        assert_eq!(config.priority_strategy, PriorityStrategy::DeclaredPriority);
        assert_eq!(config.module_priorities.get("vision-pro"), Some(&10));
        assert_eq!(config.weights.schema_overlap, 0.4);
        assert_eq!(config.max_concurrent, 4);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CAPMESH_MAX_RETRIES", "5"),
            ("CAPMESH_PRIORITY_STRATEGY", "manual"),
            ("CAPMESH_VALIDATION_STRICTNESS", "lenient"),
        ]
        .into_iter()
        .collect();
        let config = EngineConfig::default()
            .with_overrides_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.priority_strategy, PriorityStrategy::Manual);
        assert_eq!(config.validation_strictness, ValidationStrictness::Lenient);
    }

    #[test]
    fn test_bad_env_value_reports_field() {
        let err = EngineConfig::default()
            .with_overrides_from(|k| (k == "CAPMESH_MAX_CONCURRENT").then(|| "lots".to_string()))
            .unwrap_err();
        match err {
            Error::Configuration { context, .. } => {
                assert_eq!(context.field_path.as_deref(), Some("config.max_concurrent"));
                assert_eq!(context.source.as_deref(), Some("env"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(EngineConfig::default().with_similarity_threshold(1.5).validate().is_err());
        assert!(EngineConfig::default().with_max_concurrent(0).validate().is_err());
        assert!(EngineConfig::default()
            .with_weights(SimilarityWeights::new(0.0, 0.0, 0.0))
            .validate()
            .is_err());
        assert!(EngineConfig::default()
            .with_retry_delays(Duration::from_millis(500), Duration::from_millis(100))
            .validate()
            .is_err());
    }
}
