//! Integration engine facade.
//!
//! Wires a registry, the manifest cache, the validator, the planner and the
//! executor behind one handle. Most applications only need this type.

use crate::config::EngineConfig;
use crate::executor::{ExecutionReport, PlanExecutor, StepRunner};
use crate::manifest::{CapabilityManifest, ManifestValidator};
use crate::matcher::CapabilityRequest;
use crate::plan::{CapabilityResolution, IntegrationPlan, Planner};
use crate::registry::{CacheStats, InMemoryRegistry, ManifestCache, ManifestCacheConfig, Registry};
use crate::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// Builder for [`IntegrationEngine`].
pub struct IntegrationEngineBuilder {
    config: EngineConfig,
    registry: Option<Arc<dyn Registry>>,
    cache: Option<ManifestCacheConfig>,
}

impl IntegrationEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            registry: None,
            cache: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Registry to publish to and fetch from. Defaults to a fresh
    /// [`InMemoryRegistry`].
    pub fn registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Override the cache settings derived from the engine config.
    pub fn cache_config(mut self, cache: ManifestCacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> Result<IntegrationEngine> {
        self.config.validate()?;
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(InMemoryRegistry::new()));
        let cache_config = self
            .cache
            .unwrap_or_else(|| ManifestCacheConfig::from_engine(&self.config));
        let cache = Arc::new(ManifestCache::new(registry.clone(), cache_config));
        let planner = Planner::new(cache.clone(), &self.config);

        info!(
            registry = registry.name(),
            threshold = self.config.similarity_threshold,
            max_concurrent = self.config.max_concurrent,
            "integration engine ready"
        );

        Ok(IntegrationEngine {
            validator: ManifestValidator::new(self.config.validation_strictness),
            executor: PlanExecutor::from_config(&self.config),
            registry,
            cache,
            planner,
            shutdown: CancellationToken::new(),
            config: self.config,
        })
    }
}

impl Default for IntegrationEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves capability requests against published manifests and runs the
/// resulting plans.
pub struct IntegrationEngine {
    config: EngineConfig,
    registry: Arc<dyn Registry>,
    cache: Arc<ManifestCache>,
    validator: ManifestValidator,
    planner: Planner,
    executor: PlanExecutor,
    shutdown: CancellationToken,
}

impl IntegrationEngine {
    pub fn builder() -> IntegrationEngineBuilder {
        IntegrationEngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ManifestCache> {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    pub fn executor(&self) -> &PlanExecutor {
        &self.executor
    }

    /// Validate and publish a manifest. The cached entry for its capability
    /// is dropped so the next lookup sees it.
    pub async fn publish(&self, manifest: CapabilityManifest) -> Result<Uuid> {
        self.validator.check(&manifest)?;
        let id = manifest.id();
        let capability = manifest.name().to_string();
        self.registry.publish(manifest).await?;
        self.cache.invalidate(&capability);
        info!(manifest_id = %id, capability = capability.as_str(), "manifest published");
        Ok(id)
    }

    /// Match one request and settle conflicts, without planning dependencies.
    pub async fn resolve(&self, request: &CapabilityRequest) -> Result<CapabilityResolution> {
        self.planner.resolve(request).await
    }

    pub async fn plan(&self, request: &CapabilityRequest) -> Result<IntegrationPlan> {
        self.planner.plan(request).await
    }

    pub async fn execute(&self, plan: &IntegrationPlan, runner: Arc<dyn StepRunner>) -> ExecutionReport {
        self.executor
            .execute_with_cancel(plan, runner, self.shutdown.child_token())
            .await
    }

    /// Plan and execute. Planning errors are returned; step failures are in
    /// the report.
    pub async fn run(&self, request: &CapabilityRequest, runner: Arc<dyn StepRunner>) -> Result<ExecutionReport> {
        let plan = self.plan(request).await?;
        Ok(self.execute(&plan, runner).await)
    }

    /// Spawn the task that invalidates cached entries on registry events.
    /// It stops on [`shutdown`](Self::shutdown).
    pub fn start_cache_invalidation(&self) -> JoinHandle<()> {
        self.cache
            .spawn_invalidation_listener(self.shutdown.child_token())
    }

    /// Cancel running executions and background tasks.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
