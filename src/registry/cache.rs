//! Read-through manifest cache.
//!
//! Snapshot map keyed by capability name, swapped atomically so readers never
//! block. Entries expire after the TTL or when the registry announces a change
//! for their capability. While the registry is unreachable, expired entries
//! are served with a warning until they pass the staleness ceiling.

use super::{ManifestQuery, Registry, RegistryEvent, SubscriptionTopic};
use crate::config::EngineConfig;
use crate::manifest::{CapabilityManifest, ManifestValidator, ValidationStrictness};
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
use crate::Result;
use arc_swap::ArcSwap;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ManifestCacheConfig {
    pub ttl: Duration,
    pub staleness_ceiling: Duration,
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub strictness: ValidationStrictness,
}

impl Default for ManifestCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            staleness_ceiling: Duration::from_secs(600),
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            strictness: ValidationStrictness::Strict,
        }
    }
}

impl ManifestCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            ttl: config.cache_ttl(),
            staleness_ceiling: config.cache_staleness_ceiling(),
            failure_threshold: config.registry_failure_threshold,
            cooldown: config.registry_cooldown(),
            strictness: config.validation_strictness,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_staleness_ceiling(mut self, ceiling: Duration) -> Self {
        self.staleness_ceiling = ceiling;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_strictness(mut self, strictness: ValidationStrictness) -> Self {
        self.strictness = strictness;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub refreshes: u64,
    pub stale_served: u64,
    pub rejected: u64,
    pub invalidations: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    refreshes: AtomicU64,
    stale_served: AtomicU64,
    rejected: AtomicU64,
    invalidations: AtomicU64,
}

impl AtomicStats {
    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone)]
struct Entry {
    manifests: Arc<Vec<Arc<CapabilityManifest>>>,
    fetched_at: Instant,
    /// Set by invalidation; forces a refresh but stays usable as stale data.
    invalidated: bool,
}

type Snapshot = HashMap<String, Entry>;

pub struct ManifestCache {
    registry: Arc<dyn Registry>,
    snapshot: ArcSwap<Snapshot>,
    breaker: CircuitBreaker,
    validator: ManifestValidator,
    config: ManifestCacheConfig,
    stats: AtomicStats,
}

impl ManifestCache {
    pub fn new(registry: Arc<dyn Registry>, config: ManifestCacheConfig) -> Self {
        let breaker = CircuitBreaker::new(
            format!("registry:{}", registry.name()),
            CircuitBreakerConfig::new()
                .with_failure_threshold(config.failure_threshold)
                .with_cooldown(config.cooldown),
        );
        Self {
            registry,
            snapshot: ArcSwap::from_pointee(HashMap::new()),
            breaker,
            validator: ManifestValidator::new(config.strictness),
            config,
            stats: AtomicStats::default(),
        }
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }

    pub fn breaker(&self) -> CircuitBreakerSnapshot {
        self.breaker.snapshot()
    }

    /// Validated manifests published for `capability`, read through the cache.
    pub async fn candidates(&self, capability: &str) -> Result<Vec<Arc<CapabilityManifest>>> {
        let current = self.snapshot.load();
        let cached = current.get(capability).cloned();
        drop(current);

        if let Some(entry) = &cached {
            if !entry.invalidated && entry.fetched_at.elapsed() < self.config.ttl {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.manifests.as_ref().clone());
            }
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        match self.refresh(capability).await {
            Ok(fresh) => Ok(fresh),
            Err(err) if err.is_registry_unavailable() => match cached {
                Some(entry) if entry.fetched_at.elapsed() < self.config.staleness_ceiling => {
                    self.stats.stale_served.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        capability,
                        age_ms = entry.fetched_at.elapsed().as_millis() as u64,
                        error = %err,
                        "registry unavailable, serving stale manifests"
                    );
                    Ok(entry.manifests.as_ref().clone())
                }
                _ => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    async fn refresh(&self, capability: &str) -> Result<Vec<Arc<CapabilityManifest>>> {
        self.breaker.allow()?;
        let fetched = match self
            .registry
            .fetch(&ManifestQuery::capability(capability))
            .await
        {
            Ok(fetched) => {
                self.breaker.on_success();
                fetched
            }
            Err(err) => {
                if err.is_registry_unavailable() {
                    self.breaker.on_failure();
                }
                return Err(err);
            }
        };

        let admitted: Vec<_> = fetched
            .into_iter()
            .filter(|m| match self.validator.validate(m) {
                Ok(()) => true,
                Err(violations) => {
                    self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        manifest_id = %m.id(),
                        capability,
                        violations = violations.len(),
                        "manifest failed validation, not admitted"
                    );
                    false
                }
            })
            .collect();

        let entry = Entry {
            manifests: Arc::new(admitted.clone()),
            fetched_at: Instant::now(),
            invalidated: false,
        };
        self.snapshot.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(capability.to_string(), entry.clone());
            next
        });
        self.stats.refreshes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(capability, count = admitted.len(), "manifest cache refreshed");
        Ok(admitted)
    }

    /// Mark one capability for refresh on next read.
    pub fn invalidate(&self, capability: &str) {
        self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
        self.snapshot.rcu(|current| {
            let mut next = HashMap::clone(current);
            if let Some(entry) = next.get_mut(capability) {
                entry.invalidated = true;
            }
            next
        });
    }

    pub fn invalidate_all(&self) {
        self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
        self.snapshot.rcu(|current| {
            let mut next = HashMap::clone(current);
            for entry in next.values_mut() {
                entry.invalidated = true;
            }
            next
        });
    }

    fn on_event(&self, event: &RegistryEvent) {
        tracing::debug!(capability = event.capability(), "registry change, invalidating");
        self.invalidate(event.capability());
    }

    /// Spawn a task that invalidates entries on registry change events until
    /// `cancel` fires or the event stream ends.
    pub fn spawn_invalidation_listener(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let mut events = cache.registry.subscribe(SubscriptionTopic::All);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = events.next() => match next {
                        Some(Ok(event)) => cache.on_event(&event),
                        Some(Err(err)) => {
                            tracing::warn!(error = %err, "registry event stream error, dropping all entries");
                            cache.invalidate_all();
                        }
                        None => break,
                    },
                }
            }
            tracing::debug!("manifest cache listener stopped");
        })
    }
}
