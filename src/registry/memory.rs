//! In-process registry.

use super::{ManifestQuery, Registry, RegistryEvent, SubscriptionTopic};
use crate::manifest::CapabilityManifest;
use crate::{BoxStream, Error, ErrorContext, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

const EVENT_BUFFER: usize = 256;

#[derive(Default)]
struct Store {
    manifests: Vec<Arc<CapabilityManifest>>,
    /// Every id ever published, withdrawn ones included.
    used_ids: HashSet<Uuid>,
}

/// Registry kept in memory, for tests and embedded use.
///
/// `set_available(false)` makes every call fail with `RegistryUnavailable`.
pub struct InMemoryRegistry {
    store: RwLock<Store>,
    events: broadcast::Sender<RegistryEvent>,
    available: AtomicBool,
    fetches: AtomicU64,
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            store: RwLock::new(Store::default()),
            events,
            available: AtomicBool::new(true),
            fetches: AtomicU64::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Number of fetch calls served, successful or not.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.store.read().map(|s| s.manifests.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(Error::registry_unavailable("in-memory registry switched off"))
        }
    }

    fn poisoned() -> Error {
        Error::runtime_with_context(
            "registry store poisoned",
            ErrorContext::new().with_source("in_memory_registry"),
        )
    }

    /// Remove a manifest from discovery. Its id stays reserved.
    pub fn withdraw(&self, manifest_id: Uuid) -> Result<bool> {
        self.ensure_available()?;
        let removed = {
            let mut store = self.store.write().map_err(|_| Self::poisoned())?;
            let position = store.manifests.iter().position(|m| m.id() == manifest_id);
            position.map(|i| store.manifests.remove(i))
        };
        match removed {
            Some(manifest) => {
                tracing::info!(manifest_id = %manifest_id, capability = manifest.name(), "manifest withdrawn");
                let _ = self.events.send(RegistryEvent::Withdrawn {
                    manifest_id,
                    module_id: manifest.module_id().to_string(),
                    capability: manifest.name().to_string(),
                    at: Utc::now(),
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn check_invariants(store: &Store, manifest: &CapabilityManifest) -> Result<()> {
        let conflict = |message: String| Error::VersionConflict {
            module_id: manifest.module_id().to_string(),
            capability: manifest.name().to_string(),
            message,
        };

        if store.used_ids.contains(&manifest.id()) {
            return Err(conflict(format!("manifest id {} was already used", manifest.id())));
        }

        let version = manifest
            .parsed_version()
            .ok_or_else(|| conflict(format!("version '{}' is not valid semver", manifest.version())))?;

        let siblings = store
            .manifests
            .iter()
            .filter(|m| m.module_id() == manifest.module_id() && m.name() == manifest.name());
        for existing in siblings {
            let Some(existing_version) = existing.parsed_version() else {
                continue;
            };
            if existing_version == version {
                return Err(conflict(format!("version {} is already published", version)));
            }
            if existing_version > version {
                return Err(conflict(format!(
                    "version {} is not newer than published {}",
                    version, existing_version
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn publish(&self, manifest: CapabilityManifest) -> Result<()> {
        self.ensure_available()?;
        let manifest = Arc::new(manifest);
        {
            let mut store = self.store.write().map_err(|_| Self::poisoned())?;
            Self::check_invariants(&store, &manifest)?;
            store.used_ids.insert(manifest.id());
            store.manifests.push(manifest.clone());
        }
        tracing::info!(
            manifest_id = %manifest.id(),
            module_id = manifest.module_id(),
            capability = manifest.name(),
            version = manifest.version(),
            "manifest published"
        );
        // no receivers is fine
        let _ = self.events.send(RegistryEvent::Published {
            manifest,
            at: Utc::now(),
        });
        Ok(())
    }

    async fn fetch(&self, query: &ManifestQuery) -> Result<Vec<Arc<CapabilityManifest>>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.ensure_available()?;
        let store = self.store.read().map_err(|_| Self::poisoned())?;
        let mut found: Vec<_> = store
            .manifests
            .iter()
            .filter(|m| query.matches(m))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            (a.module_id(), a.name(), a.parsed_version())
                .cmp(&(b.module_id(), b.name(), b.parsed_version()))
        });
        Ok(found)
    }

    fn subscribe(&self, topic: SubscriptionTopic) -> BoxStream<'static, RegistryEvent> {
        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(move |item| {
            let out = match item {
                Ok(event) if topic.covers(&event) => Some(Ok(event)),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(missed)) => Some(Err(Error::runtime_with_context(
                    format!("subscriber lagged, {} events dropped", missed),
                    ErrorContext::new().with_source("in_memory_registry"),
                ))),
            };
            futures::future::ready(out)
        });
        Box::pin(stream)
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}
