//! 注册表模块：清单发布、查询与变更订阅的抽象协作者。
//!
//! # Registry Module
//!
//! The engine never owns manifest storage. It talks to a [`Registry`]
//! collaborator and reads through a [`ManifestCache`] in front of it.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Registry`] | Publish, fetch and subscribe interface |
//! | [`InMemoryRegistry`] | In-process implementation with an outage switch |
//! | [`ManifestCache`] | Read-through snapshot cache with TTL, invalidation and breaker |

mod cache;
mod memory;

pub use cache::{CacheStats, ManifestCache, ManifestCacheConfig};
pub use memory::InMemoryRegistry;

use crate::manifest::{CapabilityManifest, VersionRequirement};
use crate::{BoxStream, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Fetch filter. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_name: Option<String>,
    #[serde(default)]
    pub requirement: VersionRequirement,
}

impl ManifestQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn capability(name: impl Into<String>) -> Self {
        Self {
            capability_name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn module(module_id: impl Into<String>) -> Self {
        Self {
            module_id: Some(module_id.into()),
            ..Default::default()
        }
    }

    pub fn with_requirement(mut self, requirement: VersionRequirement) -> Self {
        self.requirement = requirement;
        self
    }

    pub fn matches(&self, manifest: &CapabilityManifest) -> bool {
        if let Some(module) = &self.module_id {
            if manifest.module_id() != module {
                return false;
            }
        }
        if let Some(name) = &self.capability_name {
            if manifest.name() != name {
                return false;
            }
        }
        match &self.requirement {
            VersionRequirement::Any => true,
            req => manifest
                .parsed_version()
                .map(|v| req.matches(&v))
                .unwrap_or(false),
        }
    }
}

/// What a subscriber wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTopic {
    Module(String),
    Capability(String),
    All,
}

impl SubscriptionTopic {
    pub fn covers(&self, event: &RegistryEvent) -> bool {
        match self {
            SubscriptionTopic::All => true,
            SubscriptionTopic::Module(m) => event.module_id() == m,
            SubscriptionTopic::Capability(c) => event.capability() == c,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RegistryEvent {
    Published {
        manifest: Arc<CapabilityManifest>,
        at: DateTime<Utc>,
    },
    Withdrawn {
        manifest_id: Uuid,
        module_id: String,
        capability: String,
        at: DateTime<Utc>,
    },
}

impl RegistryEvent {
    pub fn module_id(&self) -> &str {
        match self {
            RegistryEvent::Published { manifest, .. } => manifest.module_id(),
            RegistryEvent::Withdrawn { module_id, .. } => module_id,
        }
    }

    pub fn capability(&self) -> &str {
        match self {
            RegistryEvent::Published { manifest, .. } => manifest.name(),
            RegistryEvent::Withdrawn { capability, .. } => capability,
        }
    }
}

/// Manifest storage and discovery, implemented outside the engine.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Store a manifest. Fails with `VersionConflict` when the id was used
    /// before, when (module, capability, version) already exists, or when the
    /// version is not newer than every earlier one of the same module and
    /// capability.
    async fn publish(&self, manifest: CapabilityManifest) -> Result<()>;

    async fn fetch(&self, query: &ManifestQuery) -> Result<Vec<Arc<CapabilityManifest>>>;

    /// Change notifications for `topic`. Lagging subscribers receive an error item.
    fn subscribe(&self, topic: SubscriptionTopic) -> BoxStream<'static, RegistryEvent>;

    fn name(&self) -> &str {
        "registry"
    }
}
