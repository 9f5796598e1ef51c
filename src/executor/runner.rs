use crate::manifest::CapabilityManifest;
use crate::plan::StepId;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Output of a finished dependency, handed to its dependents.
#[derive(Debug, Clone)]
pub struct DependencyOutput {
    pub step: StepId,
    pub capability: String,
    pub output: Value,
}

/// Everything a runner gets for one attempt.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub correlation_id: Uuid,
    pub step: StepId,
    /// Manifest to run; a fallback when `fallback` is set.
    pub manifest: Arc<CapabilityManifest>,
    /// Member manifests of a merged composite.
    pub members: Vec<Arc<CapabilityManifest>>,
    /// Zero-based attempt on this manifest.
    pub attempt: u32,
    /// Index into the step's fallbacks, if running one.
    pub fallback: Option<usize>,
    pub inputs: Vec<DependencyOutput>,
    /// Fires on timeout or external cancellation.
    pub cancel: CancellationToken,
}

impl StepContext {
    pub fn capability(&self) -> &str {
        self.manifest.name()
    }

    /// Output of the dependency providing `capability`.
    pub fn input(&self, capability: &str) -> Option<&Value> {
        self.inputs
            .iter()
            .find(|d| d.capability == capability)
            .map(|d| &d.output)
    }
}

/// Runs one manifest. Implemented by the embedding application.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(&self, ctx: StepContext) -> anyhow::Result<Value>;
}

#[async_trait]
impl<F, Fut> StepRunner for F
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn run(&self, ctx: StepContext) -> anyhow::Result<Value> {
        (self)(ctx).await
    }
}

/// Wrap a closure as a shareable runner.
pub fn step_fn<F, Fut>(f: F) -> Arc<dyn StepRunner>
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(f)
}
