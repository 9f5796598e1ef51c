//! Shared fixtures for integration tests.
#![allow(dead_code)]

use capability_mesh::manifest::{CapabilityManifest, CapabilityType, DependencyRef, IOSchema};
use std::sync::Arc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn ty(t: &str) -> IOSchema {
    IOSchema::json_type(t).unwrap()
}

pub fn text() -> IOSchema {
    ty("string")
}

/// A data-processing manifest producing `text`.
pub fn manifest(module: &str, name: &str, version: &str) -> CapabilityManifest {
    CapabilityManifest::builder(module, name, CapabilityType::DataProcessing)
        .version(version)
        .output("text", text())
        .description(format!("{module} provides {name}"))
        .build()
        .unwrap()
}

/// A manifest with dependencies on the given capability names (any version).
pub fn manifest_with_deps(module: &str, name: &str, deps: &[&str]) -> CapabilityManifest {
    let mut builder = CapabilityManifest::builder(module, name, CapabilityType::DataProcessing)
        .version("1.0.0")
        .output("text", text())
        .description(format!("{module} provides {name}"));
    for dep in deps {
        builder = builder.dependency(DependencyRef::new(*dep, "*"));
    }
    builder.build().unwrap()
}

pub fn shared(manifests: Vec<CapabilityManifest>) -> Vec<Arc<CapabilityManifest>> {
    manifests.into_iter().map(Arc::new).collect()
}

/// Every permutation of `items`, for order-invariance checks on small sets.
pub fn permutations<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let head = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, head.clone());
            out.push(tail);
        }
    }
    out
}
