//! 弹性模块：为注册表访问提供熔断保护。
//!
//! # Resilience Module
//!
//! The [`ManifestCache`](crate::registry::ManifestCache) guards every registry
//! call with a [`CircuitBreaker`]. Once it opens, fetches fail fast and the
//! cache serves its last snapshot instead.
//!
//! ```rust
//! use capability_mesh::resilience::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let breaker = CircuitBreaker::new(
//!     "registry",
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(3)
//!         .with_cooldown(Duration::from_secs(30)),
//! );
//! assert_eq!(breaker.state(), BreakerState::Closed);
//! # }
//! ```

pub mod circuit_breaker;

pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
