use crate::{Error, ErrorContext, Result};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    /// Cooldown elapsed; the next call is a probe.
    HalfOpen,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub state: BreakerState,
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub consecutive_failures: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

#[derive(Debug)]
struct State {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Breaker in front of registry calls.
///
/// Counts consecutive failures and opens for a cooldown once the threshold is
/// reached. While open, calls fail fast with `RegistryUnavailable` so the
/// cache can fall back to its stale snapshot.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    cfg: CircuitBreakerConfig,
    state: std::sync::Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cfg: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            cfg,
            state: std::sync::Mutex::new(State {
                consecutive_failures: 0,
                open_until: None,
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| {
            Error::runtime_with_context(
                "circuit breaker state poisoned",
                ErrorContext::new().with_source(self.name.clone()),
            )
        })
    }

    /// Ok when a call may proceed.
    pub fn allow(&self) -> Result<()> {
        let st = self.lock()?;
        if let Some(until) = st.open_until {
            let now = Instant::now();
            if now < until {
                return Err(Error::registry_unavailable(format!(
                    "{} circuit open for another {}ms",
                    self.name,
                    (until - now).as_millis()
                )));
            }
        }
        Ok(())
    }

    pub fn on_success(&self) {
        if let Ok(mut st) = self.state.lock() {
            if st.open_until.is_some() {
                tracing::info!(breaker = self.name.as_str(), "circuit closed");
            }
            st.consecutive_failures = 0;
            st.open_until = None;
        }
    }

    pub fn on_failure(&self) {
        if let Ok(mut st) = self.state.lock() {
            st.consecutive_failures = st.consecutive_failures.saturating_add(1);
            if st.consecutive_failures >= self.cfg.failure_threshold {
                st.open_until = Some(Instant::now() + self.cfg.cooldown);
                tracing::warn!(
                    breaker = self.name.as_str(),
                    failures = st.consecutive_failures,
                    cooldown_ms = self.cfg.cooldown.as_millis() as u64,
                    "circuit opened"
                );
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.snapshot().state
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = Instant::now();
        let (consecutive_failures, open_until) = match self.state.lock() {
            Ok(st) => (st.consecutive_failures, st.open_until),
            Err(_) => (0, None),
        };
        let (state, open_remaining_ms) = match open_until {
            Some(until) if until > now => (BreakerState::Open, Some((until - now).as_millis() as u64)),
            Some(_) => (BreakerState::HalfOpen, None),
            None => (BreakerState::Closed, None),
        };
        CircuitBreakerSnapshot {
            state,
            failure_threshold: self.cfg.failure_threshold,
            cooldown_ms: self.cfg.cooldown.as_millis() as u64,
            consecutive_failures,
            open_remaining_ms,
        }
    }
}
