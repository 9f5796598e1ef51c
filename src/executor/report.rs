use crate::plan::StepId;
use crate::{Error, ErrorContext, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped)
    }
}

/// Per-step execution record.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub step: StepId,
    pub capability: String,
    pub manifest_id: Uuid,
    pub critical: bool,
    pub status: StepStatus,
    /// Attempts across the primary manifest and its fallbacks.
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Fallback manifest that produced the output, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_used: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl ExecutionRecord {
    pub(crate) fn pending(step: StepId, capability: &str, manifest_id: Uuid, critical: bool) -> Self {
        Self {
            step,
            capability: capability.to_string(),
            manifest_id,
            critical,
            status: StepStatus::Pending,
            attempts: 0,
            last_error: None,
            started_at: None,
            finished_at: None,
            fallback_used: None,
            output: None,
        }
    }

    pub(crate) fn skip(&mut self, reason: impl Into<String>) {
        self.status = StepStatus::Skipped;
        self.last_error = Some(reason.into());
        self.finished_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOutcome {
    /// Every step succeeded on its primary manifest.
    Succeeded,
    /// Every critical step succeeded, but a fallback was used or a
    /// non-critical step did not succeed.
    Degraded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub correlation_id: Uuid,
    pub outcome: PlanOutcome,
    /// Indexed by step id.
    pub records: Vec<ExecutionRecord>,
    pub root: StepId,
    pub timed_out: bool,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl ExecutionReport {
    pub(crate) fn outcome_of(records: &[ExecutionRecord]) -> PlanOutcome {
        let critical_ok = records
            .iter()
            .filter(|r| r.critical)
            .all(|r| r.status == StepStatus::Succeeded);
        if !critical_ok {
            return PlanOutcome::Failed;
        }
        let clean = records
            .iter()
            .all(|r| r.status == StepStatus::Succeeded && r.fallback_used.is_none());
        if clean {
            PlanOutcome::Succeeded
        } else {
            PlanOutcome::Degraded
        }
    }

    pub fn record(&self, step: StepId) -> Option<&ExecutionRecord> {
        self.records.get(step.index())
    }

    pub fn status_of(&self, step: StepId) -> Option<StepStatus> {
        self.record(step).map(|r| r.status)
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    /// Output of the root step, when it succeeded.
    pub fn output(&self) -> Option<&Value> {
        self.record(self.root).and_then(|r| r.output.as_ref())
    }

    /// `Ok` unless the plan failed. A timeout maps to `ExecutionTimeout`.
    pub fn ensure_success(&self, timeout: Duration) -> Result<()> {
        if self.outcome != PlanOutcome::Failed {
            return Ok(());
        }
        if self.timed_out {
            return Err(Error::ExecutionTimeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        let failed: Vec<String> = self
            .records
            .iter()
            .filter(|r| r.critical && r.status != StepStatus::Succeeded)
            .map(|r| format!("{} ({}): {}", r.step, r.capability, r.last_error.as_deref().unwrap_or("not run")))
            .collect();
        Err(Error::runtime_with_context(
            format!("integration failed: {}", failed.join("; ")),
            ErrorContext::new()
                .with_source("executor")
                .with_details(format!("correlation_id={}", self.correlation_id)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: usize, critical: bool, status: StepStatus) -> ExecutionRecord {
        let mut r = ExecutionRecord::pending(StepId(id), "cap", Uuid::new_v4(), critical);
        r.status = status;
        r
    }

    #[test]
    fn test_outcome_rules() {
        let ok = vec![record(0, true, StepStatus::Succeeded), record(1, true, StepStatus::Succeeded)];
        assert_eq!(ExecutionReport::outcome_of(&ok), PlanOutcome::Succeeded);

        let soft_fail = vec![record(0, true, StepStatus::Succeeded), record(1, false, StepStatus::Failed)];
        assert_eq!(ExecutionReport::outcome_of(&soft_fail), PlanOutcome::Degraded);

        let mut fell_back = record(0, true, StepStatus::Succeeded);
        fell_back.fallback_used = Some(Uuid::new_v4());
        assert_eq!(ExecutionReport::outcome_of(&[fell_back]), PlanOutcome::Degraded);

        let hard_fail = vec![record(0, true, StepStatus::Skipped), record(1, true, StepStatus::Failed)];
        assert_eq!(ExecutionReport::outcome_of(&hard_fail), PlanOutcome::Failed);
    }
}
