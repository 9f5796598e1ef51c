//! 计划执行模块：有界并发地执行集成计划，支持重试、降级与超时取消。
//!
//! # Plan Execution Module
//!
//! [`PlanExecutor`] walks an [`IntegrationPlan`](crate::plan::IntegrationPlan)
//! with a bounded worker pool. A step starts once every dependency has
//! finished and none of its blocking dependencies failed. Failed attempts
//! are retried with exponential backoff, then each fallback manifest is
//! tried under the same policy.
//!
//! The user-supplied [`StepRunner`] does the actual work; its errors are
//! `anyhow` errors and only surface in the [`ExecutionReport`].
//!
//! ```rust,no_run
//! use capability_mesh::executor::{step_fn, PlanExecutor, StepContext};
//! use serde_json::json;
//!
//! # async fn demo(plan: capability_mesh::plan::IntegrationPlan) {
//! let runner = step_fn(|ctx: StepContext| async move {
//!     Ok(json!({ "ran": ctx.capability() }))
//! });
//! let report = PlanExecutor::default().execute(&plan, runner).await;
//! println!("{:?}", report.outcome);
//! # }
//! ```

mod report;
mod retry;
mod run;
mod runner;

pub use report::{ExecutionRecord, ExecutionReport, PlanOutcome, StepStatus};
pub use retry::{Decision, RetryPolicy};
pub use run::PlanExecutor;
pub use runner::{step_fn, DependencyOutput, StepContext, StepRunner};
