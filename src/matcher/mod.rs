//! 能力匹配模块：对兼容候选进行加权相似度评分与确定性排序。
//!
//! # Capability Matcher Module
//!
//! Candidates are first classified by the [`compat`](crate::compat) evaluator;
//! incompatible ones are recorded as exclusions. Survivors get a similarity
//! score from three signals (capability type, required-schema overlap,
//! version recency) and are accepted when the score reaches the threshold.
//!
//! Ordering never depends on the order candidates arrive in.

mod ranker;
mod request;
mod scoring;

pub use ranker::{CapabilityMatcher, Exclusion, MatchOutcome, MatchResult};
pub use request::CapabilityRequest;
pub use scoring::{ScoreBreakdown, SimilarityWeights};
