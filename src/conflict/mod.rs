//! 冲突解决模块：多个候选同时被接受时的确定性裁决。
//!
//! # Conflict Resolution Module
//!
//! When more than one candidate passes matching, the resolver tries a chain
//! of strategies in order and records every attempt:
//!
//! | Strategy | Succeeds when |
//! |----------|---------------|
//! | `override` | a candidate ranks first under the [`PriorityStrategy`] |
//! | `merge` | overlapping fields are identically typed |
//! | `compose` | some ordering chains each output set into the next input set |
//!
//! The same candidates and strategies always give the same [`ConflictRecord`],
//! whatever order the candidates arrive in.

mod resolver;
mod strategy;

pub use resolver::{ConflictRecord, ConflictResolver, Resolution, StrategyAttempt};
pub use strategy::{ConflictStrategy, PriorityStrategy};
