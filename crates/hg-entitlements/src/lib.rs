//! hg-entitlements
//!
//! Entitlement engine: ownership snapshot in, earned group set out, and the
//! add/remove diff against what was previously granted.
//!
//! Architectural decisions:
//! - Rule sets are validated once at construction; a malformed set never
//!   reaches evaluation
//! - Evaluation is a pure function of (snapshot, rules)
//! - Diffing is plain set difference; protected groups are never removed
//!
//! Deterministic, pure logic. No IO. No directory calls.

mod differ;
mod evaluator;
mod rules;
mod types;

pub use differ::{diff, EntitlementDiff};
pub use evaluator::{evaluate, evaluate_detailed, RuleVerdict};
pub use rules::{BalanceTierPolicy, EntitlementRule, EntitlementRuleSet, RuleSetError, RuleSetSpec};
pub use types::*;
