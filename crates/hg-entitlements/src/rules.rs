//! Entitlement rule set: static configuration mapping ownership facts to
//! group identifiers.
//!
//! # Invariants
//!
//! - **Validated on construction**: the only way to obtain an
//!   [`EntitlementRuleSet`] is [`EntitlementRuleSet::new`] (or deserializing,
//!   which routes through it). Malformed configuration fails at load time,
//!   never during evaluation.
//! - **Injective group mapping**: no two rules share a group identifier.
//! - **Closed collection references**: every rule references a declared
//!   collection; aggregate requirements reference collections that have a
//!   holder rule.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::{CollectionId, GroupId};

/// How several qualifying balance tiers are granted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceTierPolicy {
    /// Every tier whose threshold is met is granted (escalating badges).
    #[default]
    Cumulative,
    /// Only the highest qualifying tier is granted.
    HighestOnly,
}

impl BalanceTierPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceTierPolicy::Cumulative => "cumulative",
            BalanceTierPolicy::HighestOnly => "highest_only",
        }
    }
}

/// One rule; each maps to exactly one external group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntitlementRule {
    /// Holds at least one item of `collection`.
    Holder {
        collection: CollectionId,
        group: GroupId,
    },
    /// Holds at least `min_count` items of `collection`.
    Whale {
        collection: CollectionId,
        min_count: u64,
        group: GroupId,
    },
    /// Fungible balance at least `min_balance` (smallest unit).
    BalanceTier { min_balance: u64, group: GroupId },
    /// Every holder rule for the listed collections is earned.
    Aggregate {
        requires: Vec<CollectionId>,
        group: GroupId,
    },
}

impl EntitlementRule {
    pub fn group(&self) -> &GroupId {
        match self {
            EntitlementRule::Holder { group, .. }
            | EntitlementRule::Whale { group, .. }
            | EntitlementRule::BalanceTier { group, .. }
            | EntitlementRule::Aggregate { group, .. } => group,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EntitlementRule::Holder { .. } => "holder",
            EntitlementRule::Whale { .. } => "whale",
            EntitlementRule::BalanceTier { .. } => "balance_tier",
            EntitlementRule::Aggregate { .. } => "aggregate",
        }
    }
}

/// Unvalidated rule-set shape as it appears in configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSetSpec {
    #[serde(default)]
    pub balance_tier_policy: BalanceTierPolicy,
    pub collections: Vec<CollectionId>,
    pub rules: Vec<EntitlementRule>,
}

/// Reasons a rule set is refused at load time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleSetError {
    Empty,
    BlankGroup { index: usize },
    DuplicateGroup { group: GroupId },
    DuplicateCollection { collection: CollectionId },
    UnknownCollection { group: GroupId, collection: CollectionId },
    WhaleThresholdTooLow { group: GroupId, min_count: u64 },
    DuplicateBalanceThreshold { min_balance: u64 },
    AggregateTooSmall { group: GroupId },
    AggregateWithoutHolder { group: GroupId, collection: CollectionId },
}

impl fmt::Display for RuleSetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleSetError::Empty => write!(f, "rule set has no rules"),
            RuleSetError::BlankGroup { index } => {
                write!(f, "rule #{index} has a blank group id")
            }
            RuleSetError::DuplicateGroup { group } => {
                write!(f, "group '{group}' is mapped by more than one rule")
            }
            RuleSetError::DuplicateCollection { collection } => {
                write!(f, "collection '{collection}' declared twice")
            }
            RuleSetError::UnknownCollection { group, collection } => write!(
                f,
                "rule for group '{group}' references undeclared collection '{collection}'"
            ),
            RuleSetError::WhaleThresholdTooLow { group, min_count } => write!(
                f,
                "whale rule for group '{group}' has min_count={min_count}; must be >= 2"
            ),
            RuleSetError::DuplicateBalanceThreshold { min_balance } => {
                write!(f, "two balance tiers share min_balance={min_balance}")
            }
            RuleSetError::AggregateTooSmall { group } => write!(
                f,
                "aggregate rule for group '{group}' must require at least two collections"
            ),
            RuleSetError::AggregateWithoutHolder { group, collection } => write!(
                f,
                "aggregate rule for group '{group}' requires '{collection}' which has no holder rule"
            ),
        }
    }
}

impl std::error::Error for RuleSetError {}

/// A validated rule set. See module docs for the invariants it upholds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RuleSetSpec", into = "RuleSetSpec")]
pub struct EntitlementRuleSet {
    policy: BalanceTierPolicy,
    collections: BTreeSet<CollectionId>,
    rules: Vec<EntitlementRule>,
}

impl EntitlementRuleSet {
    pub fn new(spec: RuleSetSpec) -> Result<Self, RuleSetError> {
        if spec.rules.is_empty() {
            return Err(RuleSetError::Empty);
        }

        let mut collections = BTreeSet::new();
        for c in &spec.collections {
            if !collections.insert(c.clone()) {
                return Err(RuleSetError::DuplicateCollection {
                    collection: c.clone(),
                });
            }
        }

        let mut groups: BTreeSet<&GroupId> = BTreeSet::new();
        let mut holder_collections: BTreeSet<&CollectionId> = BTreeSet::new();
        let mut balance_thresholds: BTreeSet<u64> = BTreeSet::new();

        for (index, rule) in spec.rules.iter().enumerate() {
            let group = rule.group();
            if group.is_blank() {
                return Err(RuleSetError::BlankGroup { index });
            }
            if !groups.insert(group) {
                return Err(RuleSetError::DuplicateGroup {
                    group: group.clone(),
                });
            }

            match rule {
                EntitlementRule::Holder { collection, .. } => {
                    check_declared(&collections, group, collection)?;
                    holder_collections.insert(collection);
                }
                EntitlementRule::Whale {
                    collection,
                    min_count,
                    ..
                } => {
                    check_declared(&collections, group, collection)?;
                    if *min_count < 2 {
                        return Err(RuleSetError::WhaleThresholdTooLow {
                            group: group.clone(),
                            min_count: *min_count,
                        });
                    }
                }
                EntitlementRule::BalanceTier { min_balance, .. } => {
                    if !balance_thresholds.insert(*min_balance) {
                        return Err(RuleSetError::DuplicateBalanceThreshold {
                            min_balance: *min_balance,
                        });
                    }
                }
                EntitlementRule::Aggregate { requires, .. } => {
                    let distinct: BTreeSet<&CollectionId> = requires.iter().collect();
                    if distinct.len() < 2 {
                        return Err(RuleSetError::AggregateTooSmall {
                            group: group.clone(),
                        });
                    }
                    for c in requires {
                        check_declared(&collections, group, c)?;
                    }
                }
            }
        }

        // Holder rules may appear after the aggregate that references them,
        // so this check runs once every holder is known.
        for rule in &spec.rules {
            if let EntitlementRule::Aggregate { requires, group } = rule {
                if let Some(missing) = requires.iter().find(|c| !holder_collections.contains(c)) {
                    return Err(RuleSetError::AggregateWithoutHolder {
                        group: group.clone(),
                        collection: missing.clone(),
                    });
                }
            }
        }

        Ok(Self {
            policy: spec.balance_tier_policy,
            collections,
            rules: spec.rules,
        })
    }

    pub fn policy(&self) -> BalanceTierPolicy {
        self.policy
    }

    pub fn collections(&self) -> &BTreeSet<CollectionId> {
        &self.collections
    }

    pub fn rules(&self) -> &[EntitlementRule] {
        &self.rules
    }

    /// Every group this rule set can ever grant.
    pub fn managed_groups(&self) -> BTreeSet<GroupId> {
        self.rules.iter().map(|r| r.group().clone()).collect()
    }
}

fn check_declared(
    collections: &BTreeSet<CollectionId>,
    group: &GroupId,
    collection: &CollectionId,
) -> Result<(), RuleSetError> {
    if collections.contains(collection) {
        Ok(())
    } else {
        Err(RuleSetError::UnknownCollection {
            group: group.clone(),
            collection: collection.clone(),
        })
    }
}

impl TryFrom<RuleSetSpec> for EntitlementRuleSet {
    type Error = RuleSetError;

    fn try_from(spec: RuleSetSpec) -> Result<Self, Self::Error> {
        Self::new(spec)
    }
}

impl From<EntitlementRuleSet> for RuleSetSpec {
    fn from(set: EntitlementRuleSet) -> Self {
        RuleSetSpec {
            balance_tier_policy: set.policy,
            collections: set.collections.into_iter().collect(),
            rules: set.rules,
        }
    }
}
