use crate::{
    BalanceTierPolicy, CollectionId, EntitlementRule, EntitlementRuleSet, EntitlementSet, GroupId,
    OwnershipSnapshot,
};

/// Per-rule evaluation evidence, in rule-set order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleVerdict {
    pub group: GroupId,
    pub kind: &'static str,
    pub earned: bool,
}

fn holder_earned(snapshot: &OwnershipSnapshot, collection: &CollectionId) -> bool {
    snapshot.count(collection) >= 1
}

fn rule_earned(snapshot: &OwnershipSnapshot, rule: &EntitlementRule) -> bool {
    match rule {
        EntitlementRule::Holder { collection, .. } => holder_earned(snapshot, collection),
        EntitlementRule::Whale {
            collection,
            min_count,
            ..
        } => snapshot.count(collection) >= *min_count,
        EntitlementRule::BalanceTier { min_balance, .. } => snapshot.balance >= *min_balance,
        // Rule-set validation guarantees each required collection has a holder
        // rule, so "holder rule earned" reduces to the holder predicate.
        EntitlementRule::Aggregate { requires, .. } => {
            requires.iter().all(|c| holder_earned(snapshot, c))
        }
    }
}

/// Evaluate every rule independently and report each verdict.
///
/// Holder and whale tiers for the same collection are independent: meeting
/// the whale threshold also meets the holder threshold, and both are earned.
/// Under [`BalanceTierPolicy::HighestOnly`] only the qualifying balance tier
/// with the largest threshold keeps `earned = true`.
pub fn evaluate_detailed(
    snapshot: &OwnershipSnapshot,
    rules: &EntitlementRuleSet,
) -> Vec<RuleVerdict> {
    let mut verdicts: Vec<RuleVerdict> = rules
        .rules()
        .iter()
        .map(|rule| RuleVerdict {
            group: rule.group().clone(),
            kind: rule.kind(),
            earned: rule_earned(snapshot, rule),
        })
        .collect();

    if rules.policy() == BalanceTierPolicy::HighestOnly {
        let highest = rules
            .rules()
            .iter()
            .filter_map(|r| match r {
                EntitlementRule::BalanceTier { min_balance, group } if snapshot.balance >= *min_balance => {
                    Some((*min_balance, group))
                }
                _ => None,
            })
            .max_by_key(|(min, _)| *min)
            .map(|(_, g)| g.clone());

        for (rule, verdict) in rules.rules().iter().zip(verdicts.iter_mut()) {
            if matches!(rule, EntitlementRule::BalanceTier { .. }) {
                verdict.earned = highest.as_ref() == Some(&verdict.group);
            }
        }
    }

    verdicts
}

/// The set of groups the snapshot currently earns under `rules`.
///
/// Pure: identical inputs always produce an identical set, and no rule's
/// outcome depends on the position of another rule in the set.
pub fn evaluate(snapshot: &OwnershipSnapshot, rules: &EntitlementRuleSet) -> EntitlementSet {
    evaluate_detailed(snapshot, rules)
        .into_iter()
        .filter(|v| v.earned)
        .map(|v| v.group)
        .collect()
}
