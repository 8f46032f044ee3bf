use serde::{Deserialize, Serialize};

use crate::{EntitlementSet, ProtectedGroupSet};

/// Work a reconciliation batch must perform.
///
/// `to_add ∩ to_remove = ∅` always holds: both sides are set differences
/// taken in opposite directions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementDiff {
    pub to_add: EntitlementSet,
    pub to_remove: EntitlementSet,
}

impl EntitlementDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    pub fn call_count(&self) -> usize {
        self.to_add.len() + self.to_remove.len()
    }
}

/// `to_add = current − previous`, `to_remove = (previous − current) − protected`.
pub fn diff(
    previous: &EntitlementSet,
    current: &EntitlementSet,
    protected: &ProtectedGroupSet,
) -> EntitlementDiff {
    let to_add = current.difference(previous);
    let to_remove = previous
        .difference(current)
        .into_iter()
        .filter(|g| !protected.contains(g))
        .collect();

    EntitlementDiff { to_add, to_remove }
}
