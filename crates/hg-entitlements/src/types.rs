use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Stable identity key of a principal (directory account id).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

/// NFT collection identifier (collection symbol or verified collection key).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(String);

/// External directory group (role) identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

macro_rules! string_id {
    ($ty:ident) => {
        impl $ty {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $ty {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $ty {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(PrincipalId);
string_id!(CollectionId);
string_id!(GroupId);

// ---------------------------------------------------------------------------
// Ownership snapshot
// ---------------------------------------------------------------------------

/// Ownership facts for one principal, recomputed on every verification run.
///
/// Holdings are summed across every wallet linked to the principal.
/// `balance` is in the token's smallest unit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipSnapshot {
    pub holdings: BTreeMap<CollectionId, u64>,
    pub balance: u64,
}

impl OwnershipSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Held count for `collection`; absent collections count as zero.
    pub fn count(&self, collection: &CollectionId) -> u64 {
        self.holdings.get(collection).copied().unwrap_or(0)
    }

    pub fn with_holding(mut self, collection: impl Into<CollectionId>, count: u64) -> Self {
        self.holdings.insert(collection.into(), count);
        self
    }

    pub fn with_balance(mut self, balance: u64) -> Self {
        self.balance = balance;
        self
    }
}

// ---------------------------------------------------------------------------
// Entitlement set
// ---------------------------------------------------------------------------

/// A set of group identifiers. Ordered so every rendering (audit rows, API
/// responses, logs) is deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntitlementSet(BTreeSet<GroupId>);

impl EntitlementSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, group: GroupId) -> bool {
        self.0.insert(group)
    }

    pub fn remove(&mut self, group: &GroupId) -> bool {
        self.0.remove(group)
    }

    pub fn contains(&self, group: &GroupId) -> bool {
        self.0.contains(group)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GroupId> {
        self.0.iter()
    }

    /// `self − other`.
    pub fn difference(&self, other: &EntitlementSet) -> EntitlementSet {
        self.0.difference(&other.0).cloned().collect()
    }

    pub fn intersection(&self, other: &EntitlementSet) -> EntitlementSet {
        self.0.intersection(&other.0).cloned().collect()
    }

    pub fn union(&self, other: &EntitlementSet) -> EntitlementSet {
        self.0.union(&other.0).cloned().collect()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(|g| g.as_str().to_string()).collect()
    }
}

impl FromIterator<GroupId> for EntitlementSet {
    fn from_iter<I: IntoIterator<Item = GroupId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for EntitlementSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(GroupId::from).collect())
    }
}

impl IntoIterator for EntitlementSet {
    type Item = GroupId;
    type IntoIter = std::collections::btree_set::IntoIter<GroupId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a EntitlementSet {
    type Item = &'a GroupId;
    type IntoIter = std::collections::btree_set::Iter<'a, GroupId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ---------------------------------------------------------------------------
// Protected groups
// ---------------------------------------------------------------------------

/// Groups this pipeline must never revoke (manually granted badges etc.).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtectedGroupSet(BTreeSet<GroupId>);

impl ProtectedGroupSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn contains(&self, group: &GroupId) -> bool {
        self.0.contains(group)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<GroupId> for ProtectedGroupSet {
    fn from_iter<I: IntoIterator<Item = GroupId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for ProtectedGroupSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(GroupId::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_collection_counts_as_zero() {
        let snap = OwnershipSnapshot::empty().with_holding("alpha", 3);
        assert_eq!(snap.count(&CollectionId::new("alpha")), 3);
        assert_eq!(snap.count(&CollectionId::new("beta")), 0);
    }

    #[test]
    fn entitlement_set_serializes_sorted() {
        let set: EntitlementSet = ["zeta", "alpha", "mid"].into_iter().collect();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["alpha","mid","zeta"]"#);
    }
}
