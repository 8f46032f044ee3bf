use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use hg_directory::{DirectoryError, DirectoryService};
use hg_entitlements::{EntitlementSet, GroupId, PrincipalId};
use hg_runtime::DirectoryOp;

/// One call as seen by the fake directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryCall {
    pub op: DirectoryOp,
    pub principal: PrincipalId,
    pub group: GroupId,
}

#[derive(Default)]
struct Inner {
    members: HashMap<PrincipalId, EntitlementSet>,
    failures: HashMap<(GroupId, bool), DirectoryError>,
    calls: Vec<DirectoryCall>,
    delay: Option<Duration>,
}

/// Directory fake with scripted per-group failures.
///
/// Failures stay in place until cleared, so the same group keeps failing
/// across runs. Every call is recorded, including failed ones.
#[derive(Default)]
pub struct ScriptedDirectory {
    inner: Mutex<Inner>,
}

impl ScriptedDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn fail_grant(&self, group: &str, error: DirectoryError) {
        self.lock().failures.insert((GroupId::from(group), true), error);
    }

    pub fn fail_revoke(&self, group: &str, error: DirectoryError) {
        self.lock().failures.insert((GroupId::from(group), false), error);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Every call sleeps this long first (pair with a paused tokio clock).
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.lock().delay = delay;
    }

    pub fn calls(&self) -> Vec<DirectoryCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Groups the directory currently holds for `principal`.
    pub fn members(&self, principal: &PrincipalId) -> EntitlementSet {
        self.lock().members.get(principal).cloned().unwrap_or_default()
    }

    /// Give `principal` a membership outside of this pipeline.
    pub fn seed_member(&self, principal: &PrincipalId, group: &str) {
        self.lock()
            .members
            .entry(principal.clone())
            .or_default()
            .insert(GroupId::from(group));
    }

    async fn mutate(&self, op: DirectoryOp, principal: &PrincipalId, group: &GroupId) -> Result<(), DirectoryError> {
        let delay = {
            let mut inner = self.lock();
            inner.calls.push(DirectoryCall {
                op,
                principal: principal.clone(),
                group: group.clone(),
            });
            inner.delay
        };
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        let mut inner = self.lock();
        let grant = op == DirectoryOp::Grant;
        if let Some(err) = inner.failures.get(&(group.clone(), grant)) {
            return Err(err.clone());
        }
        let held = inner.members.entry(principal.clone()).or_default();
        if grant {
            held.insert(group.clone());
        } else {
            held.remove(group);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DirectoryService for ScriptedDirectory {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn grant_group(&self, principal: &PrincipalId, group: &GroupId) -> Result<(), DirectoryError> {
        self.mutate(DirectoryOp::Grant, principal, group).await
    }

    async fn revoke_group(&self, principal: &PrincipalId, group: &GroupId) -> Result<(), DirectoryError> {
        self.mutate(DirectoryOp::Revoke, principal, group).await
    }
}
